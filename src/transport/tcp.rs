//! TCP transport built on tokio sockets.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpSocket,
        lookup_host,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{SocketOptions, Transport, TransportEvents, not_connected};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Transport over a single TCP connection.
///
/// A reader task forwards every read to [`super::TransportListener::on_data`]
/// and reports EOF as an [`io::ErrorKind::UnexpectedEof`] error. A writer
/// task drains an unbounded queue, so [`Transport::send`] never blocks.
pub struct TcpTransport {
    host: String,
    port: u16,
    options: SocketOptions,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    peer: Option<SocketAddr>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl TcpTransport {
    /// Transport that will connect to `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, options: SocketOptions) -> Self {
        Self {
            host: host.into(),
            port,
            options,
            writer: None,
            peer: None,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Address of the connected peer.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer }

    async fn open_socket(&self) -> io::Result<tokio::net::TcpStream> {
        let addr = lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses found for {}", self.host),
                )
            })?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        self.options.apply(&socket)?;
        let connect = socket.connect(addr);
        match self.options.connect_timeout_value() {
            Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out after {limit:?}"),
                )
            })?,
            None => connect.await,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, events: TransportEvents) -> io::Result<()> {
        if self.writer.is_some() || self.shutdown.is_cancelled() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "transport already used",
            ));
        }
        let stream = self.open_socket().await?;
        self.peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        self.tasks
            .spawn(read_loop(reader, events.clone(), self.shutdown.clone()));
        self.tasks.spawn(write_loop(writer, rx, events));
        self.writer = Some(tx);
        tracing::debug!(host = %self.host, port = self.port, peer = ?self.peer, "tcp transport connected");
        Ok(())
    }

    fn send(&mut self, bytes: Bytes) -> io::Result<()> {
        let writer = self.writer.as_ref().ok_or_else(not_connected)?;
        writer
            .send(bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "transport writer has stopped"))
    }

    fn close(&mut self) -> io::Result<()> {
        // Dropping the sender lets the writer flush what is queued.
        self.writer = None;
        self.shutdown.cancel();
        self.tasks.close();
        Ok(())
    }

    fn is_connected(&self) -> bool { self.writer.is_some() && !self.shutdown.is_cancelled() }
}

impl Drop for TcpTransport {
    fn drop(&mut self) { self.shutdown.cancel(); }
}

async fn read_loop(mut reader: OwnedReadHalf, events: TransportEvents, shutdown: CancellationToken) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        buf.reserve(READ_BUFFER_SIZE);
        tokio::select! {
            biased;

            () = shutdown.cancelled() => break,
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    events.on_error(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    ));
                    break;
                }
                Ok(_) => events.on_data(buf.split().freeze()),
                Err(e) => {
                    events.on_error(e);
                    break;
                }
            },
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
    events: TransportEvents,
) {
    while let Some(bytes) = queue.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            events.on_error(e);
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(error = %e, "tcp write shutdown failed");
    }
}
