//! Byte transports.
//!
//! A [`Transport`] moves opaque bytes between the provider and the remote
//! peer. It never interprets them. Inbound bytes and failures are reported
//! through a [`TransportListener`]; the provider's listener only enqueues
//! them for its serial worker.

mod config;
mod tcp;

use std::{io, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;

pub use config::SocketOptions;
pub use tcp::TcpTransport;

use crate::address::RemoteAddress;

/// Receiver of transport upcalls.
pub trait TransportListener: Send + Sync {
    /// Bytes arrived from the peer.
    fn on_data(&self, bytes: Bytes);

    /// The transport failed. No further upcalls follow.
    fn on_error(&self, error: io::Error);
}

/// Shared handle to a [`TransportListener`].
pub type TransportEvents = Arc<dyn TransportListener>;

/// Bidirectional byte channel to the remote peer.
#[async_trait]
pub trait Transport: Send {
    /// Establish the connection and start delivering upcalls to `events`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error that prevented the connection.
    async fn connect(&mut self, events: TransportEvents) -> io::Result<()>;

    /// Queue `bytes` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::NotConnected`] before a successful connect or
    /// after close.
    fn send(&mut self, bytes: Bytes) -> io::Result<()>;

    /// Stop both directions. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns any error raised while shutting the socket down.
    fn close(&mut self) -> io::Result<()>;

    /// Whether [`Self::send`] would currently be accepted.
    fn is_connected(&self) -> bool;
}

/// Builds the transport for an address.
///
/// The provider calls this once per `connect`, which is how alternative
/// transports (TLS, in-memory test doubles) are plugged in.
pub type TransportFactory =
    Arc<dyn Fn(&RemoteAddress, SocketOptions) -> Box<dyn Transport> + Send + Sync>;

/// The default factory, producing [`TcpTransport`]s.
#[must_use]
pub fn tcp_factory() -> TransportFactory {
    Arc::new(|address: &RemoteAddress, options: SocketOptions| {
        Box::new(TcpTransport::new(address.host(), address.port(), options)) as Box<dyn Transport>
    })
}

pub(crate) fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is not connected")
}
