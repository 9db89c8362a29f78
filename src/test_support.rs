//! In-memory doubles for exercising providers without sockets.
//!
//! [`ChannelTransport`] records every chunk the provider writes and lets a
//! test inject peer bytes or failures through its [`TransportProbe`].
//! [`RecordingListener`] forwards listener upcalls to a channel.

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{
    Notify,
    mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
};

use crate::{
    address::RemoteAddress,
    engine::frame::{Frame, MAX_FRAME_LENGTH, decode_frames, encode_frames},
    error::ProviderError,
    id::{ConsumerId, ResourceId},
    message::InboundDelivery,
    provider::ProviderListener,
    transport::{SocketOptions, Transport, TransportEvents, TransportFactory, not_connected},
};

#[derive(Default)]
struct ProbeState {
    sent: Vec<Bytes>,
    events: Option<TransportEvents>,
    connected: bool,
    closed: bool,
    refuse: Option<io::ErrorKind>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<ProbeState>,
    written: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Transport that keeps written bytes in memory.
pub struct ChannelTransport {
    shared: Arc<Shared>,
}

/// Test-side view of a [`ChannelTransport`].
#[derive(Clone)]
pub struct TransportProbe {
    shared: Arc<Shared>,
}

impl ChannelTransport {
    fn with_state(state: ProbeState) -> (Self, TransportProbe) {
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            written: Notify::new(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            TransportProbe { shared },
        )
    }

    /// A transport that accepts sends straight away.
    #[must_use]
    pub fn connected() -> (Self, TransportProbe) {
        Self::with_state(ProbeState {
            connected: true,
            ..ProbeState::default()
        })
    }

    /// A transport that rejects sends until `connect` is called.
    #[must_use]
    pub fn disconnected() -> (Self, TransportProbe) { Self::with_state(ProbeState::default()) }

    /// A transport whose `connect` fails with `kind`.
    #[must_use]
    pub fn refusing(kind: io::ErrorKind) -> (Self, TransportProbe) {
        Self::with_state(ProbeState {
            refuse: Some(kind),
            ..ProbeState::default()
        })
    }

    /// A factory handing out a single disconnected transport, plus its
    /// probe. Later calls get transports that refuse to connect.
    #[must_use]
    pub fn factory() -> (TransportFactory, TransportProbe) {
        let (transport, probe) = Self::disconnected();
        let slot = Mutex::new(Some(transport));
        let factory: TransportFactory = Arc::new(move |_: &RemoteAddress, _: SocketOptions| {
            let next = slot
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            let transport =
                next.unwrap_or_else(|| Self::refusing(io::ErrorKind::AddrInUse).0);
            Box::new(transport) as Box<dyn Transport>
        });
        (factory, probe)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&mut self, events: TransportEvents) -> io::Result<()> {
        let mut state = self.shared.lock();
        if let Some(kind) = state.refuse {
            return Err(io::Error::new(kind, "connection refused by test transport"));
        }
        state.events = Some(events);
        state.connected = true;
        Ok(())
    }

    fn send(&mut self, bytes: Bytes) -> io::Result<()> {
        {
            let mut state = self.shared.lock();
            if !state.connected || state.closed {
                return Err(not_connected());
            }
            state.sent.push(bytes);
        }
        self.shared.written.notify_one();
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut state = self.shared.lock();
        state.closed = true;
        state.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let state = self.shared.lock();
        state.connected && !state.closed
    }
}

impl TransportProbe {
    /// Every chunk written so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Bytes> { self.shared.lock().sent.clone() }

    /// Every frame written so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the written bytes do not decode as whole frames.
    pub fn frames(&self) -> io::Result<Vec<Frame>> {
        let bytes: Vec<u8> = self
            .shared
            .lock()
            .sent
            .iter()
            .flat_map(|chunk| chunk.iter().copied())
            .collect();
        decode_frames(&bytes, MAX_FRAME_LENGTH)
    }

    /// Wait until at least `count` frames have been written and return all
    /// of them.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::TimedOut`] if they do not appear within
    /// `limit`, or a decode error.
    pub async fn wait_for_frames(&self, count: usize, limit: Duration) -> io::Result<Vec<Frame>> {
        let wait = async {
            loop {
                match self.frames() {
                    Ok(frames) if frames.len() < count => {}
                    done => return done,
                }
                self.shared.written.notified().await;
            }
        };
        tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("fewer than {count} frames written")))?
    }

    /// Deliver `bytes` as if the peer had sent them.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::NotConnected`] before `connect`.
    pub fn inject(&self, bytes: Bytes) -> io::Result<()> {
        let events = self.shared.lock().events.clone().ok_or_else(not_connected)?;
        events.on_data(bytes);
        Ok(())
    }

    /// Encode `frames` and deliver them as peer input.
    ///
    /// # Errors
    ///
    /// Returns an encoding error or [`io::ErrorKind::NotConnected`].
    pub fn reply<I>(&self, frames: I) -> io::Result<()>
    where
        I: IntoIterator<Item = Frame>,
    {
        self.inject(encode_frames(frames, MAX_FRAME_LENGTH)?)
    }

    /// Report `error` as a transport failure.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::NotConnected`] before `connect`.
    pub fn fail(&self, error: io::Error) -> io::Result<()> {
        let events = self.shared.lock().events.clone().ok_or_else(not_connected)?;
        events.on_error(error);
        Ok(())
    }

    /// Whether the provider closed the transport.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.shared.lock().closed }
}

/// A listener upcall.
#[derive(Debug)]
pub enum ListenerEvent {
    /// `on_inbound_message`.
    Inbound(ConsumerId, InboundDelivery),
    /// `on_connection_failure`.
    ConnectionFailure(ProviderError),
    /// `on_resource_remotely_closed`.
    RemotelyClosed(ResourceId, ProviderError),
}

/// Listener that forwards every upcall to a channel.
pub struct RecordingListener {
    events: UnboundedSender<ListenerEvent>,
}

impl RecordingListener {
    /// Build a listener and the receiver of its events.
    #[must_use]
    pub fn new() -> (Arc<Self>, UnboundedReceiver<ListenerEvent>) {
        let (events, rx) = unbounded_channel();
        (Arc::new(Self { events }), rx)
    }

    fn record(&self, event: ListenerEvent) {
        if self.events.send(event).is_err() {
            log::debug!("listener event dropped; receiver gone");
        }
    }
}

impl ProviderListener for RecordingListener {
    fn on_inbound_message(&self, consumer: &ConsumerId, delivery: InboundDelivery) {
        self.record(ListenerEvent::Inbound(consumer.clone(), delivery));
    }

    fn on_connection_failure(&self, cause: ProviderError) { self.record(ListenerEvent::ConnectionFailure(cause)); }

    fn on_resource_remotely_closed(&self, resource: &ResourceId, cause: ProviderError) {
        self.record(ListenerEvent::RemotelyClosed(resource.clone(), cause));
    }
}
