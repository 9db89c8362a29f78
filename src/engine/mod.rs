//! Protocol engine adapter.
//!
//! A [`ProtocolEngine`] is a sans-I/O state machine: the provider copies
//! inbound bytes into it, asks it to process them, drains the bytes it wants
//! written, and polls it for state changes. It never touches a socket. The
//! bundled [`WireEngine`] speaks the compact frame format defined in
//! [`frame`].

pub mod frame;
mod wire;

use bincode::{Decode, Encode};
use bytes::Bytes;
use derive_more::{Display, From, Into};
use thiserror::Error;

pub use frame::{Attach, Flow, Frame, FrameCodec, Open, Performative, Role, Source, Target};
pub use wire::{EngineConfig, WireEngine};

use crate::message::AckType;

/// Handle of a link within a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into)]
#[display("{_0}")]
pub struct LinkHandle(u32);

impl LinkHandle {
    /// Wrap a raw handle.
    #[must_use]
    pub const fn new(value: u32) -> Self { Self(value) }

    /// Raw handle value.
    #[must_use]
    pub const fn get(self) -> u32 { self.0 }
}

/// Delivery id assigned by the sending side of a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into)]
#[display("{_0}")]
pub struct DeliveryId(u32);

impl DeliveryId {
    /// Wrap a raw delivery id.
    #[must_use]
    pub const fn new(value: u32) -> Self { Self(value) }

    /// Raw delivery id value.
    #[must_use]
    pub const fn get(self) -> u32 { self.0 }
}

/// Error condition carried by closing performatives.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct ErrorCondition {
    /// Symbolic name, e.g. `amqp:not-found`.
    pub name: String,
    /// Human readable description.
    pub description: String,
}

impl ErrorCondition {
    /// Build a condition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl std::fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.description.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}: {}", self.name, self.description)
        }
    }
}

/// Settlement outcome of a delivery.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum DeliveryState {
    /// Processed successfully.
    Accepted,
    /// Refused; not to be redelivered.
    Rejected(Option<ErrorCondition>),
    /// Not processed; may be redelivered elsewhere.
    Released,
    /// Not processed; redeliver with changes.
    Modified {
        /// Count the attempt as failed.
        delivery_failed: bool,
        /// Do not redeliver to the same receiver.
        undeliverable_here: bool,
    },
}

impl From<AckType> for DeliveryState {
    fn from(value: AckType) -> Self {
        match value {
            AckType::Accepted => Self::Accepted,
            AckType::Released => Self::Released,
            AckType::Rejected => Self::Rejected(None),
            AckType::Modified {
                delivery_failed,
                undeliverable_here,
            } => Self::Modified {
                delivery_failed,
                undeliverable_here,
            },
        }
    }
}

/// Errors raised by a protocol engine.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    /// An operation needs a bound connection.
    #[error("no connection is bound to the engine")]
    NotBound,
    /// `bind` was called twice.
    #[error("a connection is already bound to the engine")]
    AlreadyBound,
    /// The connection has been closed locally.
    #[error("connection is closed")]
    ConnectionClosed,
    /// No session uses the channel.
    #[error("unknown channel {0}")]
    UnknownChannel(u16),
    /// No link uses the handle.
    #[error("unknown link handle {0}")]
    UnknownLink(LinkHandle),
    /// No unsettled delivery has the id.
    #[error("unknown delivery {0}")]
    UnknownDelivery(DeliveryId),
    /// The link plays the other role.
    #[error("link {0} has the wrong role for this operation")]
    WrongRole(LinkHandle),
    /// The session has no free channels or handles left.
    #[error("no free {0} left")]
    Exhausted(&'static str),
    /// More input was offered than the engine can buffer.
    #[error("input of {len} bytes exceeds capacity of {capacity}")]
    InputOverflow {
        /// Bytes offered.
        len: usize,
        /// Bytes the engine could take.
        capacity: usize,
    },
    /// A transfer would not fit in one frame.
    #[error("transfer frame of {len} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        /// Encoded frame body size.
        len: usize,
        /// Largest frame body the engine produces.
        limit: usize,
    },
    /// Inbound bytes do not form valid frames.
    #[error("framing error: {0}")]
    Framing(String),
    /// A frame arrived that is not valid in the current state.
    #[error("unexpected {performative} on channel {channel}")]
    Unexpected {
        /// Name of the offending performative.
        performative: &'static str,
        /// Channel it arrived on.
        channel: u16,
    },
    /// The engine does not implement the operation.
    #[error("engine does not support {0}")]
    Unsupported(&'static str),
}

/// State change reported by [`ProtocolEngine::poll_event`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// The peer answered the open handshake.
    ConnectionOpened {
        /// Peer container id.
        container_id: String,
    },
    /// The peer closed the connection.
    ConnectionClosed {
        /// Error condition sent by the peer.
        error: Option<ErrorCondition>,
    },
    /// The peer answered a begin.
    SessionOpened {
        /// Local channel.
        channel: u16,
    },
    /// The peer ended a session.
    SessionClosed {
        /// Local channel.
        channel: u16,
        /// Error condition sent by the peer.
        error: Option<ErrorCondition>,
    },
    /// The peer answered an attach.
    LinkOpened {
        /// Local handle.
        handle: LinkHandle,
        /// Address of the peer's terminus, if it named one.
        remote_address: Option<String>,
    },
    /// The peer detached a link.
    LinkClosed {
        /// Local handle.
        handle: LinkHandle,
        /// Error condition sent by the peer.
        error: Option<ErrorCondition>,
    },
    /// The peer granted credit to a sender link.
    LinkCredit {
        /// Local handle.
        handle: LinkHandle,
        /// Credit now available.
        credit: u32,
    },
    /// The peer finished draining a receiver link.
    LinkDrained {
        /// Local handle.
        handle: LinkHandle,
    },
    /// A message arrived on a receiver link.
    Delivery {
        /// Local handle.
        handle: LinkHandle,
        /// Peer assigned delivery id.
        delivery: DeliveryId,
        /// Whether the peer settled it up front.
        settled: bool,
        /// Encoded message.
        payload: Bytes,
    },
    /// A queued transfer was written to the output buffer.
    DeliverySent {
        /// Local handle.
        handle: LinkHandle,
        /// Delivery id of the transfer.
        delivery: DeliveryId,
        /// Whether it was sent settled.
        settled: bool,
    },
    /// The peer settled a delivery sent by us.
    DeliveryUpdated {
        /// Delivery id of the transfer.
        delivery: DeliveryId,
        /// Outcome.
        state: DeliveryState,
    },
    /// The peer answered a discharge.
    Discharged {
        /// Session channel.
        channel: u16,
        /// Error condition if the discharge failed.
        error: Option<ErrorCondition>,
    },
}

/// Direction of a traced frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDirection {
    /// Written by the engine.
    Sent,
    /// Decoded from input.
    Received,
}

/// Observer of every performative an engine sends or receives.
pub trait FrameTracer: Send {
    /// Called once per frame.
    fn trace(&mut self, direction: FrameDirection, frame: &Frame);
}

/// Parameters for attaching a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkSpec {
    /// Link name.
    pub name: String,
    /// Local role.
    pub role: Role,
    /// Send transfers settled.
    pub presettle: bool,
    /// Source terminus.
    pub source: Option<Source>,
    /// Target terminus.
    pub target: Option<Target>,
}

/// Sans-I/O protocol state machine driven by a provider.
pub trait ProtocolEngine: Send {
    /// Bind a logical connection and queue the open handshake.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyBound`] on a second call.
    fn bind(&mut self, open: Open) -> Result<(), EngineError>;

    /// Bytes the engine can accept right now.
    fn input_capacity(&self) -> usize;

    /// Copy `chunk` into the input buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InputOverflow`] if `chunk` exceeds
    /// [`Self::input_capacity`].
    fn accept_input(&mut self, chunk: &[u8]) -> Result<(), EngineError>;

    /// Decode and apply every complete frame in the input buffer.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed or out-of-state frames.
    fn process_input(&mut self) -> Result<(), EngineError>;

    /// Next chunk waiting to be written, if any.
    fn pending_output(&self) -> Option<Bytes>;

    /// Drop the chunk last returned by [`Self::pending_output`].
    fn output_consumed(&mut self);

    /// Install or remove a frame tracer.
    fn set_tracer(&mut self, tracer: Option<Box<dyn FrameTracer>>);

    /// Begin a session, returning its channel.
    ///
    /// # Errors
    ///
    /// Fails if no connection is open.
    fn begin_session(&mut self) -> Result<u16, EngineError>;

    /// End the session on `channel`.
    ///
    /// # Errors
    ///
    /// Fails for an unknown channel.
    fn end_session(&mut self, channel: u16) -> Result<(), EngineError>;

    /// Attach a link on `channel`.
    ///
    /// # Errors
    ///
    /// Fails for an unknown channel.
    fn attach_link(&mut self, channel: u16, spec: LinkSpec) -> Result<LinkHandle, EngineError>;

    /// Detach a link.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle.
    fn detach_link(&mut self, handle: LinkHandle) -> Result<(), EngineError>;

    /// Grant credit on a receiver link.
    ///
    /// # Errors
    ///
    /// Fails for unknown handles or sender links.
    fn flow(&mut self, handle: LinkHandle, credit: u32, drain: bool) -> Result<(), EngineError>;

    /// Queue a transfer on a sender link. The transfer is held until the
    /// link has credit.
    ///
    /// # Errors
    ///
    /// Fails for unknown handles or receiver links, and with
    /// [`EngineError::PayloadTooLarge`] when the transfer cannot be framed.
    /// A refused transfer leaves the link untouched.
    fn transfer(&mut self, handle: LinkHandle, payload: Bytes) -> Result<DeliveryId, EngineError>;

    /// Settle a delivery received on `handle`.
    ///
    /// # Errors
    ///
    /// Fails for unknown handles or deliveries.
    fn settle(
        &mut self,
        handle: LinkHandle,
        delivery: DeliveryId,
        state: DeliveryState,
    ) -> Result<(), EngineError>;

    /// Discharge the transaction of the session on `channel`.
    ///
    /// # Errors
    ///
    /// Fails for an unknown channel.
    fn discharge(&mut self, channel: u16, fail: bool) -> Result<(), EngineError>;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Fails if no connection is bound.
    fn close(&mut self, error: Option<ErrorCondition>) -> Result<(), EngineError>;

    /// Next state change, if any.
    fn poll_event(&mut self) -> Option<EngineEvent>;
}
