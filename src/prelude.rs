//! Optional convenience imports for common provider workflows.
//!
//! Prefer importing specialised APIs directly from their owning modules.
//!
//! # Examples
//!
//! ```rust,no_run
//! use jmswire::prelude::*;
//!
//! fn provider(uri: &str) -> Result<AmqpProvider, ProviderError> {
//!     AmqpProvider::new(RemoteAddress::parse(uri)?)
//! }
//! ```

pub use crate::{
    address::RemoteAddress,
    async_result::ProviderFuture,
    blocking::BlockingProvider,
    error::ProviderError,
    id::{ConnectionId, ConsumerId, IdGenerator, ProducerId, ResourceId, SessionId},
    message::{AckType, InboundDelivery, JmsMessage, OutboundMessage},
    meta::{AckMode, ConnectionInfo, ConsumerInfo, Destination, ProducerInfo, ResourceInfo, SessionInfo},
    provider::{AmqpProvider, Provider, ProviderConfig, ProviderListener, PullOutcome},
};
