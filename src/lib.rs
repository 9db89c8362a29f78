#![doc(html_root_url = "https://docs.rs/jmswire/latest")]
//! Public API for the `jmswire` library.
//!
//! This crate provides the provider layer of a JMS-style messaging client:
//! hierarchical resource ids and descriptors, single-assignment request
//! futures, a sans-I/O protocol engine, byte transports, and the serial
//! worker that ties them together.

pub mod address;
pub mod async_result;
pub mod blocking;
pub mod byte_order;
pub mod engine;
pub mod error;
pub mod id;
pub mod message;
pub mod meta;
pub mod metrics;
pub mod prelude;
pub mod provider;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod transport;

pub use address::{AddressError, RemoteAddress};
pub use async_result::{AsyncResultError, ProviderFuture, ProviderRequest};
pub use blocking::BlockingProvider;
pub use error::ProviderError;
pub use id::{ConnectionId, ConsumerId, IdGenerator, ProducerId, ResourceId, SessionId};
pub use metrics::{Direction, ERRORS_TOTAL, FRAMES_TOTAL, PROVIDERS_ACTIVE};
pub use provider::{AmqpProvider, Provider, ProviderListener, PullOutcome};
