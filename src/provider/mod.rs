//! Providers: the protocol-specific side of the messaging client.
//!
//! A [`Provider`] turns lifecycle and messaging operations into protocol
//! traffic. Every operation returns a [`ProviderFuture`] straight away; the
//! work itself happens on the provider's serial worker, which owns the
//! transport, the protocol engine and all resource state.

mod amqp;
mod command;
mod config;
mod counter;
mod driver;
pub mod factory;
mod pending;
mod pump;
mod trace;
mod worker;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

pub use amqp::{AmqpProvider, AmqpProviderBuilder};
pub use config::ProviderConfig;
pub use counter::active_provider_count;
pub use factory::{AmqpProviderFactory, ProviderFactory, ProviderRegistry};
pub use pump::{feed_engine, pump_to_engine};

use crate::{
    address::RemoteAddress,
    async_result::ProviderFuture,
    engine::DeliveryId,
    error::ProviderError,
    id::{ConsumerId, ResourceId, SessionId},
    message::{AckType, InboundDelivery, OutboundMessage},
    meta::ResourceInfo,
};

/// Outcome of [`Provider::pull`].
#[derive(Clone, Debug, PartialEq)]
pub enum PullOutcome {
    /// A message arrived. It has also been passed to the listener.
    Delivered(Box<InboundDelivery>),
    /// The timeout expired or the peer had nothing to send.
    NoMessage,
}

/// Receiver of asynchronous provider events.
///
/// Calls come from the provider's worker task, one at a time and in the
/// order the events were observed. Implementations must not block.
pub trait ProviderListener: Send + Sync {
    /// A message arrived for `consumer`.
    fn on_inbound_message(&self, consumer: &ConsumerId, delivery: InboundDelivery);

    /// The connection failed. Called at most once per provider.
    fn on_connection_failure(&self, cause: ProviderError);

    /// The peer closed `resource` without being asked to.
    fn on_resource_remotely_closed(&self, resource: &ResourceId, cause: ProviderError);
}

/// Messaging operations shared by every wire protocol binding.
///
/// Optional capabilities have default implementations that fail with
/// [`ProviderError::Unsupported`] without touching the wire.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Open the transport to the remote peer.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Connect`] when the peer cannot be reached and
    /// [`ProviderError::IllegalState`] when already connected.
    async fn connect(&self) -> Result<(), ProviderError>;

    /// Close the provider. Only the first call has an effect; later calls
    /// return an already completed future.
    fn close(&self) -> ProviderFuture<()>;

    /// Create the described resource on the remote peer.
    fn create(&self, resource: ResourceInfo) -> ProviderFuture<ResourceInfo>;

    /// Tear the described resource down.
    fn destroy(&self, resource: ResourceInfo) -> ProviderFuture<()>;

    /// Send a message through a producer.
    fn send(&self, message: OutboundMessage) -> ProviderFuture<()>;

    /// Settle an inbound delivery.
    fn acknowledge(&self, consumer: ConsumerId, delivery: DeliveryId, ack: AckType) -> ProviderFuture<()> {
        let _ = (consumer, delivery, ack);
        ProviderFuture::failed(ProviderError::Unsupported("acknowledge"))
    }

    /// Commit the transaction of a transacted session.
    fn commit(&self, session: SessionId) -> ProviderFuture<()> {
        let _ = session;
        ProviderFuture::failed(ProviderError::Unsupported("commit"))
    }

    /// Roll back the transaction of a transacted session.
    fn rollback(&self, session: SessionId) -> ProviderFuture<()> {
        let _ = session;
        ProviderFuture::failed(ProviderError::Unsupported("rollback"))
    }

    /// Ask for one message, waiting at most `timeout`. A zero timeout waits
    /// until the peer reports it has nothing to send.
    fn pull(&self, consumer: ConsumerId, timeout: Duration) -> ProviderFuture<PullOutcome> {
        let _ = (consumer, timeout);
        ProviderFuture::failed(ProviderError::Unsupported("pull"))
    }

    /// Remove a durable subscription.
    fn unsubscribe(&self, subscription: &str) -> ProviderFuture<()> {
        let _ = subscription;
        ProviderFuture::failed(ProviderError::Unsupported("unsubscribe"))
    }

    /// Install the event listener, replacing any previous one.
    fn set_listener(&self, listener: Arc<dyn ProviderListener>);

    /// Currently installed listener.
    fn listener(&self) -> Option<Arc<dyn ProviderListener>>;

    /// Address the provider connects to.
    fn remote_address(&self) -> &RemoteAddress;
}

#[cfg(test)]
mod tests;
