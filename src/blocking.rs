//! Synchronous facade over a [`Provider`].
//!
//! [`BlockingProvider`] issues the same operations as the wrapped provider
//! and parks the calling thread until the returned future resolves. The
//! provider's worker keeps running on its own runtime, so the wait never
//! blocks protocol work.
//!
//! Call it from plain threads. Blocking inside an async task stalls that
//! task's runtime worker.

use std::{sync::Arc, time::Duration};

use crate::{
    address::RemoteAddress,
    engine::DeliveryId,
    error::ProviderError,
    id::{ConsumerId, SessionId},
    message::{AckType, OutboundMessage},
    meta::ResourceInfo,
    provider::{Provider, ProviderListener, PullOutcome},
};

/// Blocking wrapper around a shared provider.
///
/// Every call waits at most the configured timeout and fails with
/// [`ProviderError::Timeout`] once it is exceeded. The underlying operation
/// is not cancelled.
#[derive(Clone)]
pub struct BlockingProvider {
    inner: Arc<dyn Provider>,
    timeout: Option<Duration>,
}

impl BlockingProvider {
    /// Wrap `inner` with no wait limit.
    #[must_use]
    pub fn new(inner: Arc<dyn Provider>) -> Self { Self { inner, timeout: None } }

    /// Limit every wait to `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The wrapped provider.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn Provider> { &self.inner }

    /// Connect the transport, waiting for the outcome.
    ///
    /// # Errors
    ///
    /// See [`Provider::connect`].
    pub fn connect(&self) -> Result<(), ProviderError> { futures::executor::block_on(self.inner.connect()) }

    /// Close the provider and wait for the worker to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Timeout`] if closing takes too long.
    pub fn close(&self) -> Result<(), ProviderError> { self.inner.close().wait(self.timeout) }

    /// Create a resource and return its amended descriptor.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the provider.
    pub fn create(&self, resource: ResourceInfo) -> Result<ResourceInfo, ProviderError> {
        self.inner.create(resource).wait(self.timeout)
    }

    /// Destroy a resource.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the provider.
    pub fn destroy(&self, resource: ResourceInfo) -> Result<(), ProviderError> {
        self.inner.destroy(resource).wait(self.timeout)
    }

    /// Send a message and wait for the peer's settlement.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the provider.
    pub fn send(&self, message: OutboundMessage) -> Result<(), ProviderError> {
        self.inner.send(message).wait(self.timeout)
    }

    /// Settle an inbound delivery.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the provider.
    pub fn acknowledge(&self, consumer: ConsumerId, delivery: DeliveryId, ack: AckType) -> Result<(), ProviderError> {
        self.inner.acknowledge(consumer, delivery, ack).wait(self.timeout)
    }

    /// Commit a transacted session.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the provider.
    pub fn commit(&self, session: SessionId) -> Result<(), ProviderError> { self.inner.commit(session).wait(self.timeout) }

    /// Roll back a transacted session.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the provider.
    pub fn rollback(&self, session: SessionId) -> Result<(), ProviderError> {
        self.inner.rollback(session).wait(self.timeout)
    }

    /// Pull one message. The pull's own `timeout` bounds the wait, so the
    /// adapter timeout does not apply.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the provider.
    pub fn pull(&self, consumer: ConsumerId, timeout: Duration) -> Result<PullOutcome, ProviderError> {
        self.inner.pull(consumer, timeout).wait(None)
    }

    /// Remove a durable subscription.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the provider.
    pub fn unsubscribe(&self, subscription: &str) -> Result<(), ProviderError> {
        self.inner.unsubscribe(subscription).wait(self.timeout)
    }

    /// Install the event listener.
    pub fn set_listener(&self, listener: Arc<dyn ProviderListener>) { self.inner.set_listener(listener); }

    /// Address the provider connects to.
    #[must_use]
    pub fn remote_address(&self) -> &RemoteAddress { self.inner.remote_address() }
}
