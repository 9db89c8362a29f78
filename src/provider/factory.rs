//! Scheme-keyed provider construction.
//!
//! A [`ProviderRegistry`] maps URI schemes to [`ProviderFactory`]s so that
//! callers can go from a connection URI to a ready [`Provider`] without
//! naming the concrete type.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::runtime::Handle;

use super::{AmqpProvider, Provider};
use crate::{
    address::{AddressError, RemoteAddress},
    error::ProviderError,
};

/// Builds providers for one family of URI schemes.
pub trait ProviderFactory: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Build a provider for `address` whose worker runs on `runtime`.
    ///
    /// # Errors
    ///
    /// Returns any error raised while configuring the provider.
    fn create_provider(
        &self,
        address: RemoteAddress,
        runtime: &Handle,
    ) -> Result<Arc<dyn Provider>, ProviderError>;
}

/// Factory for [`AmqpProvider`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AmqpProviderFactory;

impl ProviderFactory for AmqpProviderFactory {
    fn name(&self) -> &str { "amqp" }

    fn create_provider(
        &self,
        address: RemoteAddress,
        runtime: &Handle,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        let provider = AmqpProvider::builder(address)
            .runtime(runtime.clone())
            .build()?;
        Ok(Arc::new(provider))
    }
}

/// Thread-safe scheme to factory map.
///
/// # Examples
///
/// ```
/// use jmswire::provider::ProviderRegistry;
///
/// let registry = ProviderRegistry::with_defaults();
/// assert!(registry.schemes().contains(&"amqp".to_owned()));
/// ```
#[derive(Default)]
pub struct ProviderRegistry(DashMap<String, Arc<dyn ProviderFactory>>);

impl ProviderRegistry {
    /// Registry without any factories.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Registry with the bundled factory under `amqp` and `tcp`.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let amqp: Arc<dyn ProviderFactory> = Arc::new(AmqpProviderFactory);
        registry.register("amqp", Arc::clone(&amqp));
        registry.register("tcp", amqp);
        registry
    }

    /// Register `factory` for `scheme`, returning the factory it replaces.
    /// Schemes are matched case-insensitively.
    pub fn register(
        &self,
        scheme: &str,
        factory: Arc<dyn ProviderFactory>,
    ) -> Option<Arc<dyn ProviderFactory>> {
        self.0.insert(scheme.to_ascii_lowercase(), factory)
    }

    /// Registered schemes in sorted order.
    #[must_use]
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.0.iter().map(|entry| entry.key().clone()).collect();
        schemes.sort();
        schemes
    }

    /// Parse `uri` and build a provider with the factory for its scheme.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidAddress`] if `uri` does not parse or
    /// names an unregistered scheme, and any error from the factory.
    pub fn create(&self, uri: &str, runtime: &Handle) -> Result<Arc<dyn Provider>, ProviderError> {
        let address = RemoteAddress::parse(uri)?;
        let factory = self
            .0
            .get(address.scheme())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AddressError::UnknownScheme(address.scheme().to_owned()))?;
        log::debug!("creating {} provider for {address}", factory.name());
        factory.create_provider(address, runtime)
    }
}
