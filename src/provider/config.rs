//! Per-provider configuration.
//!
//! [`ProviderConfig`] holds the knobs that belong to one provider instance:
//! frame and byte tracing, the create-request timeout and engine limits. It
//! is never process-global; two providers in one process may trace
//! differently.

use std::time::Duration;

use crate::{
    address::{AddressError, RemoteAddress, parse_option},
    engine::EngineConfig,
};

/// Configuration for an [`super::AmqpProvider`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use jmswire::provider::ProviderConfig;
///
/// let config = ProviderConfig::default()
///     .with_trace_frames(true)
///     .with_request_timeout(Some(Duration::from_secs(5)));
/// assert!(config.trace_frames());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderConfig {
    trace_frames: bool,
    trace_bytes: bool,
    request_timeout: Option<Duration>,
    max_frame_size: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            trace_frames: false,
            trace_bytes: false,
            request_timeout: None,
            max_frame_size: EngineConfig::default().max_frame_size,
        }
    }
}

impl ProviderConfig {
    /// Read `provider.*` and `amqp.*` options from `address`.
    ///
    /// Recognised keys are `provider.traceFrames`, `provider.traceBytes`,
    /// `provider.requestTimeout` (milliseconds, zero disables) and
    /// `amqp.maxFrameSize`.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::InvalidOption`] for unparsable values.
    pub fn from_address(address: &RemoteAddress) -> Result<Self, AddressError> {
        let mut config = Self::default();
        for (key, value) in address.options_with_prefix("provider") {
            config = match key {
                "traceFrames" => config.with_trace_frames(parse_option("provider", key, value)?),
                "traceBytes" => config.with_trace_bytes(parse_option("provider", key, value)?),
                "requestTimeout" => {
                    let millis: u64 = parse_option("provider", key, value)?;
                    config.with_request_timeout((millis > 0).then(|| Duration::from_millis(millis)))
                }
                other => {
                    tracing::debug!(option = other, "ignoring unknown provider option");
                    config
                }
            };
        }
        if let Some(value) = address.option("amqp.maxFrameSize") {
            config = config.with_max_frame_size(parse_option("amqp", "maxFrameSize", value)?);
        }
        Ok(config)
    }

    /// Log every performative sent or received.
    #[must_use]
    pub fn with_trace_frames(mut self, enabled: bool) -> Self {
        self.trace_frames = enabled;
        self
    }

    /// Log the size and a hex preview of every chunk moved through the pump.
    #[must_use]
    pub fn with_trace_bytes(mut self, enabled: bool) -> Self {
        self.trace_bytes = enabled;
        self
    }

    /// Fail create requests that the peer does not answer in time.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Largest frame body the engine accepts or produces.
    #[must_use]
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Whether frame tracing is on.
    #[must_use]
    pub fn trace_frames(&self) -> bool { self.trace_frames }

    /// Whether byte tracing is on.
    #[must_use]
    pub fn trace_bytes(&self) -> bool { self.trace_bytes }

    /// Create-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> { self.request_timeout }

    /// Engine configuration derived from this provider configuration.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_frame_size: self.max_frame_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_options_are_read_from_the_address() {
        let address = RemoteAddress::parse(
            "amqp://h?provider.traceFrames=true&provider.requestTimeout=250&amqp.maxFrameSize=4096",
        )
        .expect("address");
        let config = ProviderConfig::from_address(&address).expect("config");
        assert!(config.trace_frames());
        assert!(!config.trace_bytes());
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.engine_config().max_frame_size, 4096);
    }

    #[test]
    fn zero_request_timeout_disables_it() {
        let address = RemoteAddress::parse("amqp://h?provider.requestTimeout=0").expect("address");
        let config = ProviderConfig::from_address(&address).expect("config");
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn bad_trace_flag_is_rejected() {
        let address = RemoteAddress::parse("amqp://h?provider.traceBytes=yes").expect("address");
        assert!(matches!(
            ProviderConfig::from_address(&address),
            Err(AddressError::InvalidOption { .. })
        ));
    }
}
