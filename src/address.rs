//! Target addresses.
//!
//! A provider is created from a URI such as
//! `amqp://broker:5672?transport.tcpNoDelay=true&provider.traceFrames=true`.
//! Query options are grouped by prefix: `transport.*` configures the socket,
//! `provider.*` the provider itself and `amqp.*` the protocol engine.

use std::{collections::BTreeMap, fmt, str::FromStr};

use thiserror::Error;
use url::Url;

/// Port used when the address does not name one.
pub const DEFAULT_PORT: u16 = 5672;

/// Errors produced while parsing an address or its options.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The string is not a URI.
    #[error("malformed address `{address}`: {reason}")]
    Malformed {
        /// Offending input.
        address: String,
        /// Parser message.
        reason: String,
    },
    /// The URI has no host.
    #[error("address `{0}` has no host")]
    MissingHost(String),
    /// No provider is registered for the scheme.
    #[error("no provider registered for scheme `{0}`")]
    UnknownScheme(String),
    /// An option value could not be parsed.
    #[error("invalid value `{value}` for option `{key}`")]
    InvalidOption {
        /// Option name including its prefix.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Parsed target address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteAddress {
    original: String,
    scheme: String,
    host: String,
    port: u16,
    options: BTreeMap<String, String>,
}

impl RemoteAddress {
    /// Parse `address`.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] if the address is not a URI with a host.
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let url = Url::parse(address).map_err(|e| AddressError::Malformed {
            address: address.to_owned(),
            reason: e.to_string(),
        })?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AddressError::MissingHost(address.to_owned()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();
        let options = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Ok(Self {
            original: address.to_owned(),
            scheme: url.scheme().to_ascii_lowercase(),
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            options,
        })
    }

    /// URI scheme in lower case.
    #[must_use]
    pub fn scheme(&self) -> &str { &self.scheme }

    /// Host name or IP literal.
    #[must_use]
    pub fn host(&self) -> &str { &self.host }

    /// Port, defaulting to [`DEFAULT_PORT`].
    #[must_use]
    pub fn port(&self) -> u16 { self.port }

    /// Raw value of an option.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> { self.options.get(key).map(String::as_str) }

    /// Options under `prefix`, with the prefix and its dot removed.
    pub fn options_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.options.iter().filter_map(move |(k, v)| {
            k.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(|rest| (rest, v.as_str()))
        })
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.original) }
}

impl FromStr for RemoteAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

/// Parse an option value, naming the option in the error.
pub(crate) fn parse_option<T: FromStr>(prefix: &str, key: &str, value: &str) -> Result<T, AddressError> {
    value.parse().map_err(|_| AddressError::InvalidOption {
        key: format!("{prefix}.{key}"),
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn options_are_grouped_by_prefix() {
        let address = RemoteAddress::parse(
            "amqp://broker:5673?transport.tcpNoDelay=true&provider.traceFrames=true&amqp.maxFrameSize=4096",
        )
        .expect("parse");
        assert_eq!(address.scheme(), "amqp");
        assert_eq!(address.host(), "broker");
        assert_eq!(address.port(), 5673);
        let transport: Vec<_> = address.options_with_prefix("transport").collect();
        assert_eq!(transport, [("tcpNoDelay", "true")]);
        assert_eq!(address.option("amqp.maxFrameSize"), Some("4096"));
    }

    #[rstest]
    #[case("amqp://localhost", 5672)]
    #[case("tcp://127.0.0.1:61616", 61616)]
    #[case("amqp://[::1]:5000", 5000)]
    fn ports_default_when_missing(#[case] input: &str, #[case] port: u16) {
        assert_eq!(RemoteAddress::parse(input).expect("parse").port(), port);
    }

    #[test]
    fn ipv6_hosts_lose_brackets() {
        assert_eq!(RemoteAddress::parse("amqp://[::1]:5000").expect("parse").host(), "::1");
    }

    #[rstest]
    #[case("not a uri")]
    #[case("amqp:no-host")]
    fn malformed_addresses_are_rejected(#[case] input: &str) {
        assert!(RemoteAddress::parse(input).is_err());
    }
}
