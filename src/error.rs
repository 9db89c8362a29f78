//! Canonical error type for provider operations.
//!
//! Every future returned by a provider resolves to `Result<T, ProviderError>`.
//! One transport failure is fanned out to every pending request, so the error
//! is `Clone` and shares non-cloneable sources behind an [`Arc`].

use std::{io, sync::Arc, time::Duration};

use bincode::error::EncodeError;
use thiserror::Error;

use crate::{
    address::AddressError,
    engine::{DeliveryState, EngineError, ErrorCondition},
    id::ResourceId,
};

/// Errors surfaced through provider futures and listener upcalls.
#[derive(Clone, Debug, Error)]
pub enum ProviderError {
    /// The transport could not reach the remote peer.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// Target address as given by the caller.
        address: String,
        /// Underlying I/O failure.
        #[source]
        source: Arc<io::Error>,
    },
    /// The transport failed after the connection was established.
    #[error("transport error: {0}")]
    Transport(#[source] Arc<io::Error>),
    /// The protocol engine rejected input or an operation.
    #[error("protocol error: {0}")]
    Protocol(#[from] EngineError),
    /// The remote peer closed a resource.
    #[error("{resource} closed by remote peer{}", describe(.condition.as_ref()))]
    RemoteClosed {
        /// Resource that was closed.
        resource: ResourceId,
        /// Error condition sent by the peer, if any.
        condition: Option<ErrorCondition>,
    },
    /// The remote peer refused a request without closing anything.
    #[error("request refused by remote peer: {0}")]
    Remote(ErrorCondition),
    /// The provider has been closed or has failed.
    #[error("provider is closed")]
    Closed,
    /// The provider does not implement the operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    /// The operation is not valid in the current state.
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// No resource with the given id is known to the provider.
    #[error("unknown resource: {0}")]
    UnknownResource(ResourceId),
    /// The resource the operation depended on was destroyed.
    #[error("resource closed: {0}")]
    ResourceClosed(ResourceId),
    /// The peer settled a sent message with a non-accepted outcome.
    #[error("delivery not accepted: {0:?}")]
    DeliveryRejected(DeliveryState),
    /// No answer arrived within the configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// A message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[source] Arc<EncodeError>),
    /// The target address is malformed.
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),
}

fn describe(condition: Option<&ErrorCondition>) -> String {
    condition.map_or_else(String::new, |c| format!(": {c}"))
}

impl ProviderError {
    /// Wrap an I/O failure observed on an established transport.
    #[must_use]
    pub fn transport(error: io::Error) -> Self { Self::Transport(Arc::new(error)) }
}

impl From<EncodeError> for ProviderError {
    fn from(error: EncodeError) -> Self { Self::Encode(Arc::new(error)) }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::id::ConnectionId;

    #[test]
    fn transport_cause_is_shared_between_clones() {
        let error = ProviderError::transport(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        let copy = error.clone();
        match (&error, &copy) {
            (ProviderError::Transport(a), ProviderError::Transport(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected transport errors"),
        }
    }

    #[test]
    fn remote_close_mentions_condition() {
        let resource = ResourceId::from(ConnectionId::new("c").expect("id"));
        let error = ProviderError::RemoteClosed {
            resource,
            condition: Some(ErrorCondition::new("amqp:not-found", "no such queue")),
        };
        assert_eq!(
            error.to_string(),
            "c closed by remote peer: amqp:not-found: no such queue"
        );
    }
}
