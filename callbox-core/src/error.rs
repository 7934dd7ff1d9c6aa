//! Error types for orchestrated calls.
//!
//! Every error here is [`Clone`]: one failure of a shared operation is
//! delivered to every caller attached to it.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Failure reported by the transport for a single invocation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("upstream responded with status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Decoded response body, if any.
        body: Option<Value>,
    },

    /// The call never produced a response.
    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Creates a [`TransportError::Network`] from any displayable error.
    pub fn network(error: impl std::fmt::Display) -> Self {
        TransportError::Network(error.to_string())
    }

    /// Returns the HTTP status if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            TransportError::Network(_) => None,
        }
    }
}

/// Malformed call options, rejected before any network attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The endpoint is empty.
    #[error("endpoint must not be empty")]
    EmptyEndpoint,
    /// A queue was requested with a concurrency of zero.
    #[error("queue concurrency must be at least 1")]
    ZeroConcurrency,
    /// A batch was requested with a size of zero.
    #[error("batch size must be at least 1")]
    ZeroBatchSize,
}

/// Error surfaced to the caller of an orchestrated call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The invocation did not settle within the configured timeout.
    #[error("call did not settle within {0:?}")]
    Timeout(Duration),

    /// Every permitted attempt failed; carries the last failure.
    #[error("giving up after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Total number of invocations, the original one included.
        attempts: u32,
        /// Failure of the final attempt.
        last: Box<CallError>,
    },

    /// The call options were rejected.
    #[error("invalid call options: {0}")]
    Validation(#[from] ValidationError),

    /// The batch selector failed for this item.
    #[error("batch selector failed: {0}")]
    Selector(String),

    /// The batch flush carrying this item was dropped before delivering.
    #[error("batched call was abandoned before its flush completed")]
    Abandoned,
}

impl CallError {
    /// Whether this is a timeout, directly or as the last retry failure.
    pub fn is_timeout(&self) -> bool {
        match self {
            CallError::Timeout(_) => true,
            CallError::RetryExhausted { last, .. } => last.is_timeout(),
            _ => false,
        }
    }

    /// Returns the underlying transport failure, looking through retry exhaustion.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            CallError::Transport(error) => Some(error),
            CallError::RetryExhausted { last, .. } => last.transport_error(),
            _ => None,
        }
    }
}
