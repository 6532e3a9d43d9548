//! Error types for the REST client.
//!
//! # Design
//! The send pipeline never hands back an `Err`: every failure is captured in
//! the `Response` next to a status code, so call sites inspect one value.
//! `RestError` is what ends up in `Response::error`. Only `Response::map_to`
//! and the template helpers return `Result` directly.

use std::sync::Arc;

use thiserror::Error;

/// Failure captured by a `Response`, or returned by `Response::map_to`.
#[derive(Debug, Error)]
pub enum RestError {
    /// The request body could not be serialized to JSON. No network call
    /// was made.
    #[error("failed to encode request body")]
    Encode(#[source] serde_json::Error),

    /// A header, header value or URL given to the builder was rejected.
    #[error("invalid request")]
    InvalidRequest(#[source] ureq::http::Error),

    /// The transport failed before a complete response arrived.
    #[error("error on url: {url}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    /// The response arrived but its body could not be read.
    #[error("error reading response body")]
    ReadBody(#[source] std::io::Error),

    /// An error registered on a mock, returned as-is.
    #[error(transparent)]
    Injected(Arc<dyn std::error::Error + Send + Sync>),

    /// A mocked call had no registered response.
    #[error("no mock registered for {method} {url}")]
    MockNotRegistered { method: String, url: String },

    /// `map_to` was called on a response without a body.
    #[error("response body is nil")]
    EmptyBody,

    /// `map_to` could not decode the body into the requested type.
    #[error("failed to decode response body")]
    Decode(#[source] serde_json::Error),
}

impl RestError {
    /// The transport failure behind this error, if there is one.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            RestError::Transport { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Why the network round-trip did not produce a response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] ureq::Error),

    /// The context deadline passed before the request was dispatched.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The context was cancelled before or during the call.
    #[error("request cancelled")]
    Cancelled,

    #[error("failed to start transport worker")]
    Spawn(#[source] std::io::Error),

    #[error("transport worker exited without a result")]
    WorkerLost,
}

impl TransportError {
    /// Status code reported by the server before the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http(ureq::Error::StatusCode(code)) => Some(*code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::DeadlineExceeded | TransportError::Http(ureq::Error::Timeout(_))
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

/// Errors from `template::replace_tags`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// A `{path}` tag has no value at that path in the payload.
    #[error("tag not found: {tag}")]
    TagNotFound { tag: String },
}
