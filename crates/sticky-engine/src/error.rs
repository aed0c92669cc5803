use core::time::Duration;
use std::path::PathBuf;

use thiserror::Error;

type BoxError = Box<dyn core::error::Error + Send + Sync>;

/// Failures reported by a [`MessagingGateway`](crate::MessagingGateway).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The target message or channel no longer exists.
    #[error("message not found")]
    NotFound,

    /// Network failure, rate limiting or any other retryable fault.
    #[error("gateway request failed: {source}")]
    Transient {
        #[source]
        source: BoxError,
    },

    #[error("gateway call `{op}` timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
}

impl GatewayError {
    pub fn transient(source: impl Into<BoxError>) -> Self {
        Self::Transient {
            source: source.into(),
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding sticky snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("decoding sticky snapshot at {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced to the command layer.
#[derive(Debug, Error)]
pub enum StickyError {
    #[error("posting the sticky message failed: {0}")]
    Send(#[source] GatewayError),

    /// The sticky was removed or reset while it was being posted.
    #[error("the sticky was removed while it was being posted")]
    Removed,
}
