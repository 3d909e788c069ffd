//! Operation trait and error classification for remote calls.

use async_trait::async_trait;
use thiserror::Error;

/// Error returned by a remote operation.
#[derive(Error, Debug)]
pub enum CallError {
    /// Transient failure - worth retrying.
    #[error("retryable: {0}")]
    Retryable(#[source] anyhow::Error),

    /// Permanent failure - won't succeed on retry.
    #[error("permanent: {0}")]
    Permanent(#[source] anyhow::Error),
}

impl CallError {
    /// Create a retryable error.
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        Self::Retryable(err.into())
    }

    /// Create a permanent error.
    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        Self::Permanent(err.into())
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Classify an HTTP status code from a remote service.
    ///
    /// Timeouts (408), throttling (429) and server errors (5xx) are
    /// retryable; auth failures, validation errors and missing resources
    /// (remaining 4xx) are permanent.
    pub fn from_http_status(status: u16, err: impl Into<anyhow::Error>) -> Self {
        match status {
            408 | 429 => Self::Retryable(err.into()),
            500..=599 => Self::Retryable(err.into()),
            400..=499 => Self::Permanent(err.into()),
            _ => Self::Permanent(err.into()),
        }
    }

    /// Classify a transport-level I/O error kind.
    pub fn from_io_kind(kind: std::io::ErrorKind, err: impl Into<anyhow::Error>) -> Self {
        use std::io::ErrorKind::*;
        match kind {
            TimedOut | WouldBlock | Interrupted | ConnectionReset | ConnectionAborted
            | BrokenPipe => Self::Retryable(err.into()),
            NotFound | PermissionDenied | InvalidData | InvalidInput | Unsupported => {
                Self::Permanent(err.into())
            }
            _ => Self::Retryable(err.into()),
        }
    }

    pub(crate) fn into_source(self) -> anyhow::Error {
        match self {
            Self::Retryable(e) | Self::Permanent(e) => e,
        }
    }
}

/// A single remote call against one external dependency.
///
/// Implementations wrap the actual API client (a transcription service, an
/// AI provider, ...). Inputs and outputs are JSON values so operations can
/// be registered by name and dispatched at runtime.
#[async_trait]
pub trait Operation: Send + Sync {
    /// The name this operation is registered and referenced under.
    fn name(&self) -> &'static str;

    /// Perform the call with the given input.
    async fn call(&self, input: serde_json::Value) -> Result<serde_json::Value, CallError>;
}
