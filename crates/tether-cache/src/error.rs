//! Error types for cache capture.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Errors raised by misuse of the capture API.
///
/// Neither variant is recoverable: both indicate a bug in how the call
/// pipeline drives the capture.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A capture must record at least the key.
    #[error("capture mode `None` is not allowed")]
    InvalidCaptureMode,

    /// Capture state was read before the pipeline filled it.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

/// The failure outcome of an outbound call, as recorded by a capture.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    /// The call was cancelled through this token.
    #[error("call cancelled")]
    Cancelled(CancellationToken),

    /// The call failed.
    #[error("call failed: {0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),
}

impl CallError {
    /// Whether this records a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
