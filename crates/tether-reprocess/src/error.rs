//! Error types for reprocessing.

use crate::command::CommandError;

/// Errors returned by [`OperationReprocessor`](crate::OperationReprocessor).
#[derive(Debug, thiserror::Error)]
pub enum ReprocessError {
    /// The command failed and was not (or no longer) retried.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The reprocessor was already bound to a command execution.
    #[error("reprocessor cannot be used more than once in the same command execution pipeline")]
    AlreadyBound,

    /// Cancellation was requested while waiting to retry.
    #[error("reprocessing cancelled")]
    Cancelled,

    /// An argument was outside its allowed range.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        /// Parameter name.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

impl ReprocessError {
    /// The command failure, if this is one.
    pub fn command_error(&self) -> Option<&CommandError> {
        match self {
            Self::Command(error) => Some(error),
            _ => None,
        }
    }
}
