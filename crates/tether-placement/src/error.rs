//! Error types for placement.

/// Errors that can occur while configuring placement.
///
/// Routing itself never fails; only builder preconditions are checked.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// A builder parameter is out of range.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        /// Name of the offending parameter.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}
