//! Transient-failure reprocessing for Tether commands.
//!
//! An [`OperationReprocessor`] wraps one top-level command execution. When
//! the remaining handler chain fails with an error classified as transient,
//! it restores the command context to its pre-attempt snapshot, waits on a
//! [`DelayClock`], and runs the chain again:
//!
//! - ordinary transient errors are retried at most `max_retry_count` times;
//! - super-transient errors retry without consuming the budget;
//! - everything else propagates unchanged.
//!
//! Retrying is only attempted when the failed attempt bound a durable
//! [`Operation`], since replay relies on the durable record.

pub mod clock;
pub mod command;
pub mod context;
pub mod delays;
pub mod error;
pub mod reprocessor;
pub mod transiency;

pub use clock::{DelayClock, TokioClock};
pub use command::{Cancelled, Command, CommandError};
pub use context::{CommandContext, Operation, OperationScope};
pub use delays::RetryDelays;
pub use error::ReprocessError;
pub use reprocessor::{OperationReprocessor, ReprocessFilter, ReprocessorSettings};
pub use transiency::{DefaultTransiencyResolver, TransientError, Transiency, TransiencyResolver};
