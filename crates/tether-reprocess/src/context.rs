//! The command execution context seen by the reprocessor.

use tokio_util::sync::CancellationToken;

use crate::command::CommandError;

/// Where an operation's record lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationScope {
    /// Persisted; a retry can be reconciled against the stored record.
    Durable,
    /// In-memory only.
    Transient,
}

/// The operation a command execution opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub id: u64,
    pub scope: OperationScope,
}

impl Operation {
    pub fn durable(id: u64) -> Self {
        Self {
            id,
            scope: OperationScope::Durable,
        }
    }

    pub fn transient(id: u64) -> Self {
        Self {
            id,
            scope: OperationScope::Transient,
        }
    }

    pub fn is_durable(&self) -> bool {
        self.scope == OperationScope::Durable
    }
}

/// One command execution, as exposed to pipeline filters.
///
/// The context is passed explicitly to every reprocessor call. `Items` and
/// `ExecutionState` are snapshots: the reprocessor takes them before the first
/// attempt and hands them back before every retry.
#[async_trait::async_trait]
pub trait CommandContext: Send {
    /// Snapshot of the context's item bag.
    type Items: Clone + Send + Sync;
    /// Snapshot of the remaining execution state (handler position and the like).
    type ExecutionState: Clone + Send + Sync;

    /// Whether this execution is not nested inside another command.
    fn is_outermost(&self) -> bool;

    /// Whether an invalidation pass is running on this context.
    fn is_invalidating(&self) -> bool {
        false
    }

    fn items(&self) -> Self::Items;

    fn restore_items(&mut self, items: Self::Items);

    fn execution_state(&self) -> Self::ExecutionState;

    fn restore_execution_state(&mut self, state: Self::ExecutionState);

    /// The operation bound by the handler chain, if one was opened.
    fn operation(&self) -> Option<&Operation>;

    /// Run the handlers after the current filter.
    async fn invoke_remaining_handlers(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError>;
}
