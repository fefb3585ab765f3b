//! The reprocessing filter.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tether_types::{ProcessRole, ReprocessConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::{DelayClock, TokioClock};
use crate::command::{Command, CommandError};
use crate::context::{CommandContext, Operation};
use crate::delays::RetryDelays;
use crate::error::ReprocessError;
use crate::transiency::{DefaultTransiencyResolver, Transiency, TransiencyResolver};

/// Decides whether a command may be reprocessed at all.
pub type ReprocessFilter = Arc<dyn Fn(&dyn Command, ProcessRole) -> bool + Send + Sync>;

/// Reprocessor tuning.
#[derive(Clone)]
pub struct ReprocessorSettings {
    /// Retries allowed for ordinary transient errors.
    pub max_retry_count: u32,
    pub retry_delays: RetryDelays,
    /// Role of this process, passed to `filter`.
    pub role: ProcessRole,
    pub filter: ReprocessFilter,
}

impl ReprocessorSettings {
    /// Settings from a `[reprocess]` config section.
    ///
    /// Fails when the delay bounds are inverted or the spread is outside `[0, 1]`.
    pub fn from_config(config: &ReprocessConfig) -> Result<Self, ReprocessError> {
        let retry_delays = RetryDelays::exponential(
            Duration::from_millis(config.retry_delay_min_ms),
            Duration::from_millis(config.retry_delay_max_ms),
            config.retry_delay_spread,
        )?;
        Ok(Self {
            max_retry_count: config.max_retry_count,
            retry_delays,
            role: config.role,
            filter: Self::default_filter(),
        })
    }

    /// Reprocess only on servers, and never commands that just delegate.
    pub fn default_filter() -> ReprocessFilter {
        Arc::new(|command: &dyn Command, role: ProcessRole| {
            role == ProcessRole::Server && !command.is_delegating()
        })
    }
}

impl Default for ReprocessorSettings {
    fn default() -> Self {
        let config = ReprocessConfig::default();
        Self {
            max_retry_count: config.max_retry_count,
            retry_delays: RetryDelays::default(),
            role: config.role,
            filter: Self::default_filter(),
        }
    }
}

impl fmt::Debug for ReprocessorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReprocessorSettings")
            .field("max_retry_count", &self.max_retry_count)
            .field("retry_delays", &self.retry_delays)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct AttemptState {
    try_index: u32,
    last_error: Option<CommandError>,
}

/// Retries one top-level command execution on transient failure.
///
/// An instance serves exactly one command execution; binding it a second
/// time fails with [`ReprocessError::AlreadyBound`]. Share it through an
/// `Arc` so handlers further down the chain can call
/// [`mark_transient`](Self::mark_transient) on failures they produce.
pub struct OperationReprocessor {
    settings: ReprocessorSettings,
    resolver: Arc<dyn TransiencyResolver>,
    clock: Arc<dyn DelayClock>,
    bound: AtomicBool,
    attempt: Mutex<AttemptState>,
    /// Classification per error instance, keyed by the address of the error
    /// (or of the source that was classified). The stored `CommandError`
    /// keeps that address alive.
    known_transiencies: Mutex<HashMap<usize, (CommandError, Transiency)>>,
}

impl OperationReprocessor {
    pub fn new(settings: ReprocessorSettings) -> Self {
        Self {
            settings,
            resolver: Arc::new(DefaultTransiencyResolver),
            clock: Arc::new(TokioClock),
            bound: AtomicBool::new(false),
            attempt: Mutex::new(AttemptState::default()),
            known_transiencies: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_resolver(mut self, resolver: impl TransiencyResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_clock(mut self, clock: impl DelayClock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn settings(&self) -> &ReprocessorSettings {
        &self.settings
    }

    /// Retries consumed so far. Super-transient retries are not counted.
    pub fn try_index(&self) -> u32 {
        self.attempt().try_index
    }

    /// The most recent failure, cleared once an attempt succeeds.
    pub fn last_error(&self) -> Option<CommandError> {
        self.attempt().last_error.clone()
    }

    /// Record that `error` should be retried as `transiency`.
    pub fn mark_transient(
        &self,
        error: &CommandError,
        transiency: Transiency,
    ) -> Result<(), ReprocessError> {
        if !transiency.is_transient() {
            return Err(ReprocessError::InvalidArgument {
                name: "transiency",
                reason: format!("{transiency:?} is not a transient classification"),
            });
        }
        let address = error_address(&**error.as_arc());
        self.known().insert(address, (error.clone(), transiency));
        Ok(())
    }

    /// Classify `error`, consulting marked errors first, then the resolver.
    ///
    /// The error and each of its sources are tried in order. The first
    /// transient classification wins and is remembered for that instance.
    pub fn get_transiency(&self, error: &CommandError) -> Transiency {
        {
            let known = self.known();
            for cause in error.chain() {
                if let Some((_, transiency)) = known.get(&error_address(cause)) {
                    return *transiency;
                }
            }
        }

        for cause in error.chain() {
            let transiency = self.resolver.resolve(cause);
            if !transiency.is_transient() {
                continue;
            }
            self.known()
                .insert(error_address(cause), (error.clone(), transiency));
            return transiency;
        }
        Transiency::Unknown
    }

    /// Whether a failure of `context`'s current attempt would be retried.
    pub fn will_retry<C: CommandContext>(&self, error: &CommandError, context: &C) -> bool {
        self.retry_decision(error, context.operation()).is_ok()
    }

    /// Run `context`'s remaining handlers, retrying transient failures.
    ///
    /// Commands that are nested, system-level, already bound to an
    /// operation, running under invalidation, or rejected by the filter run
    /// once with no reprocessing.
    pub async fn on_command<C: CommandContext>(
        &self,
        command: &dyn Command,
        context: &mut C,
        cancel: &CancellationToken,
    ) -> Result<(), ReprocessError> {
        if !self.is_reprocessing_allowed(command, context) {
            return Ok(context.invoke_remaining_handlers(cancel).await?);
        }
        if self.bound.swap(true, Ordering::AcqRel) {
            return Err(ReprocessError::AlreadyBound);
        }

        let items = context.items();
        let execution_state = context.execution_state();
        loop {
            let error = match context.invoke_remaining_handlers(cancel).await {
                Ok(()) => {
                    self.attempt().last_error = None;
                    return Ok(());
                }
                Err(error) => error,
            };
            if error.is_cancellation_of(cancel) {
                return Err(error.into());
            }
            self.attempt().last_error = Some(error.clone());

            let transiency = match self.retry_decision(&error, context.operation()) {
                Ok(transiency) => transiency,
                Err(reason) => {
                    debug!(
                        %error,
                        ?command,
                        try_index = self.try_index(),
                        reason,
                        "not reprocessing"
                    );
                    return Err(error.into());
                }
            };

            let try_index = {
                let mut attempt = self.attempt();
                if !transiency.is_super_transient() {
                    attempt.try_index += 1;
                }
                attempt.try_index
            };
            context.restore_items(items.clone());
            context.restore_execution_state(execution_state.clone());

            let delay = self.settings.retry_delays.delay(try_index);
            warn!(
                try_index,
                max_retry_count = self.settings.max_retry_count,
                delay_ms = delay.as_millis() as u64,
                ?transiency,
                %error,
                ?command,
                "retrying command"
            );
            if cancel.is_cancelled() {
                return Err(ReprocessError::Cancelled);
            }
            self.clock.delay(delay, cancel).await?;
        }
    }

    fn is_reprocessing_allowed<C: CommandContext>(
        &self,
        command: &dyn Command,
        context: &C,
    ) -> bool {
        context.is_outermost()
            && !command.is_system()
            && context.operation().is_none()
            && !context.is_invalidating()
            && (self.settings.filter)(command, self.settings.role)
    }

    /// The transiency to retry with, or why not to retry.
    fn retry_decision(
        &self,
        error: &CommandError,
        operation: Option<&Operation>,
    ) -> Result<Transiency, &'static str> {
        let Some(operation) = operation else {
            return Err("no operation");
        };
        let transiency = self.get_transiency(error);
        if !transiency.is_transient() {
            return Err("non-transient");
        }
        if !transiency.is_super_transient() && self.try_index() >= self.settings.max_retry_count {
            return Err("no more retries");
        }
        if !operation.is_durable() {
            return Err("no durable operation");
        }
        Ok(transiency)
    }

    fn attempt(&self) -> MutexGuard<'_, AttemptState> {
        self.attempt.lock().expect("attempt lock poisoned")
    }

    fn known(&self) -> MutexGuard<'_, HashMap<usize, (CommandError, Transiency)>> {
        self.known_transiencies
            .lock()
            .expect("transiency lock poisoned")
    }
}

impl fmt::Debug for OperationReprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attempt = self.attempt();
        f.debug_struct("OperationReprocessor")
            .field("settings", &self.settings)
            .field("bound", &self.bound.load(Ordering::Acquire))
            .field("try_index", &attempt.try_index)
            .field("last_error", &attempt.last_error)
            .finish_non_exhaustive()
    }
}

fn error_address(error: &(dyn Error + 'static)) -> usize {
    (error as *const dyn Error).cast::<()>() as usize
}
