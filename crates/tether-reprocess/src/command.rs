//! Commands and command failures.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// A command dispatched through the command pipeline.
pub trait Command: fmt::Debug + Send + Sync {
    /// Infrastructure commands are never reprocessed.
    fn is_system(&self) -> bool {
        false
    }

    /// Commands that only dispatch other commands. The default filter skips
    /// them so that the inner commands get reprocessed instead.
    fn is_delegating(&self) -> bool {
        false
    }
}

/// Marker error for a cancelled command.
#[derive(Debug, Clone, Copy, Default, thiserror::Error)]
#[error("command cancelled")]
pub struct Cancelled;

/// A shared, cheaply clonable command failure.
///
/// Clones refer to the same error instance. Identity, not message equality,
/// is what the reprocessor keys cached classifications on; use
/// [`CommandError::ptr_eq`] to compare instances.
#[derive(Clone)]
pub struct CommandError(Arc<dyn Error + Send + Sync>);

impl CommandError {
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// Wrap an already shared error without changing its identity.
    pub fn from_arc(error: Arc<dyn Error + Send + Sync>) -> Self {
        Self(error)
    }

    /// A [`Cancelled`] failure.
    pub fn cancelled() -> Self {
        Self::new(Cancelled)
    }

    /// Whether [`Cancelled`] appears anywhere in the source chain.
    pub fn is_cancellation(&self) -> bool {
        self.chain().any(|error| error.is::<Cancelled>())
    }

    /// Whether this is a cancellation caused by `token` firing.
    pub fn is_cancellation_of(&self, token: &CancellationToken) -> bool {
        token.is_cancelled() && self.is_cancellation()
    }

    /// Whether both refer to the same error instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// The error followed by its transitive sources.
    pub fn chain(&self) -> impl Iterator<Item = &(dyn Error + 'static)> {
        let top: &(dyn Error + 'static) = &*self.0;
        std::iter::successors(Some(top), |&error| error.source())
    }

    pub fn as_arc(&self) -> &Arc<dyn Error + Send + Sync> {
        &self.0
    }
}

impl fmt::Debug for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}
