//! Error transiency classification.

use std::error::Error;

/// How likely an error is to go away on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transiency {
    /// No classifier recognized the error.
    #[default]
    Unknown,
    /// Retrying will fail the same way.
    NonTransient,
    /// Retrying may succeed; counts against the retry budget.
    Transient,
    /// A benign race; retried without counting against the budget.
    SuperTransient,
    /// Must not be retried by anything, at any level.
    Terminal,
}

impl Transiency {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Transient | Self::SuperTransient)
    }

    pub fn is_super_transient(self) -> bool {
        self == Self::SuperTransient
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Terminal
    }
}

/// Classifies a single error (not its sources; callers walk the chain).
pub trait TransiencyResolver: Send + Sync {
    fn resolve(&self, error: &(dyn Error + 'static)) -> Transiency;
}

impl<F> TransiencyResolver for F
where
    F: Fn(&(dyn Error + 'static)) -> Transiency + Send + Sync,
{
    fn resolve(&self, error: &(dyn Error + 'static)) -> Transiency {
        self(error)
    }
}

/// Recognizes [`TransientError`] and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransiencyResolver;

impl TransiencyResolver for DefaultTransiencyResolver {
    fn resolve(&self, error: &(dyn Error + 'static)) -> Transiency {
        error
            .downcast_ref::<TransientError>()
            .map_or(Transiency::Unknown, TransientError::transiency)
    }
}

/// Marks the wrapped error as worth retrying.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct TransientError {
    transiency: Transiency,
    #[source]
    source: Box<dyn Error + Send + Sync>,
}

impl TransientError {
    pub fn transient(source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self {
            transiency: Transiency::Transient,
            source: source.into(),
        }
    }

    pub fn super_transient(source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self {
            transiency: Transiency::SuperTransient,
            source: source.into(),
        }
    }

    pub fn transiency(&self) -> Transiency {
        self.transiency
    }
}
