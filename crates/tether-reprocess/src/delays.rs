//! Retry delay sequences.

use std::time::Duration;

use rand::Rng;

use crate::error::ReprocessError;

/// Delay to wait before each retry, indexed by retry number.
///
/// Index 0 (nothing retried yet) is always zero, so super-transient retries,
/// which never advance the index, run immediately.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDelays {
    /// The same delay before every retry.
    Fixed(Duration),
    /// `min * multiplier^(n - 1)` clamped to `[min, max]`, with `±spread`
    /// relative jitter.
    Exponential {
        min: Duration,
        max: Duration,
        spread: f64,
        multiplier: f64,
    },
}

impl RetryDelays {
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed(delay)
    }

    /// Exponential delays growing by `√2` per retry.
    ///
    /// Requires `min <= max` and `spread` in `[0, 1]`.
    pub fn exponential(min: Duration, max: Duration, spread: f64) -> Result<Self, ReprocessError> {
        if min > max {
            return Err(ReprocessError::InvalidArgument {
                name: "min",
                reason: format!("{min:?} exceeds max {max:?}"),
            });
        }
        if !(0.0..=1.0).contains(&spread) {
            return Err(ReprocessError::InvalidArgument {
                name: "spread",
                reason: format!("{spread} is outside [0, 1]"),
            });
        }
        Ok(Self::Exponential {
            min,
            max,
            spread,
            multiplier: std::f64::consts::SQRT_2,
        })
    }

    /// Delay before retry `try_index`, without jitter.
    pub fn base_delay(&self, try_index: u32) -> Duration {
        if try_index == 0 {
            return Duration::ZERO;
        }
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential {
                min,
                max,
                multiplier,
                ..
            } => {
                let exponent = i32::try_from(try_index - 1).unwrap_or(i32::MAX);
                let secs = min.as_secs_f64() * multiplier.powi(exponent);
                // min/max rather than clamp: a hand-built variant may have min > max.
                Duration::from_secs_f64(secs.min(max.as_secs_f64()).max(min.as_secs_f64()))
            }
        }
    }

    /// Delay before retry `try_index`, with jitter applied.
    pub fn delay(&self, try_index: u32) -> Duration {
        let base = self.base_delay(try_index);
        match *self {
            Self::Exponential { spread, .. }
                if spread > 0.0 && spread.is_finite() && !base.is_zero() =>
            {
                let jitter = rand::rng().random_range(-spread..=spread);
                Duration::from_secs_f64((base.as_secs_f64() * (1.0 + jitter)).max(0.0))
            }
            _ => base,
        }
    }
}

impl Default for RetryDelays {
    fn default() -> Self {
        Self::Exponential {
            min: Duration::from_millis(500),
            max: Duration::from_secs(3),
            spread: 0.33,
            multiplier: std::f64::consts::SQRT_2,
        }
    }
}
