//! Clocks the reprocessor waits on between attempts.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ReprocessError;

/// Waits out a retry delay.
#[async_trait::async_trait]
pub trait DelayClock: Send + Sync {
    /// Sleep for `duration`, returning [`ReprocessError::Cancelled`] as soon
    /// as `cancel` fires.
    async fn delay(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ReprocessError>;
}

/// Wall-clock delays on the tokio timer. Honors `tokio::time::pause`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait::async_trait]
impl DelayClock for TokioClock {
    async fn delay(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ReprocessError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReprocessError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
