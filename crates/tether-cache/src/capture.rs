//! Per-call capture of cache key and outcome.

use std::error::Error;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{CacheError, CallError};
use crate::key::RpcCacheKey;
use crate::value::{RpcCacheEntry, RpcCacheValue};

/// What a capture records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Record nothing. Rejected by [`RpcCacheInfoCapture::new`].
    None,
    /// Record only the call's key; value and error writes are ignored.
    KeyOnly,
    /// Record the key and the first value, error, or cancellation.
    #[default]
    KeyAndData,
}

/// Write-once slots filled by the outbound call pipeline.
///
/// Several pipeline stages may race to record the outcome of one call (a
/// local short-circuit against the network reply, say). Each slot keeps the
/// first write and ignores the rest.
#[derive(Debug)]
pub struct RpcCacheInfoCapture {
    mode: CaptureMode,
    cache_entry: Option<RpcCacheEntry>,
    state: Mutex<CaptureState>,
}

#[derive(Debug, Default)]
struct CaptureState {
    key: Option<RpcCacheKey>,
    value_or_error: Option<Result<RpcCacheValue, CallError>>,
}

impl RpcCacheInfoCapture {
    /// Create an empty capture.
    pub fn new(mode: CaptureMode) -> Result<Self, CacheError> {
        if mode == CaptureMode::None {
            return Err(CacheError::InvalidCaptureMode);
        }
        Ok(Self {
            mode,
            cache_entry: None,
            state: Mutex::new(CaptureState::default()),
        })
    }

    /// Create a capture for a call that revalidates `entry`.
    pub fn with_cache_entry(mode: CaptureMode, entry: RpcCacheEntry) -> Result<Self, CacheError> {
        let mut capture = Self::new(mode)?;
        capture.cache_entry = Some(entry);
        Ok(capture)
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// The entry being revalidated, if any.
    pub fn cache_entry(&self) -> Option<&RpcCacheEntry> {
        self.cache_entry.as_ref()
    }

    /// Whether only the key is wanted. Call routing uses this to skip the
    /// actual send.
    pub fn is_key_only(&self) -> bool {
        self.mode == CaptureMode::KeyOnly
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Record the call's key. Returns `false` if a key was already recorded.
    pub fn capture_key(&self, key: RpcCacheKey) -> bool {
        let mut state = self.state.lock().expect("capture lock poisoned");
        if state.key.is_some() {
            trace!(%key, "key already captured");
            return false;
        }
        state.key = Some(key);
        true
    }

    /// Record a successful result.
    pub fn capture_value(&self, value: RpcCacheValue) -> bool {
        self.capture_outcome(Ok(value))
    }

    /// Record a failure.
    pub fn capture_error(&self, error: Arc<dyn Error + Send + Sync>) -> bool {
        self.capture_outcome(Err(CallError::Failed(error)))
    }

    /// Record that the call was cancelled through `token`.
    pub fn capture_cancellation(&self, token: &CancellationToken) -> bool {
        self.capture_outcome(Err(CallError::Cancelled(token.clone())))
    }

    fn capture_outcome(&self, outcome: Result<RpcCacheValue, CallError>) -> bool {
        if self.mode != CaptureMode::KeyAndData {
            return false;
        }
        let mut state = self.state.lock().expect("capture lock poisoned");
        if state.value_or_error.is_some() {
            trace!(?outcome, "outcome already captured");
            return false;
        }
        state.value_or_error = Some(outcome);
        true
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn key(&self) -> Option<RpcCacheKey> {
        self.state.lock().expect("capture lock poisoned").key.clone()
    }

    pub fn value_or_error(&self) -> Option<Result<RpcCacheValue, CallError>> {
        self.state
            .lock()
            .expect("capture lock poisoned")
            .value_or_error
            .clone()
    }

    pub fn has_key_and_value(&self) -> bool {
        let state = self.state.lock().expect("capture lock poisoned");
        state.key.is_some() && state.value_or_error.is_some()
    }

    /// The key and outcome, once both are recorded.
    ///
    /// Failing here means the pipeline read the capture before the call
    /// settled.
    pub fn require_key_and_value(
        &self,
    ) -> Result<(RpcCacheKey, Result<RpcCacheValue, CallError>), CacheError> {
        let state = self.state.lock().expect("capture lock poisoned");
        match (&state.key, &state.value_or_error) {
            (Some(key), Some(outcome)) => Ok((key.clone(), outcome.clone())),
            (None, _) => Err(CacheError::Invariant("cache key was not captured".into())),
            (Some(_), None) => Err(CacheError::Invariant(
                "cache value or error was not captured".into(),
            )),
        }
    }

    /// Whether the captured value matches the entry being revalidated.
    pub fn is_unchanged(&self) -> bool {
        let Some(entry) = &self.cache_entry else {
            return false;
        };
        let state = self.state.lock().expect("capture lock poisoned");
        match &state.value_or_error {
            Some(Ok(value)) => entry.value.hash_or_data_equals(value),
            _ => false,
        }
    }
}
