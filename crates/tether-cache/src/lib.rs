//! Content-addressed RPC result caching primitives.
//!
//! This crate provides:
//! - [`RpcCacheKey`]: call identity (service + method + serialized
//!   arguments) with a precomputed hash; equality is always byte-exact.
//! - [`RpcCacheValue`]: response bytes plus a short content hash, so a
//!   server can confirm "unchanged" by hash instead of resending data.
//! - [`RpcCacheEntry`]: a key/value pair as stored by an external cache.
//! - [`RpcCacheInfoCapture`]: per-call box that pipeline stages race to fill
//!   with the key and the first value, error, or cancellation.
//!
//! The cache store itself lives outside this crate.

mod capture;
mod error;
mod key;
mod value;

pub use capture::{CaptureMode, RpcCacheInfoCapture};
pub use error::{CacheError, CallError};
pub use key::{DataFormat, RpcCacheKey, TextOrBytes};
pub use value::{RpcCacheEntry, RpcCacheValue, content_hash};
