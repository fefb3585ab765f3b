//! Cached call results.

use std::fmt;

use bytes::Bytes;

use crate::key::RpcCacheKey;

/// Number of BLAKE3 output bytes kept in a content hash.
const CONTENT_HASH_BYTES: usize = 12;

/// Hash marker for a value that carries no data and asks the callee to
/// reply with just the hash when its result is unchanged.
const REQUEST_HASH: &str = "@";

/// Short content hash: hex of the first 12 bytes of `blake3(data)`.
pub fn content_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    hash.as_bytes()[..CONTENT_HASH_BYTES]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Response bytes of one call, plus an optional content hash.
///
/// An empty `hash` means none was computed.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct RpcCacheValue {
    data: Bytes,
    hash: String,
}

impl RpcCacheValue {
    /// A value with an explicit hash; pass `""` for none.
    pub fn new(data: impl Into<Bytes>, hash: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            hash: hash.into(),
        }
    }

    /// Wrap response bytes and compute their content hash.
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let hash = content_hash(&data);
        Self { data, hash }
    }

    /// Placeholder sent in place of a cached value: no data, hash `"@"`.
    pub fn request_hash() -> Self {
        Self::new(Bytes::new(), REQUEST_HASH)
    }

    /// Whether this is the [`Self::request_hash`] placeholder.
    pub fn is_hash_request(&self) -> bool {
        self.hash == REQUEST_HASH
    }

    /// Response bytes; empty for hash-only answers.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Content hash, or `""` if none was computed.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Whether a content hash is present.
    pub fn has_hash(&self) -> bool {
        !self.hash.is_empty()
    }

    /// Whether two values denote the same content.
    ///
    /// Matching non-empty hashes are enough; otherwise the raw bytes must be
    /// identical. This lets a callee answer with a hash alone when the caller
    /// already holds the bytes.
    pub fn hash_or_data_equals(&self, other: &Self) -> bool {
        (self.has_hash() && self.hash == other.hash) || self.data == other.data
    }
}

impl fmt::Debug for RpcCacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RpcCacheValue({} bytes, hash {:?})", self.data.len(), self.hash)
    }
}

/// A key and its cached value, as held by an external result cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCacheEntry {
    pub key: RpcCacheKey,
    pub value: RpcCacheValue,
}

impl RpcCacheEntry {
    pub fn new(key: RpcCacheKey, value: RpcCacheValue) -> Self {
        Self { key, value }
    }
}
