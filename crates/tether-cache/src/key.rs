//! Call identity keys.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::Bytes;
use tether_types::{djb2, stable_hash};

/// How serialized argument data is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    /// Binary serializer output.
    Bytes,
    /// UTF-8 text serializer output.
    Text,
}

/// Serialized call arguments, tagged with their encoding.
///
/// Equality is format plus byte-exact data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextOrBytes {
    format: DataFormat,
    data: Bytes,
}

impl TextOrBytes {
    /// Wrap UTF-8 text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            format: DataFormat::Text,
            data: Bytes::from(text.into()),
        }
    }

    /// Wrap binary data.
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self {
            format: DataFormat::Bytes,
            data: data.into(),
        }
    }

    /// Encoding of the data.
    pub fn format(&self) -> DataFormat {
        self.format
    }

    /// Raw bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The data as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self.format {
            DataFormat::Text => std::str::from_utf8(&self.data).ok(),
            DataFormat::Bytes => None,
        }
    }

    /// Whether there is no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Stable hash of the raw bytes.
    pub fn data_hash(&self) -> i32 {
        stable_hash(&self.data)
    }
}

/// Identity of one cached call: service, method, and serialized arguments.
///
/// The combined hash is computed once at construction. It only accelerates
/// lookups: two keys are equal only if service, method, and argument bytes
/// all match exactly, so hash collisions never produce a false hit.
#[derive(Clone)]
pub struct RpcCacheKey {
    service: Arc<str>,
    method: Arc<str>,
    argument_data: TextOrBytes,
    hash_code: i32,
}

impl RpcCacheKey {
    /// Create a key, computing its hash.
    pub fn new(
        service: impl Into<Arc<str>>,
        method: impl Into<Arc<str>>,
        argument_data: TextOrBytes,
    ) -> Self {
        let service = service.into();
        let method = method.into();
        let hash_code = djb2(service.as_bytes())
            .wrapping_add(djb2(method.as_bytes()).wrapping_mul(397))
            .wrapping_add(argument_data.data_hash());
        Self {
            service,
            method,
            argument_data,
            hash_code,
        }
    }

    /// Service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Serialized arguments.
    pub fn argument_data(&self) -> &TextOrBytes {
        &self.argument_data
    }

    /// Precomputed hash. Callers also use it as the routing hash when picking a shard or ring node.
    pub fn hash_code(&self) -> i32 {
        self.hash_code
    }
}

impl PartialEq for RpcCacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash_code == other.hash_code
            && self.method == other.method
            && self.service == other.service
            && self.argument_data == other.argument_data
    }
}

impl Eq for RpcCacheKey {}

impl Hash for RpcCacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(self.hash_code);
    }
}

impl fmt::Debug for RpcCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RpcCacheKey({}.{}, {} bytes, {:08x})",
            self.service,
            self.method,
            self.argument_data.data.len(),
            self.hash_code
        )
    }
}

impl fmt::Display for RpcCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}#{:08x}", self.service, self.method, self.hash_code)
    }
}
