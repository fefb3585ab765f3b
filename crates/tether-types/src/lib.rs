//! Shared hashing primitives and configuration types for Tether.
//!
//! Every peer in the mesh must agree on routing and cache identities without
//! talking to each other, so the hashes defined here are stable across
//! processes and builds:
//!
//! - [`djb2`]: cheap string hash used for service and method names.
//! - [`stable_hash`] and [`stable_str_hash`]: BLAKE3 truncated to 32 bits.
//! - [`node_hash`]: the per-node deterministic hash sequence used by shard
//!   map builders: `stable_hash("{node}-{i:08x}")`.
//!
//! Configuration ([`PlacementConfig`], [`ReprocessConfig`]) is deserialized
//! from TOML by the CLI and converted into builders and settings by the
//! library crates.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// DJB2 hash (`h * 33 + byte`, seeded with 5381), wrapping on overflow.
pub fn djb2(data: &[u8]) -> i32 {
    data.iter().fold(5381i32, |h, &b| {
        (h << 5).wrapping_add(h).wrapping_add(i32::from(b))
    })
}

/// Process-independent 32-bit hash: the first 4 bytes of `blake3(data)`, little-endian.
pub fn stable_hash(data: &[u8]) -> i32 {
    let hash = blake3::hash(data);
    let bytes = hash.as_bytes();
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// [`stable_hash`] of a string's UTF-8 bytes.
pub fn stable_str_hash(s: &str) -> i32 {
    stable_hash(s.as_bytes())
}

/// The `index`-th element of `node`'s hash sequence, as an unsigned weight.
///
/// Computed as `stable_hash("{node}-{index:08x}")`. Two processes that agree
/// on a node's identity string agree on its whole sequence.
pub fn node_hash(node: &str, index: u32) -> u32 {
    stable_str_hash(&format!("{node}-{index:08x}")) as u32
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which shard map builder to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderKind {
    /// Perfectly balanced, but reshuffles freely on membership change.
    Greedy,
    /// Highest-random-weight assignment with bounded imbalance.
    #[default]
    Rendezvous,
}

/// Shard placement parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Number of logical shards.
    pub shard_count: u32,
    /// Builder used to assign shards to nodes.
    pub builder: BuilderKind,
    /// Maximum tolerated `max - min` shards per node (rendezvous only).
    pub max_imbalance: u32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            shard_count: 12,
            builder: BuilderKind::Rendezvous,
            max_imbalance: 1,
        }
    }
}

/// Role of the current process in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    /// Hosts services and owns durable operations.
    #[default]
    Server,
    /// Calls into servers; never reprocesses commands itself.
    Client,
}

/// Command reprocessing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReprocessConfig {
    /// Retries allowed for ordinary transient errors (super-transient retries are not counted).
    pub max_retry_count: u32,
    /// Delay before the first retry, in milliseconds.
    pub retry_delay_min_ms: u64,
    /// Upper bound for the exponential retry delay, in milliseconds.
    pub retry_delay_max_ms: u64,
    /// Relative jitter applied to each delay (0.33 = ±33%).
    pub retry_delay_spread: f64,
    /// Role of this process.
    pub role: ProcessRole,
}

impl Default for ReprocessConfig {
    fn default() -> Self {
        Self {
            max_retry_count: 3,
            retry_delay_min_ms: 500,
            retry_delay_max_ms: 3_000,
            retry_delay_spread: 0.33,
            role: ProcessRole::Server,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
