//! Consistent-hash routing for the Tether mesh.
//!
//! This crate maps calls onto interchangeable backend replicas:
//!
//! - [`HashRing`]: immutable sorted ring answering "which node owns this
//!   hash", with wraparound for the Nth-next replica and contiguous spans.
//! - [`ShardMapBuilder`]: pure shard → node assignment. Two variants:
//!   [`GreedyShardMapBuilder`] (perfect balance) and
//!   [`RendezvousShardMapBuilder`] (highest-random-weight with bounded
//!   imbalance, near-minimal reassignment on membership change).
//! - [`ShardMap`]: owns a node list plus the assignment for a fixed shard
//!   count, with failover lookups that walk the node list as a ring.
//!
//! Everything here is built once and never mutated: when membership changes,
//! build a new map and swap it in.

mod builder;
mod error;
mod ring;
mod shard_map;

pub use builder::{
    GreedyShardMapBuilder, NodeHashFn, RendezvousShardMapBuilder, ShardMapBuilder, builder_for,
};
pub use error::PlacementError;
pub use ring::HashRing;
pub use shard_map::{ShardMap, ShardMove};
