//! Shard → node assignment algorithms.
//!
//! Builders are pure functions of `(shard_count, nodes)`: the same inputs
//! produce the same assignment in every process. Each node contributes a
//! deterministic hash sequence (see [`tether_types::node_hash`]), so the only
//! thing peers must agree on is the node identity strings and their order.

use std::fmt;
use std::sync::Arc;

use tether_types::{BuilderKind, PlacementConfig, node_hash};
use tracing::trace;

use crate::error::PlacementError;

/// `(node, index) -> hash`: the `index`-th element of a node's hash sequence.
pub type NodeHashFn = Arc<dyn Fn(&str, u32) -> u32 + Send + Sync>;

fn default_node_hash() -> NodeHashFn {
    Arc::new(node_hash)
}

/// Assigns each of `shard_count` shards to an index into `nodes`.
///
/// The returned vector has exactly `shard_count` entries. Every entry is
/// `Some` when `nodes` is non-empty; all are `None` otherwise.
pub trait ShardMapBuilder: Send + Sync + fmt::Debug {
    /// Compute the assignment.
    fn build(&self, shard_count: usize, nodes: &[String]) -> Vec<Option<usize>>;
}

/// Build the builder selected by `config`.
pub fn builder_for(config: &PlacementConfig) -> Result<Box<dyn ShardMapBuilder>, PlacementError> {
    Ok(match config.builder {
        BuilderKind::Greedy => Box::new(GreedyShardMapBuilder::default()),
        BuilderKind::Rendezvous => Box::new(RendezvousShardMapBuilder::new(
            config.max_imbalance as usize,
        )?),
    })
}

// ---------------------------------------------------------------------------
// Greedy
// ---------------------------------------------------------------------------

/// Single-pass builder with perfect balance.
///
/// Nodes claim shards in input order. Each claims
/// `ceil(remaining_shards / remaining_nodes)` slots, one per element of its
/// hash sequence, linearly probing from `hash % shard_count` to the next free
/// slot. Per-node counts differ by at most one, but a membership change can
/// move many shards.
#[derive(Clone)]
pub struct GreedyShardMapBuilder {
    node_hash: NodeHashFn,
}

impl Default for GreedyShardMapBuilder {
    fn default() -> Self {
        Self {
            node_hash: default_node_hash(),
        }
    }
}

impl GreedyShardMapBuilder {
    /// Use a custom node hash sequence.
    pub fn with_node_hash(node_hash: NodeHashFn) -> Self {
        Self { node_hash }
    }
}

impl fmt::Debug for GreedyShardMapBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GreedyShardMapBuilder").finish_non_exhaustive()
    }
}

impl ShardMapBuilder for GreedyShardMapBuilder {
    fn build(&self, shard_count: usize, nodes: &[String]) -> Vec<Option<usize>> {
        let mut assignment = vec![None; shard_count];
        if shard_count == 0 || nodes.is_empty() {
            return assignment;
        }

        let mut remaining_shards = shard_count;
        let mut remaining_nodes = nodes.len();
        for (node_index, node) in nodes.iter().enumerate() {
            let claim = remaining_shards.div_ceil(remaining_nodes);
            for i in 0..claim {
                let mut slot = (self.node_hash)(node.as_str(), i as u32) as usize % shard_count;
                while assignment[slot].is_some() {
                    slot = (slot + 1) % shard_count;
                }
                assignment[slot] = Some(node_index);
            }
            remaining_shards -= claim;
            remaining_nodes -= 1;
        }
        assignment
    }
}

// ---------------------------------------------------------------------------
// Rendezvous
// ---------------------------------------------------------------------------

/// Highest-random-weight builder with bounded imbalance.
///
/// Phase 1: shard `s` goes to the node whose `s`-th hash is the highest
/// (compared unsigned; the first node wins ties). Adding or removing a node
/// only changes the winner of shards that node took part in.
///
/// Phase 2: while `max(count) - min(count) > max_imbalance`, move one shard
/// from the most-loaded node to the least-loaded one, picking the shard the
/// least-loaded node has the highest weight for. Ties go to the lowest shard
/// index, so the result depends on node order.
#[derive(Clone)]
pub struct RendezvousShardMapBuilder {
    node_hash: NodeHashFn,
    max_imbalance: usize,
}

impl Default for RendezvousShardMapBuilder {
    fn default() -> Self {
        Self {
            node_hash: default_node_hash(),
            max_imbalance: 1,
        }
    }
}

impl RendezvousShardMapBuilder {
    /// Create a builder tolerating up to `max_imbalance` shards of spread between nodes.
    pub fn new(max_imbalance: usize) -> Result<Self, PlacementError> {
        if max_imbalance < 1 {
            return Err(PlacementError::InvalidArgument {
                name: "max_imbalance",
                reason: format!("must be >= 1, got {max_imbalance}"),
            });
        }
        Ok(Self {
            max_imbalance,
            ..Self::default()
        })
    }

    /// Use a custom node hash sequence.
    pub fn with_node_hash(mut self, node_hash: NodeHashFn) -> Self {
        self.node_hash = node_hash;
        self
    }

    /// Configured imbalance tolerance.
    pub fn max_imbalance(&self) -> usize {
        self.max_imbalance
    }
}

impl fmt::Debug for RendezvousShardMapBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendezvousShardMapBuilder")
            .field("max_imbalance", &self.max_imbalance)
            .finish_non_exhaustive()
    }
}

impl ShardMapBuilder for RendezvousShardMapBuilder {
    fn build(&self, shard_count: usize, nodes: &[String]) -> Vec<Option<usize>> {
        let node_count = nodes.len();
        let mut assignment = vec![None; shard_count];
        if shard_count == 0 || node_count == 0 {
            return assignment;
        }

        // weights[shard * node_count + node]
        let mut weights = Vec::with_capacity(shard_count * node_count);
        for shard in 0..shard_count {
            for node in nodes {
                weights.push((self.node_hash)(node.as_str(), shard as u32));
            }
        }
        let weight = |shard: usize, node: usize| weights[shard * node_count + node];

        let mut counts = vec![0usize; node_count];
        for (shard, owner) in assignment.iter_mut().enumerate() {
            let mut best = 0;
            for node in 1..node_count {
                if weight(shard, node) > weight(shard, best) {
                    best = node;
                }
            }
            *owner = Some(best);
            counts[best] += 1;
        }

        let max_imbalance = self.max_imbalance;

        loop {
            let (max_node, max_count) = first_extreme(&counts, |a, b| a > b);
            let (min_node, min_count) = first_extreme(&counts, |a, b| a < b);
            if max_count - min_count <= max_imbalance {
                break;
            }

            let mut candidate: Option<usize> = None;
            for (shard, owner) in assignment.iter().enumerate() {
                if *owner != Some(max_node) {
                    continue;
                }
                if candidate.is_none_or(|best| weight(shard, min_node) > weight(best, min_node)) {
                    candidate = Some(shard);
                }
            }
            // max_count > 0 here, so max_node owns at least one shard.
            let Some(shard) = candidate else {
                break;
            };

            assignment[shard] = Some(min_node);
            counts[max_node] -= 1;
            counts[min_node] += 1;
            trace!(shard, from = max_node, to = min_node, "rebalanced shard");
        }

        assignment
    }
}

/// Index and value of the first element no later element beats.
fn first_extreme(counts: &[usize], better: impl Fn(usize, usize) -> bool) -> (usize, usize) {
    counts
        .iter()
        .copied()
        .enumerate()
        .fold((0, counts[0]), |(best_index, best), (index, count)| {
            if better(count, best) {
                (index, count)
            } else {
                (best_index, best)
            }
        })
}
