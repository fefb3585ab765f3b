//! Fixed-size shard map over a node list.

use std::fmt;

use tracing::debug;

use crate::builder::{RendezvousShardMapBuilder, ShardMapBuilder};

/// A shard whose owner differs between two maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardMove<'a, T> {
    /// The shard that moves.
    pub shard: usize,
    /// Owner in the old map.
    pub from: Option<&'a T>,
    /// Owner in the new map.
    pub to: Option<&'a T>,
}

/// Assignment of `shard_count` logical shards to a list of nodes.
///
/// Node order matters: it is the indexing basis for the assignment and for
/// failover lookups. The map is immutable; rebuild it when the node set
/// changes.
#[derive(Debug, Clone)]
pub struct ShardMap<T> {
    shard_count: usize,
    nodes: Vec<T>,
    node_indexes: Vec<Option<usize>>,
}

impl<T: fmt::Display> ShardMap<T> {
    /// Build a map with the default rendezvous builder.
    pub fn new(shard_count: usize, nodes: Vec<T>) -> Self {
        Self::with_builder(shard_count, nodes, &RendezvousShardMapBuilder::default())
    }

    /// Build a map with an explicit builder.
    ///
    /// Nodes are identified to the builder by their `Display` form.
    pub fn with_builder(shard_count: usize, nodes: Vec<T>, builder: &dyn ShardMapBuilder) -> Self {
        let keys: Vec<String> = nodes.iter().map(ToString::to_string).collect();
        let node_indexes = builder.build(shard_count, &keys);
        debug!(
            shard_count,
            node_count = nodes.len(),
            ?builder,
            "built shard map"
        );
        Self {
            shard_count,
            nodes,
            node_indexes,
        }
    }
}

impl<T> ShardMap<T> {
    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Nodes in indexing order.
    pub fn nodes(&self) -> &[T] {
        &self.nodes
    }

    /// Owner index per shard; `None` only when there are no nodes.
    pub fn node_indexes(&self) -> &[Option<usize>] {
        &self.node_indexes
    }

    /// Whether the map has no nodes (every shard unassigned).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node serving `shard`, or `None` if unassigned or out of range.
    pub fn get(&self, shard: usize) -> Option<&T> {
        self.get_with_offset(shard, 0)
    }

    /// The node `node_offset` positions after `shard`'s owner in the node list.
    ///
    /// The node list is treated as a ring, so any offset (including negative
    /// ones) wraps. Offset 0 is the owner itself; offset 1 is the first
    /// failover candidate.
    pub fn get_with_offset(&self, shard: usize, node_offset: isize) -> Option<&T> {
        let owner = (*self.node_indexes.get(shard)?)?;
        let len = self.nodes.len() as isize;
        let index = (owner as isize + node_offset.rem_euclid(len)).rem_euclid(len) as usize;
        self.nodes.get(index)
    }

    /// Number of shards owned by each node, in node order.
    pub fn shard_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.nodes.len()];
        for owner in self.node_indexes.iter().flatten() {
            counts[*owner] += 1;
        }
        counts
    }
}

impl<T: PartialEq> ShardMap<T> {
    /// Shards whose owner differs between `old` and `new`.
    ///
    /// Both maps must have the same shard count; extra shards in either map
    /// are ignored.
    pub fn moves<'a>(old: &'a ShardMap<T>, new: &'a ShardMap<T>) -> Vec<ShardMove<'a, T>> {
        (0..old.shard_count.min(new.shard_count))
            .filter_map(|shard| {
                let from = old.get(shard);
                let to = new.get(shard);
                (from != to).then_some(ShardMove { shard, from, to })
            })
            .collect()
    }
}

impl<T: fmt::Display> fmt::Display for ShardMap<T> {
    /// One row per node, one column per shard: `+` where the node owns the shard.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nodes.is_empty() {
            return write!(f, "ShardMap({} shards, no nodes)", self.shard_count);
        }

        let names: Vec<String> = self.nodes.iter().map(ToString::to_string).collect();
        let width = names.iter().map(String::len).max().unwrap_or(0);
        write!(
            f,
            "ShardMap({} shards, {} nodes)",
            self.shard_count,
            self.nodes.len()
        )?;
        for (index, name) in names.iter().enumerate() {
            write!(f, "\n{name:<width$} ")?;
            for owner in &self.node_indexes {
                let mark = if *owner == Some(index) { '+' } else { '-' };
                write!(f, "{mark}")?;
            }
        }
        Ok(())
    }
}
