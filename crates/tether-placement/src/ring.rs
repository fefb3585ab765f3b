//! Immutable consistent hashing ring.

use std::fmt;

use tether_types::stable_str_hash;
use tracing::debug;

/// Consistent hashing ring over a fixed set of nodes.
///
/// Nodes are sorted ascending by their 32-bit hash. A lookup for hash `h`
/// lands on the first node whose hash is `>= h`, wrapping to the start of the
/// ring when none is. Offsets walk further around the ring, which is how
/// callers pick the Kth replica after the primary owner.
///
/// The ring keeps a second copy of its values laid out twice in a row so
/// that any wrapped run of up to `len()` nodes is one contiguous slice.
#[derive(Debug, Clone)]
pub struct HashRing<T> {
    /// `(value, hash)` pairs sorted by hash. Ties keep input order.
    nodes: Vec<(T, i32)>,
    /// `nodes` values concatenated with themselves.
    doubled: Vec<T>,
}

impl<T> Default for HashRing<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            doubled: Vec::new(),
        }
    }
}

impl<T: Clone + fmt::Display> HashRing<T> {
    /// Build a ring, hashing each value's `Display` form with the stable string hash.
    pub fn new(values: impl IntoIterator<Item = T>) -> Self {
        Self::with_hasher(values, |value| stable_str_hash(&value.to_string()))
    }
}

impl<T: Clone> HashRing<T> {
    /// Build a ring with a custom hash function.
    pub fn with_hasher<F>(values: impl IntoIterator<Item = T>, hasher: F) -> Self
    where
        F: Fn(&T) -> i32,
    {
        let mut nodes: Vec<(T, i32)> = values
            .into_iter()
            .map(|value| {
                let hash = hasher(&value);
                (value, hash)
            })
            .collect();
        if nodes.is_empty() {
            return Self::empty();
        }

        // Stable sort: equal hashes keep their input order.
        nodes.sort_by_key(|(_, hash)| *hash);

        let mut doubled = Vec::with_capacity(nodes.len() * 2);
        doubled.extend(nodes.iter().map(|(value, _)| value.clone()));
        doubled.extend(nodes.iter().map(|(value, _)| value.clone()));

        debug!(node_count = nodes.len(), "built hash ring");
        Self { nodes, doubled }
    }
}

impl<T> HashRing<T> {
    /// The zero-node ring.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of nodes on the ring.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the ring has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ring entries in hash order.
    pub fn nodes(&self) -> &[(T, i32)] {
        &self.nodes
    }

    /// Index of the first node whose hash is `>= hash`, or 0 if there is none.
    ///
    /// Returns 0 for an empty ring as well; pair with [`Self::is_empty`] before indexing.
    pub fn find_node_index(&self, hash: i32) -> usize {
        let index = self.nodes.partition_point(|(_, node_hash)| *node_hash < hash);
        if index == self.nodes.len() { 0 } else { index }
    }

    /// The node `offset` positions after the owner of `hash`.
    ///
    /// Negative offsets walk backwards; any offset wraps around the ring.
    pub fn find_node(&self, hash: i32, offset: isize) -> Option<&T> {
        let index = self.offset_index(hash, offset)?;
        Some(&self.nodes[index].0)
    }

    /// Up to `count` consecutive nodes starting `offset` positions after the owner of `hash`.
    ///
    /// `count` is clamped to the ring size, so the result never repeats a node.
    pub fn span(&self, hash: i32, count: usize, offset: isize) -> &[T] {
        let count = count.min(self.nodes.len());
        if count == 0 {
            return &[];
        }
        match self.offset_index(hash, offset) {
            Some(start) => &self.doubled[start..start + count],
            None => &[],
        }
    }

    fn offset_index(&self, hash: i32, offset: isize) -> Option<usize> {
        if self.nodes.is_empty() {
            return None;
        }
        let len = self.nodes.len() as isize;
        let base = self.find_node_index(hash) as isize;
        Some((base + offset.rem_euclid(len)).rem_euclid(len) as usize)
    }
}
