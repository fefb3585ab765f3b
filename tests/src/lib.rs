//! Shared test harness for Tether integration tests.
//!
//! Provides [`TestMesh`]: N in-process backends behind a [`ShardMap`], with
//! failure injection, and [`CallContext`], a command context that runs one
//! routed call so [`OperationReprocessor`] can drive it end to end:
//! cache key → shard → owner (or failover) → capture → retry.
//!
//! [`OperationReprocessor`]: tether_reprocess::OperationReprocessor

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tether_cache::{CaptureMode, RpcCacheInfoCapture, RpcCacheKey, RpcCacheValue, TextOrBytes};
use tether_placement::{ShardMap, builder_for};
use tether_reprocess::{
    Command, CommandContext, CommandError, Operation, OperationScope, TransientError,
};
use tether_types::PlacementConfig;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

// =========================================================================
// Errors
// =========================================================================

/// Failures produced by the mesh.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// The backend failed this request; a retry may succeed.
    #[error("backend {node} unavailable")]
    Unavailable { node: String },

    /// Every candidate for the shard is down.
    #[error("no live backend for shard {shard}")]
    NoBackend { shard: usize },
}

// =========================================================================
// Mesh
// =========================================================================

#[derive(Default)]
struct Backend {
    served: AtomicUsize,
    failures_left: AtomicU32,
}

/// N backends named `node-1..=node-N` sharing one shard map.
///
/// Every backend serves every method; the result depends only on the call's
/// key, so failover returns the same content as the owner would.
pub struct TestMesh {
    shard_map: ShardMap<String>,
    backends: HashMap<String, Backend>,
    down_nodes: RwLock<HashSet<String>>,
}

impl TestMesh {
    /// Create an N-node mesh with default placement.
    pub fn new(n: usize) -> Self {
        Self::with_placement(n, &PlacementConfig::default())
    }

    /// Create an N-node mesh with custom placement.
    pub fn with_placement(n: usize, config: &PlacementConfig) -> Self {
        assert!(n >= 1, "need at least 1 node");
        let nodes: Vec<String> = (1..=n).map(|i| format!("node-{i}")).collect();
        let builder = builder_for(config).unwrap();
        let backends = nodes
            .iter()
            .map(|node| (node.clone(), Backend::default()))
            .collect();
        Self {
            shard_map: ShardMap::with_builder(config.shard_count as usize, nodes, builder.as_ref()),
            backends,
            down_nodes: RwLock::new(HashSet::new()),
        }
    }

    pub fn shard_map(&self) -> &ShardMap<String> {
        &self.shard_map
    }

    pub fn nodes(&self) -> &[String] {
        self.shard_map.nodes()
    }

    /// The shard a key routes to.
    pub fn shard_for(&self, key: &RpcCacheKey) -> usize {
        key.hash_code() as u32 as usize % self.shard_map.shard_count()
    }

    /// The owner of the key's shard.
    pub fn owner_of(&self, key: &RpcCacheKey) -> &String {
        self.shard_map.get(self.shard_for(key)).unwrap()
    }

    /// Make node `name` unreachable.
    pub async fn kill_node(&self, name: &str) {
        self.down_nodes.write().await.insert(name.to_string());
    }

    /// Bring node `name` back.
    pub async fn revive_node(&self, name: &str) {
        self.down_nodes.write().await.remove(name);
    }

    /// Make the next `count` requests served by `name` fail transiently.
    pub fn inject_failures(&self, name: &str, count: u32) {
        self.backends[name].failures_left.store(count, Ordering::SeqCst);
    }

    /// Requests node `name` answered successfully.
    pub fn served(&self, name: &str) -> usize {
        self.backends[name].served.load(Ordering::SeqCst)
    }

    pub fn total_served(&self) -> usize {
        self.backends
            .values()
            .map(|b| b.served.load(Ordering::SeqCst))
            .sum()
    }

    /// Route one call by its key and record the outcome in `capture`.
    ///
    /// Walks the shard's node list starting at the owner and uses the first
    /// live node. Returns the serving node and, unless the capture is
    /// key-only, the value it answered with. When `capture` revalidates a
    /// cached entry whose hash still matches, the answer carries the hash
    /// alone.
    pub async fn call(
        &self,
        key: RpcCacheKey,
        capture: &RpcCacheInfoCapture,
        cancel: &CancellationToken,
    ) -> Result<Option<(String, RpcCacheValue)>, CommandError> {
        capture.capture_key(key.clone());
        if capture.is_key_only() {
            return Ok(None);
        }
        if cancel.is_cancelled() {
            capture.capture_cancellation(cancel);
            return Err(CommandError::cancelled());
        }

        let shard = self.shard_for(&key);
        let node = self.pick_live_node(shard).await.ok_or_else(|| {
            let error = CommandError::new(MeshError::NoBackend { shard });
            capture.capture_error(error.as_arc().clone());
            error
        })?;
        tokio::task::yield_now().await;

        let backend = &self.backends[&node];
        let failed = backend
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            debug!(%node, %key, "injected failure");
            let error = CommandError::new(TransientError::transient(MeshError::Unavailable {
                node: node.clone(),
            }));
            capture.capture_error(error.as_arc().clone());
            return Err(error);
        }

        backend.served.fetch_add(1, Ordering::SeqCst);
        let full = RpcCacheValue::from_data(respond(&key));
        let value = match capture.cache_entry() {
            Some(entry) if entry.key == key && entry.value.hash() == full.hash() => {
                RpcCacheValue::new(Bytes::new(), full.hash())
            }
            _ => full,
        };
        capture.capture_value(value.clone());
        Ok(Some((node, value)))
    }

    async fn pick_live_node(&self, shard: usize) -> Option<String> {
        let down = self.down_nodes.read().await;
        (0..self.nodes().len() as isize)
            .filter_map(|offset| self.shard_map.get_with_offset(shard, offset))
            .find(|node| !down.contains(*node))
            .cloned()
    }
}

/// The response every backend gives for `key`.
pub fn respond(key: &RpcCacheKey) -> Vec<u8> {
    let mut out = format!("{}.{}:", key.service(), key.method()).into_bytes();
    out.extend_from_slice(key.argument_data().data());
    out
}

/// A cache key for `users.get(args)`.
pub fn user_key(args: &str) -> RpcCacheKey {
    RpcCacheKey::new("users", "get", TextOrBytes::text(args))
}

// =========================================================================
// Command pipeline
// =========================================================================

/// A routed call, as a command.
#[derive(Debug)]
pub struct CallCommand {
    pub key: RpcCacheKey,
}

impl Command for CallCommand {}

/// Context of one [`CallCommand`] execution.
///
/// Each attempt opens an operation with `scope`, appends the serving node to
/// `journal`, and records its outcome in a fresh capture.
pub struct CallContext {
    mesh: Arc<TestMesh>,
    key: RpcCacheKey,
    scope: OperationScope,
    next_operation_id: u64,
    operation: Option<Operation>,
    /// Nodes that served this command. Rolled back before each retry.
    pub journal: Vec<String>,
    /// Completed attempts, rolled back with the journal.
    pub stage: u32,
    /// One capture per attempt.
    pub captures: Vec<Arc<RpcCacheInfoCapture>>,
    /// Value of the successful attempt.
    pub result: Option<RpcCacheValue>,
}

impl CallContext {
    pub fn new(mesh: Arc<TestMesh>, key: RpcCacheKey) -> Self {
        Self {
            mesh,
            key,
            scope: OperationScope::Durable,
            next_operation_id: 1,
            operation: None,
            journal: Vec::new(),
            stage: 0,
            captures: Vec::new(),
            result: None,
        }
    }

    /// Open in-memory operations instead of durable ones.
    pub fn with_transient_operations(mut self) -> Self {
        self.scope = OperationScope::Transient;
        self
    }

    pub fn attempts(&self) -> usize {
        self.captures.len()
    }
}

#[async_trait]
impl CommandContext for CallContext {
    type Items = Vec<String>;
    type ExecutionState = u32;

    fn is_outermost(&self) -> bool {
        true
    }

    fn items(&self) -> Vec<String> {
        self.journal.clone()
    }

    fn restore_items(&mut self, items: Vec<String>) {
        self.journal = items;
    }

    fn execution_state(&self) -> u32 {
        self.stage
    }

    fn restore_execution_state(&mut self, state: u32) {
        self.stage = state;
    }

    fn operation(&self) -> Option<&Operation> {
        self.operation.as_ref()
    }

    async fn invoke_remaining_handlers(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        self.operation = Some(Operation {
            id: self.next_operation_id,
            scope: self.scope,
        });
        self.next_operation_id += 1;

        let capture = Arc::new(RpcCacheInfoCapture::new(CaptureMode::KeyAndData).unwrap());
        self.captures.push(capture.clone());
        self.stage += 1;

        let outcome = self.mesh.call(self.key.clone(), &capture, cancel).await?;
        if let Some((node, value)) = outcome {
            self.journal.push(node);
            self.result = Some(value);
        }
        Ok(())
    }
}
