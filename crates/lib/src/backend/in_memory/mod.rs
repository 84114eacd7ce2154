//! In-memory backend implementation
//!
//! This module provides an in-memory implementation of the `BackendImpl`
//! trait, suitable for tests, simulations, and single-process deployments
//! that snapshot their state to a JSON file.

mod persistence;

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{BackendError, BackendImpl, ReplicaState, sort_operations};
use crate::Result;
use crate::hlc::Timestamp;
use crate::tree::{NodeId, Operation, OperationId, ReplicaId, TreeNode};

/// A stored operation row and whether a replica has integrated it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredOperation {
    pub(crate) operation: Operation,
    #[serde(default)]
    pub(crate) applied: bool,
}

/// A simple in-memory backend using `HashMap`s for storage.
///
/// Persistence is available through [`save_to_file`](Self::save_to_file)
/// and [`load_from_file`](Self::load_from_file), which write the whole
/// state as JSON.
///
/// [`set_available`](Self::set_available) makes every call fail with
/// [`BackendError::Unavailable`], which is how tests exercise the replica's
/// persistence retry path.
#[derive(Debug)]
pub struct InMemory {
    pub(crate) operations: RwLock<HashMap<OperationId, StoredOperation>>,
    pub(crate) nodes: RwLock<HashMap<NodeId, TreeNode>>,
    pub(crate) replica_states: RwLock<HashMap<ReplicaId, ReplicaState>>,
    available: AtomicBool,
}

impl InMemory {
    /// Creates a new, empty `InMemory` backend.
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
            replica_states: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Saves the entire backend state to a file as JSON.
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persistence::save_to_file(self, path).await
    }

    /// Loads backend state from a JSON file.
    ///
    /// If the file does not exist, a new, empty `InMemory` is returned.
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        persistence::load_from_file(path).await
    }

    /// Toggle simulated unavailability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn operation_count(&self) -> usize {
        self.operations.read().await.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable {
                reason: "in-memory backend switched offline".to_string(),
            }
            .into())
        }
    }

    async fn collect_sorted(&self, filter: impl Fn(&Operation) -> bool) -> Vec<Operation> {
        let operations = self.operations.read().await;
        let mut ops: Vec<Operation> = operations
            .values()
            .map(|stored| &stored.operation)
            .filter(|op| filter(*op))
            .cloned()
            .collect();
        sort_operations(&mut ops);
        ops
    }
}

impl Default for InMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendImpl for InMemory {
    async fn put_operation(&self, op: &Operation) -> Result<()> {
        self.check_available()?;
        let mut operations = self.operations.write().await;
        operations.entry(op.id).or_insert_with(|| StoredOperation {
            operation: op.clone(),
            applied: false,
        });
        Ok(())
    }

    async fn get_operation(&self, id: &OperationId) -> Result<Operation> {
        self.check_available()?;
        let operations = self.operations.read().await;
        operations
            .get(id)
            .map(|stored| stored.operation.clone())
            .ok_or_else(|| BackendError::OperationNotFound { id: *id }.into())
    }

    async fn mark_applied(&self, id: &OperationId) -> Result<bool> {
        self.check_available()?;
        let mut operations = self.operations.write().await;
        let stored = operations
            .get_mut(id)
            .ok_or(BackendError::OperationNotFound { id: *id })?;
        let changed = !stored.applied;
        stored.applied = true;
        Ok(changed)
    }

    async fn is_applied(&self, id: &OperationId) -> Result<bool> {
        self.check_available()?;
        let operations = self.operations.read().await;
        operations
            .get(id)
            .map(|stored| stored.applied)
            .ok_or_else(|| BackendError::OperationNotFound { id: *id }.into())
    }

    async fn fetch_operations(
        &self,
        replica: &ReplicaId,
        since: Timestamp,
    ) -> Result<Vec<Operation>> {
        self.check_available()?;
        Ok(self
            .collect_sorted(|op| op.replica_id == *replica && op.timestamp > since)
            .await)
    }

    async fn operations_since(&self, since: Timestamp) -> Result<Vec<Operation>> {
        self.check_available()?;
        Ok(self.collect_sorted(|op| op.timestamp > since).await)
    }

    async fn all_operations(&self) -> Result<Vec<Operation>> {
        self.check_available()?;
        Ok(self.collect_sorted(|_| true).await)
    }

    async fn replica_ids(&self) -> Result<Vec<ReplicaId>> {
        self.check_available()?;
        let operations = self.operations.read().await;
        let ids: BTreeSet<ReplicaId> = operations
            .values()
            .map(|stored| stored.operation.replica_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn upsert_node(&self, node: &TreeNode) -> Result<()> {
        self.check_available()?;
        self.nodes.write().await.insert(node.id, node.clone());
        Ok(())
    }

    async fn get_node(&self, id: &NodeId) -> Result<TreeNode> {
        self.check_available()?;
        let nodes = self.nodes.read().await;
        nodes
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NodeNotFound { id: *id }.into())
    }

    async fn all_nodes(&self) -> Result<Vec<TreeNode>> {
        self.check_available()?;
        let nodes = self.nodes.read().await;
        let mut all: Vec<TreeNode> = nodes.values().cloned().collect();
        all.sort_by_key(|n| n.id);
        Ok(all)
    }

    async fn get_replica_state(&self, replica: &ReplicaId) -> Result<Option<ReplicaState>> {
        self.check_available()?;
        Ok(self.replica_states.read().await.get(replica).cloned())
    }

    async fn put_replica_state(&self, state: &ReplicaState) -> Result<()> {
        self.check_available()?;
        self.replica_states
            .write()
            .await
            .insert(state.replica_id.clone(), state.clone());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
