//! Storage collaborators for Arbor replicas
//!
//! The `BackendImpl` trait is the persistence contract a replica relies on:
//! an append-only operation store keyed by operation id and queryable by
//! origin replica and timestamp, a node-snapshot store with idempotent
//! upsert, and a small per-replica state record used across restarts.
//!
//! Several replicas may share one backend. The shared operation store is
//! also the source anti-entropy pulls missed operations from.

use std::any::Any;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::hlc::Timestamp;
use crate::tree::{NodeId, Operation, OperationId, ReplicaId, TreeNode};

mod errors;
pub mod in_memory;

pub use errors::BackendError;
pub use in_memory::InMemory;

/// Durable per-replica bookkeeping.
///
/// Written when a replica shuts down and consulted when it starts again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaState {
    pub replica_id: ReplicaId,
    /// Vector clock as JSON text, the same form carried on operations.
    pub vector_clock: String,
    pub last_operation_timestamp: Option<Timestamp>,
    /// RFC3339 time of the last write.
    pub last_heartbeat: String,
    pub active: bool,
}

/// Persistence trait used by [`Replica`](crate::Replica).
///
/// Implementations must be `Send + Sync` so one store can back several
/// replicas and background tasks, and `Any` so callers can downcast to the
/// concrete type.
///
/// Every listing method returns operations ascending by
/// [`Operation::order_key`].
#[async_trait]
pub trait BackendImpl: Send + Sync + Any {
    /// Store an operation. Storing an id that already exists is a no-op.
    async fn put_operation(&self, op: &Operation) -> Result<()>;

    async fn get_operation(&self, id: &OperationId) -> Result<Operation>;

    /// Flag a stored operation as integrated by some replica.
    ///
    /// Returns `false` if it was already flagged.
    async fn mark_applied(&self, id: &OperationId) -> Result<bool>;

    async fn is_applied(&self, id: &OperationId) -> Result<bool>;

    /// Operations from `replica` with a timestamp strictly greater than `since`.
    async fn fetch_operations(&self, replica: &ReplicaId, since: Timestamp)
    -> Result<Vec<Operation>>;

    /// Operations from every replica with a timestamp strictly greater than `since`.
    async fn operations_since(&self, since: Timestamp) -> Result<Vec<Operation>>;

    async fn all_operations(&self) -> Result<Vec<Operation>>;

    /// Distinct origin replicas of stored operations, sorted.
    async fn replica_ids(&self) -> Result<Vec<ReplicaId>>;

    /// Insert or replace the stored value of a node.
    async fn upsert_node(&self, node: &TreeNode) -> Result<()>;

    async fn get_node(&self, id: &NodeId) -> Result<TreeNode>;

    async fn all_nodes(&self) -> Result<Vec<TreeNode>>;

    async fn get_replica_state(&self, replica: &ReplicaId) -> Result<Option<ReplicaState>>;

    async fn put_replica_state(&self, state: &ReplicaState) -> Result<()>;

    /// Returns a reference to the backend as a `dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Sort operations into the replay order shared by every replica.
pub(crate) fn sort_operations(ops: &mut [Operation]) {
    ops.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
}
