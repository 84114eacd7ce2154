//! Replica coordinator.
//!
//! A [`Replica`] owns one replicated tree, its hybrid logical clock and the
//! collaborators it persists to and broadcasts through. It turns user intents
//! into move operations (see [`intents`]), integrates operations from other
//! replicas ([`Replica::process_external_operation`]) and pulls missed
//! operations during anti-entropy ([`Replica::sync_with_replicas`]).
//!
//! There is no global state: every replica is an explicit context object,
//! so any number of them can live in one process.

use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use handle_trait::Handle;
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc};
use tracing::{debug, info, instrument, trace, warn};

use crate::backend::{BackendError, BackendImpl, ReplicaState};
use crate::hlc::{HybridLogicalClock, Timestamp};
use crate::sync::{RetryQueue, SyncCommand};
use crate::transport::Transport;
use crate::tree::{
    ApplyOutcome, NodeId, Operation, ReplicaId, ReplicatedTree, TreeNode, TreeSnapshot,
};
use crate::vector_clock::VectorClock;
use crate::{Clock, Result, SystemClock};

mod config;
mod errors;
mod events;
pub mod intents;

pub use config::ReplicaConfig;
pub use errors::ReplicaError;
pub use events::{ReplicaEvent, WriteSource};
pub use intents::Mutation;

/// What [`Replica::process_external_operation`] did with an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalOutcome {
    /// The operation originated here.
    Ignored,
    /// The operation had already been integrated.
    Duplicate,
    Applied,
}

/// Internal state for Replica
///
/// Replica itself is just a cheap-to-clone handle wrapping `Arc<ReplicaInternal>`.
pub(crate) struct ReplicaInternal {
    config: ReplicaConfig,
    backend: Arc<dyn BackendImpl>,
    transport: Arc<dyn Transport>,
    hlc: HybridLogicalClock,
    /// Node map and log, always swapped together under this lock
    tree: RwLock<ReplicatedTree>,
    /// Serializes every mutating entry point
    write_lock: AsyncMutex<()>,
    /// Per-peer pull positions. Only ordered pulls advance them, so a gap
    /// in broadcast deliveries is still covered by the next pull.
    cursors: Mutex<VectorClock>,
    retry_queue: RetryQueue,
    events: broadcast::Sender<ReplicaEvent>,
    background: Mutex<Option<mpsc::Sender<SyncCommand>>>,
}

impl std::fmt::Debug for ReplicaInternal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaInternal")
            .field("replica_id", &self.config.replica_id)
            .field("backend", &"<BackendImpl>")
            .field("transport", &self.transport.transport_type())
            .field("hlc", &self.hlc)
            .field("pending_writes", &self.retry_queue.len())
            .field(
                "background",
                &self.background.lock().unwrap().is_some(),
            )
            .finish()
    }
}

/// One member of a replicated namespace.
///
/// Replica is a cheap-to-clone handle around `Arc<ReplicaInternal>`.
///
/// ## Example
///
/// ```
/// # use std::sync::Arc;
/// # use arbor::{Replica, ReplicaConfig, backend::InMemory, transport::NullTransport};
/// # #[tokio::main]
/// # async fn main() -> arbor::Result<()> {
/// let replica = Replica::open(
///     ReplicaConfig::new("replica-1"),
///     Arc::new(InMemory::new()),
///     Arc::new(NullTransport),
/// )
/// .await?;
///
/// let docs = replica.create_folder("docs", None).await?;
/// replica.create_file("notes.txt", Some(docs.node.id)).await?;
/// assert_eq!(replica.snapshot().paths(), vec!["/docs", "/docs/notes.txt"]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Handle)]
pub struct Replica {
    inner: Arc<ReplicaInternal>,
}

/// Weak reference to a Replica.
///
/// Held by background tasks so they do not keep a replica alive.
#[derive(Clone, Debug, Handle)]
pub struct WeakReplica {
    inner: Weak<ReplicaInternal>,
}

impl Replica {
    /// Open a replica on the system clock and recover its state from `backend`.
    pub async fn open(
        config: ReplicaConfig,
        backend: Arc<dyn BackendImpl>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        Self::open_with_clock(config, backend, transport, Arc::new(SystemClock)).await
    }

    /// Open a replica reading wall time from `clock`.
    ///
    /// Every stored operation is replayed in order before this returns.
    pub async fn open_with_clock(
        config: ReplicaConfig,
        backend: Arc<dyn BackendImpl>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.replica_id.is_empty() {
            return Err(ReplicaError::InvalidName {
                name: String::new(),
                reason: "replica id must not be empty".to_string(),
            }
            .into());
        }

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let replica = Self {
            inner: Arc::new(ReplicaInternal {
                tree: RwLock::new(ReplicatedTree::new(config.replica_id.clone())),
                hlc: HybridLogicalClock::new(clock),
                config,
                backend,
                transport,
                write_lock: AsyncMutex::new(()),
                cursors: Mutex::new(VectorClock::new()),
                retry_queue: RetryQueue::new(),
                events,
                background: Mutex::new(None),
            }),
        };
        replica.recover().await?;
        Ok(replica)
    }

    /// Rebuild the tree from the store.
    ///
    /// Replays all stored operations ascending. The input is pre-sorted, so
    /// each apply takes the forward path, but an unsorted window would still
    /// produce the same tree.
    #[instrument(skip(self), fields(replica = %self.id()))]
    async fn recover(&self) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        let backend = &self.inner.backend;

        let state = backend.get_replica_state(self.id()).await?;
        let ops = backend.all_operations().await?;
        let replayed = ops.len();
        let mut latest = state.as_ref().and_then(|s| s.last_operation_timestamp);

        {
            let mut cursors = self.inner.cursors.lock().unwrap();
            let mut tree = self.tree_mut();
            if let Some(state) = &state {
                tree.merge_vector_clock(&VectorClock::from_json(&state.vector_clock));
            }
            for op in ops {
                latest = latest.max(Some(op.timestamp));
                cursors.observe(&op.replica_id, op.timestamp);
                tree.apply(op);
            }
        }

        if let Some(latest) = latest {
            self.inner.hlc.receive(latest);
        }
        info!(
            operations = replayed,
            nodes = self.tree().len(),
            restored_state = state.is_some(),
            "Recovered replica"
        );

        if let Err(e) = self.write_state(true).await {
            warn!(error = %e, "Failed to record replica as active");
        }
        Ok(())
    }

    /// Integrate an operation issued by another replica.
    ///
    /// Own operations are ignored and redelivery is a no-op, so callers may
    /// deliver the same operation any number of times.
    #[instrument(skip(self, op), fields(replica = %self.id(), op = %op.id))]
    pub async fn process_external_operation(&self, op: Operation) -> Result<ExternalOutcome> {
        if op.replica_id == *self.id() {
            trace!("Ignoring own operation");
            return Ok(ExternalOutcome::Ignored);
        }
        op.validate()?;

        let _guard = self.inner.write_lock.lock().await;
        self.inner.hlc.receive(op.timestamp);

        let (outcome, node) = {
            let mut tree = self.tree_mut();
            let outcome = tree.apply(op.clone());
            let node = tree.get(&op.node_id).map(|n| TreeNode::clone(n));
            (outcome, node)
        };

        let touched = match outcome {
            ApplyOutcome::Duplicate => {
                trace!("Operation already integrated");
                return Ok(ExternalOutcome::Duplicate);
            }
            ApplyOutcome::Applied {
                rewound,
                rejected,
                touched,
            } => {
                debug!(
                    kind = %op.kind(),
                    node = %op.node_id,
                    origin = %op.replica_id,
                    rewound,
                    rejected,
                    "Integrated remote operation"
                );
                touched
            }
        };

        self.persist(&op, touched).await;
        self.emit(ReplicaEvent::NodeChanged {
            source: WriteSource::Remote,
            operation: op.id,
            kind: op.kind(),
            node,
        });
        Ok(ExternalOutcome::Applied)
    }

    /// Write an operation and the converged state of every node it touched
    /// to the store, queueing the write for retry if the store refuses it.
    pub(crate) async fn persist(&self, op: &Operation, touched: Vec<NodeId>) {
        if let Err(e) = self.write_through(op, &touched).await {
            warn!(op = %op.id, error = %e, "Failed to persist operation, queued for retry");
            self.inner
                .retry_queue
                .push(op.clone(), touched, self.now_millis());
        }
    }

    /// Node rows are read from the tree at write time, so a late retry never
    /// overwrites a newer row with an older state.
    async fn write_through(&self, op: &Operation, touched: &[NodeId]) -> Result<()> {
        let backend = &self.inner.backend;
        backend.put_operation(op).await?;
        backend.mark_applied(&op.id).await?;
        for id in touched {
            if let Some(node) = self.get_node(id) {
                backend.upsert_node(&node).await?;
            }
        }
        Ok(())
    }

    /// Best-effort broadcast. Failures are left to anti-entropy.
    pub(crate) async fn publish(&self, op: &Operation) {
        if let Err(e) = self.inner.transport.publish(op).await {
            warn!(
                op = %op.id,
                transport = self.inner.transport.transport_type(),
                error = %e,
                "Broadcast failed"
            );
        }
    }

    /// Retry queued store writes.
    ///
    /// With `force` every entry is attempted, otherwise only those whose
    /// backoff has elapsed. Returns how many are still pending afterwards.
    pub(crate) async fn retry_pending(&self, force: bool) -> usize {
        let now_ms = self.now_millis();
        let entries = if force {
            self.inner.retry_queue.take_all()
        } else {
            self.inner.retry_queue.take_ready(now_ms)
        };

        for entry in entries {
            match self.write_through(&entry.operation, &entry.touched).await {
                Ok(()) => debug!(op = %entry.operation.id, attempts = entry.attempts, "Persisted queued operation"),
                Err(e) => {
                    warn!(
                        op = %entry.operation.id,
                        attempts = entry.attempts,
                        error = %e,
                        "Retry of queued operation failed"
                    );
                    self.inner.retry_queue.requeue(entry, now_ms);
                }
            }
        }
        self.inner.retry_queue.len()
    }

    /// Write every queued operation now, ignoring backoff.
    pub async fn flush_pending(&self) -> Result<()> {
        match self.retry_pending(true).await {
            0 => Ok(()),
            remaining => Err(BackendError::Unavailable {
                reason: format!("{remaining} operations still waiting to be persisted"),
            }
            .into()),
        }
    }

    /// Number of operations waiting to be written to the store.
    pub fn pending_writes(&self) -> usize {
        self.inner.retry_queue.len()
    }

    /// Record this replica's clock and last timestamp as inactive.
    pub async fn persist_state(&self) -> Result<()> {
        self.write_state(false).await
    }

    async fn write_state(&self, active: bool) -> Result<()> {
        let (vector_clock, last_operation_timestamp) = {
            let tree = self.tree();
            (tree.vector_clock().to_json(), tree.latest_timestamp())
        };
        let state = ReplicaState {
            replica_id: self.id().clone(),
            vector_clock,
            last_operation_timestamp,
            last_heartbeat: self.inner.hlc.wall().wall_time().to_rfc3339(),
            active,
        };
        self.inner.backend.put_replica_state(&state).await
    }

    /// Stop background sync, flush pending writes and persist replica state.
    #[instrument(skip(self), fields(replica = %self.id()))]
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.stop_background_sync().await
            && !e.is_sync_error()
        {
            return Err(e);
        }
        if let Err(e) = self.flush_pending().await {
            warn!(error = %e, "Shutting down with unpersisted operations");
        }
        self.persist_state().await?;
        info!("Replica shut down");
        Ok(())
    }

    pub fn id(&self) -> &ReplicaId {
        &self.inner.config.replica_id
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &Arc<dyn BackendImpl> {
        &self.inner.backend
    }

    pub fn clock(&self) -> &HybridLogicalClock {
        &self.inner.hlc
    }

    pub fn get_node(&self, id: &NodeId) -> Option<TreeNode> {
        self.tree().get(id).map(|n| TreeNode::clone(n))
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        self.tree().snapshot()
    }

    pub fn vector_clock(&self) -> VectorClock {
        self.tree().vector_clock().clone()
    }

    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.tree().latest_timestamp()
    }

    /// Visible children of `parent`; `None` lists the top level.
    pub fn children(&self, parent: Option<NodeId>) -> Vec<TreeNode> {
        self.tree()
            .children(parent)
            .into_iter()
            .map(|n| TreeNode::clone(&n))
            .collect()
    }

    pub fn path_of(&self, id: &NodeId) -> Result<String> {
        Ok(self.tree().path_of(id)?)
    }

    /// Run `f` against a consistent view of the tree and its log.
    pub fn inspect<R>(&self, f: impl FnOnce(&ReplicatedTree) -> R) -> R {
        f(&self.tree())
    }

    /// Stored operations for a sync peer.
    ///
    /// `None` returns this replica's own operations; `Some(since)` returns
    /// operations from every replica newer than `since`.
    pub async fn operations_since(&self, since: Option<Timestamp>) -> Result<Vec<Operation>> {
        match since {
            None => {
                self.inner
                    .backend
                    .fetch_operations(self.id(), Timestamp::ZERO)
                    .await
            }
            Some(since) => self.inner.backend.operations_since(since).await,
        }
    }

    /// Receive change and sync notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.inner.events.subscribe()
    }

    /// Create a weak reference to this Replica.
    pub fn downgrade(&self) -> WeakReplica {
        WeakReplica {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn emit(&self, event: ReplicaEvent) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn now_millis(&self) -> u64 {
        self.inner.hlc.wall().wall_time().as_millis()
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn write_lock(&self) -> &AsyncMutex<()> {
        &self.inner.write_lock
    }

    pub(crate) fn background(&self) -> &Mutex<Option<mpsc::Sender<SyncCommand>>> {
        &self.inner.background
    }

    /// Pull position for `peer`.
    pub(crate) fn cursor(&self, peer: &ReplicaId) -> Timestamp {
        self.inner.cursors.lock().unwrap().get(peer)
    }

    pub(crate) fn advance_cursor(&self, peer: &ReplicaId, to: Timestamp) {
        self.inner.cursors.lock().unwrap().observe(peer, to);
    }

    pub(crate) fn tree(&self) -> RwLockReadGuard<'_, ReplicatedTree> {
        self.inner.tree.read().unwrap()
    }

    pub(crate) fn tree_mut(&self) -> RwLockWriteGuard<'_, ReplicatedTree> {
        self.inner.tree.write().unwrap()
    }
}

impl WeakReplica {
    /// Upgrade to a strong reference, if the Replica still exists.
    pub fn upgrade(&self) -> Option<Replica> {
        self.inner.upgrade().map(|inner| Replica { inner })
    }
}
