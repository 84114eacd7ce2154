//! Move-based replicated tree.
//!
//! [`ReplicatedTree`] holds the node map of one replica together with the
//! log of every operation that produced it. Operations may arrive in any
//! order; [`ReplicatedTree::apply`] rewinds the log past a late arrival,
//! performs it in its place, and replays what it rewound, so the resulting
//! tree is the one you would get by applying all operations in timestamp
//! order. Replicas that have applied the same set of operations therefore
//! hold identical trees.
//!
//! The log is kept in an ascending arena rather than as a recursive list, so
//! a long rewind costs heap memory instead of stack depth.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

mod errors;
mod node;
mod operation;
mod snapshot;


pub use errors::TreeError;
pub use node::{NodeId, NodeType, ReplicaId, TreeNode};
pub use operation::{LogEntry, Operation, OperationId, OperationKind};
pub use snapshot::{SnapshotNode, TreeSnapshot};

use crate::hlc::Timestamp;
use crate::vector_clock::VectorClock;

/// Result of [`ReplicatedTree::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Operation id was already in the log; nothing changed.
    Duplicate,
    /// Operation was inserted into the log.
    Applied {
        /// Later entries undone and redone around it.
        rewound: usize,
        /// The move was refused at its position in history (cycle or
        /// self-parenting). It stays in the log regardless.
        rejected: bool,
        /// Nodes whose state may have changed: the target of the operation
        /// followed by the targets of every rewound entry, without repeats.
        /// A replayed entry can flip between accepted and rejected, so any of
        /// them may differ from before.
        touched: Vec<NodeId>,
    },
}

impl ApplyOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, ApplyOutcome::Duplicate)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { rejected: true, .. })
    }

    /// Nodes to write back to a node store after this apply.
    pub fn touched(&self) -> &[NodeId] {
        match self {
            ApplyOutcome::Duplicate => &[],
            ApplyOutcome::Applied { touched, .. } => touched,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplicatedTree {
    replica_id: ReplicaId,
    nodes: HashMap<NodeId, Arc<TreeNode>>,
    /// Ascending by [`Operation::order_key`]; the head is the last element.
    log: Vec<LogEntry>,
    applied: HashSet<OperationId>,
    vector_clock: VectorClock,
}

impl ReplicatedTree {
    pub fn new(replica_id: impl Into<ReplicaId>) -> Self {
        Self {
            replica_id: replica_id.into(),
            nodes: HashMap::new(),
            log: Vec::new(),
            applied: HashSet::new(),
            vector_clock: VectorClock::new(),
        }
    }

    /// Build a tree by applying `ops` in the given order.
    pub fn from_operations(
        replica_id: impl Into<ReplicaId>,
        ops: impl IntoIterator<Item = Operation>,
    ) -> Self {
        let mut tree = Self::new(replica_id);
        for op in ops {
            tree.apply(op);
        }
        tree
    }

    /// Integrate `op` into the log and the node map.
    pub fn apply(&mut self, op: Operation) -> ApplyOutcome {
        if self.applied.contains(&op.id) {
            return ApplyOutcome::Duplicate;
        }

        let index = self
            .log
            .partition_point(|entry| entry.op.order_key() < op.order_key());
        let mut rewound = self.log.split_off(index);

        for entry in rewound.iter().rev() {
            self.undo(entry);
        }

        let mut touched = vec![op.node_id];
        for entry in &rewound {
            if !touched.contains(&entry.op.node_id) {
                touched.push(entry.op.node_id);
            }
        }

        self.vector_clock.observe(&op.replica_id, op.timestamp);
        self.applied.insert(op.id);
        let (entry, performed) = self.do_operation(op);
        let rejected = !performed;
        self.log.push(entry);

        for entry in rewound.iter_mut() {
            self.redo(entry);
        }
        let count = rewound.len();
        self.log.append(&mut rewound);

        trace!(rewound = count, rejected, "Applied operation");
        ApplyOutcome::Applied {
            rewound: count,
            rejected,
            touched,
        }
    }

    /// Perform `op` against the current node map and record what it replaced.
    fn do_operation(&mut self, op: Operation) -> (LogEntry, bool) {
        let before = self.nodes.get(&op.node_id).cloned();
        let performed = self.perform_move(&op);
        (LogEntry { op, before }, performed)
    }

    /// Re-perform a rewound entry. The operation is kept verbatim; only the
    /// undo memo is recaptured against the tree it now lands on.
    fn redo(&mut self, entry: &mut LogEntry) {
        entry.before = self.nodes.get(&entry.op.node_id).cloned();
        self.perform_move(&entry.op);
    }

    fn undo(&mut self, entry: &LogEntry) {
        match &entry.before {
            None => {
                self.nodes.remove(&entry.op.node_id);
            }
            Some(node) => {
                self.nodes.insert(node.id, Arc::clone(node));
            }
        }
    }

    /// Apply the move to the node map, or leave it untouched if the move is
    /// invalid in the current state. Returns whether the map changed.
    fn perform_move(&mut self, op: &Operation) -> bool {
        if op.node_id.is_sentinel() || Some(op.node_id) == op.parent_id {
            return false;
        }
        if self.would_create_cycle(op.node_id, op.parent_id) {
            return false;
        }

        let deleted = op.parent_id == Some(NodeId::TRASH_ROOT);
        let node = match self.nodes.get(&op.node_id) {
            None => TreeNode {
                id: op.node_id,
                parent_id: op.parent_id,
                name: op.name.clone(),
                node_type: op.node_type,
                timestamp: op.timestamp,
                replica_id: op.replica_id.clone(),
                deleted,
            },
            Some(existing) => TreeNode {
                parent_id: op.parent_id,
                name: op.name.clone(),
                timestamp: op.timestamp,
                replica_id: op.replica_id.clone(),
                deleted,
                ..TreeNode::clone(existing)
            },
        };
        self.nodes.insert(op.node_id, Arc::new(node));
        true
    }

    /// Whether making `new_parent` the parent of `node_id` would put
    /// `node_id` among its own ancestors.
    ///
    /// The walk is bounded by the node count; a longer chain can only come
    /// from a malformed map and is treated as a cycle.
    pub fn would_create_cycle(&self, node_id: NodeId, new_parent: Option<NodeId>) -> bool {
        let Some(mut current) = new_parent else {
            return false;
        };
        if current.is_sentinel() {
            return false;
        }

        let mut steps = 0;
        loop {
            if current == node_id {
                return true;
            }
            if steps > self.nodes.len() {
                return true;
            }
            steps += 1;
            match self.nodes.get(&current).and_then(|n| n.parent_id) {
                Some(parent) if !parent.is_sentinel() => current = parent,
                _ => return false,
            }
        }
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot::build(
            self.replica_id.clone(),
            self.vector_clock.clone(),
            self.nodes.values().map(|n| n.as_ref()),
        )
    }

    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica_id
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&Arc<TreeNode>> {
        self.nodes.get(node_id)
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<TreeNode>> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Log entries, most recent first.
    pub fn log(&self) -> impl ExactSizeIterator<Item = &LogEntry> {
        self.log.iter().rev()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    pub fn has_applied(&self, op_id: &OperationId) -> bool {
        self.applied.contains(op_id)
    }

    pub fn vector_clock(&self) -> &VectorClock {
        &self.vector_clock
    }

    /// Fold a persisted clock into the tree's own (pointwise max).
    pub fn merge_vector_clock(&mut self, clock: &VectorClock) {
        self.vector_clock.merge(clock);
    }

    /// Timestamp at the head of the log.
    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.log.last().map(|e| e.op.timestamp)
    }

    /// Not deleted, and every ancestor up to a top-level node is present and
    /// not deleted.
    pub fn is_visible(&self, node_id: &NodeId) -> bool {
        let mut current = match self.nodes.get(node_id) {
            Some(node) => node,
            None => return false,
        };
        for _ in 0..=self.nodes.len() {
            if current.deleted {
                return false;
            }
            if current.is_top_level() {
                return true;
            }
            current = match current.parent_id.and_then(|p| self.nodes.get(&p)) {
                Some(parent) => parent,
                None => return false,
            };
        }
        false
    }

    /// Non-deleted children of `parent`, ordered by name then id.
    ///
    /// `None` lists top-level nodes.
    pub fn children(&self, parent: Option<NodeId>) -> Vec<Arc<TreeNode>> {
        let top = matches!(parent, None | Some(NodeId::VIRTUAL_ROOT));
        let mut children: Vec<Arc<TreeNode>> = self
            .nodes
            .values()
            .filter(|n| !n.deleted)
            .filter(|n| if top { n.is_top_level() } else { n.parent_id == parent })
            .cloned()
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        children
    }

    /// Slash separated names from the top level down to `node_id`.
    ///
    /// Deleted nodes resolve under `/.trash`.
    pub fn path_of(&self, node_id: &NodeId) -> Result<String, TreeError> {
        let mut names = Vec::new();
        let mut current = self
            .nodes
            .get(node_id)
            .ok_or_else(|| TreeError::NodeNotFound {
                id: node_id.to_string(),
            })?;
        for _ in 0..=self.nodes.len() {
            names.push(current.name.as_str());
            match current.parent_id {
                None | Some(NodeId::VIRTUAL_ROOT) => break,
                Some(NodeId::TRASH_ROOT) => {
                    names.push(".trash");
                    break;
                }
                Some(parent) => {
                    current = self.nodes.get(&parent).ok_or_else(|| TreeError::NodeNotFound {
                        id: parent.to_string(),
                    })?;
                }
            }
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }
}
