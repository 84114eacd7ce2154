//! The operation log entry and its wire form.
//!
//! Every mutation is encoded as a move of one node:
//!
//! | kind     | `parent_id`              | `old_parent_id` |
//! |----------|--------------------------|-----------------|
//! | create   | target or virtual root   | `None`          |
//! | rename   | current parent           | current parent  |
//! | move     | target parent            | current parent  |
//! | delete   | trash root               | current parent  |
//! | undelete | target parent            | trash root      |

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::TreeError;
use super::node::{NodeId, NodeType, ReplicaId, TreeNode};
use crate::hlc::Timestamp;

/// Unique id of an operation. Redelivery is detected by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for OperationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Intent an operation was issued for, derived from its encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Rename,
    Move,
    Delete,
    Undelete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Create => "create",
            OperationKind::Rename => "rename",
            OperationKind::Move => "move",
            OperationKind::Delete => "delete",
            OperationKind::Undelete => "undelete",
        };
        f.write_str(s)
    }
}

/// A single move operation as stored, shipped and replayed.
///
/// `old_parent_id` / `old_name` describe the node as its author saw it when
/// issuing the operation. The tree keeps its own undo memo in [`LogEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: OperationId,
    pub node_id: NodeId,
    pub parent_id: Option<NodeId>,
    #[serde(default)]
    pub old_parent_id: Option<NodeId>,
    #[serde(rename = "nodeName")]
    pub name: String,
    #[serde(rename = "oldNodeName", default)]
    pub old_name: Option<String>,
    pub node_type: NodeType,
    pub replica_id: ReplicaId,
    pub timestamp: Timestamp,
    /// Author's vector clock, JSON text.
    #[serde(default)]
    pub vector_clock: String,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match (self.old_parent_id, self.parent_id) {
            (None, _) => OperationKind::Create,
            (_, Some(NodeId::TRASH_ROOT)) => OperationKind::Delete,
            (Some(NodeId::TRASH_ROOT), _) => OperationKind::Undelete,
            (old, new) if old == new => OperationKind::Rename,
            _ => OperationKind::Move,
        }
    }

    /// Key of the total order every replica agrees on.
    ///
    /// Equal timestamps from different replicas are ordered by replica id,
    /// then by operation id.
    pub fn order_key(&self) -> (Timestamp, &ReplicaId, OperationId) {
        (self.timestamp, &self.replica_id, self.id)
    }

    /// Reject operations that no replica could have produced.
    pub fn validate(&self) -> Result<(), TreeError> {
        if self.replica_id.is_empty() {
            return Err(TreeError::InvalidOperation {
                id: self.id.to_string(),
                reason: "missing replica id".to_string(),
            });
        }
        if self.node_id.is_sentinel() {
            return Err(TreeError::InvalidOperation {
                id: self.id.to_string(),
                reason: format!("targets reserved node {}", self.node_id),
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, TreeError> {
        serde_json::to_string(self).map_err(|e| TreeError::SerializationFailed {
            reason: e.to_string(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, TreeError> {
        serde_json::from_str(json).map_err(|e| TreeError::DeserializationFailed {
            reason: e.to_string(),
        })
    }
}

/// An applied operation plus the node value it replaced.
///
/// `before` is `None` when the operation created the node. It is refreshed
/// whenever the entry is redone so an undo always restores the exact prior
/// value.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub op: Operation,
    pub before: Option<Arc<TreeNode>>,
}

impl LogEntry {
    pub fn old_parent_id(&self) -> Option<NodeId> {
        self.before.as_ref().and_then(|n| n.parent_id)
    }

    pub fn old_name(&self) -> Option<&str> {
        self.before.as_ref().map(|n| n.name.as_str())
    }

    pub fn is_creation(&self) -> bool {
        self.before.is_none()
    }
}
