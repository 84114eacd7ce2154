//! Error types for replica intents.
//!
//! An intent that fails validation emits no operation.

use thiserror::Error;

use crate::tree::NodeId;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// Target node, or the requested parent, is unknown to this replica
    #[error("Node not found: {id}")]
    NodeNotFound { id: NodeId },

    /// Node state does not allow the intent (e.g. renaming a deleted node)
    #[error("Conflict on node {id}: {reason}")]
    Conflict { id: NodeId, reason: String },

    /// Requested parent is a file
    #[error("Node {id} is not a folder")]
    NotAFolder { id: NodeId },

    /// Sentinel used where a real node is required, or trash used as a target
    #[error("Invalid target {id}: {reason}")]
    InvalidTarget { id: NodeId, reason: String },

    #[error("Invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },
}

impl ReplicaError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReplicaError::NodeNotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ReplicaError::Conflict { .. })
    }

    /// Input was rejected before touching any state.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            ReplicaError::NotAFolder { .. }
                | ReplicaError::InvalidTarget { .. }
                | ReplicaError::InvalidName { .. }
        )
    }

    /// The node the error refers to, when there is one.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            ReplicaError::NodeNotFound { id }
            | ReplicaError::Conflict { id, .. }
            | ReplicaError::NotAFolder { id }
            | ReplicaError::InvalidTarget { id, .. } => Some(*id),
            ReplicaError::InvalidName { .. } => None,
        }
    }
}

impl From<ReplicaError> for crate::Error {
    fn from(err: ReplicaError) -> Self {
        crate::Error::Replica(err)
    }
}
