//! Error types for the replicated tree.
//!
//! Rejected moves (cycles, self-parenting) are not errors; the tree drops
//! them silently so every replica replays history to the same result. These
//! variants cover malformed input and lookups only.

use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TreeError {
    /// Node id is not present in the tree
    #[error("Node not found: {id}")]
    NodeNotFound { id: String },

    /// Operation cannot have been produced by any replica
    #[error("Invalid operation {id}: {reason}")]
    InvalidOperation { id: String, reason: String },

    #[error("Tree serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Tree deserialization failed: {reason}")]
    DeserializationFailed { reason: String },
}

impl TreeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TreeError::NodeNotFound { .. })
    }

    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, TreeError::InvalidOperation { .. })
    }

    pub fn is_serialization_error(&self) -> bool {
        matches!(
            self,
            TreeError::SerializationFailed { .. } | TreeError::DeserializationFailed { .. }
        )
    }
}

impl From<TreeError> for crate::Error {
    fn from(err: TreeError) -> Self {
        crate::Error::Tree(err)
    }
}
