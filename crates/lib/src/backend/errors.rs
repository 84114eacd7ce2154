//! Storage error types for the Arbor backend.

use thiserror::Error;

use crate::tree::{NodeId, OperationId};

/// Errors that can occur during backend operations.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BackendError {
    /// Operation not found by id.
    #[error("Operation not found: {id}")]
    OperationNotFound {
        /// The id of the operation that was not found
        id: OperationId,
    },

    /// Node snapshot not found by id.
    #[error("Node not found: {id}")]
    NodeNotFound {
        /// The id of the node that was not found
        id: NodeId,
    },

    /// Serialization failed.
    #[error("Serialization failed")]
    SerializationFailed {
        /// The underlying serialization error
        #[source]
        source: serde_json::Error,
    },

    /// Deserialization failed.
    #[error("Deserialization failed")]
    DeserializationFailed {
        /// The underlying deserialization error
        #[source]
        source: serde_json::Error,
    },

    /// File I/O error.
    #[error("File I/O error")]
    FileIo {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Store cannot currently accept reads or writes.
    #[error("Backend unavailable: {reason}")]
    Unavailable {
        /// Why the store refused the request
        reason: String,
    },
}

impl BackendError {
    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BackendError::OperationNotFound { .. } | BackendError::NodeNotFound { .. }
        )
    }

    /// Check if this error is related to (de)serialization.
    pub fn is_serialization_error(&self) -> bool {
        matches!(
            self,
            BackendError::SerializationFailed { .. } | BackendError::DeserializationFailed { .. }
        )
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        matches!(self, BackendError::FileIo { .. })
    }

    /// Check if the store was unavailable. These are worth retrying.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable { .. })
    }
}

impl From<BackendError> for crate::Error {
    fn from(err: BackendError) -> Self {
        crate::Error::Backend(err)
    }
}
