//!
//! Arbor: a replicated hierarchical namespace.
//! Independent replicas create, rename, move and delete nodes of a shared
//! file tree while disconnected, and converge to the same tree once they
//! have exchanged operations.
//!
//! ## Core Concepts
//!
//! * **Timestamps (`hlc::Timestamp`)**: 64-bit hybrid logical clock values, 48 bits of
//!   milliseconds and a 16-bit counter. They order every operation in the system.
//! * **Operations (`tree::Operation`)**: every mutation is a move of one node to a new
//!   parent and name. Creation has no old parent; deletion moves to the trash root.
//! * **Replicated tree (`tree::ReplicatedTree`)**: the node map and operation log of one
//!   replica. Late operations are merged by rewinding and replaying the log.
//! * **Replicas (`replica::Replica`)**: the coordinator that turns intents into
//!   operations, persists them through a `backend::BackendImpl` and ships them over a
//!   `transport::Transport`.
//! * **Anti-entropy (`sync`)**: periodic pull of missed operations from the shared
//!   store, driven by each replica's `vector_clock::VectorClock`.

pub mod backend;
pub mod clock;
pub mod hlc;
pub mod replica;
pub mod sync;
pub mod transport;
pub mod tree;
pub mod vector_clock;

pub use clock::{Clock, ManualClock, SystemClock, WallTime};
pub use hlc::{HybridLogicalClock, Timestamp};
pub use replica::{ExternalOutcome, Mutation, Replica, ReplicaConfig, ReplicaEvent, WeakReplica};
pub use sync::SyncReport;
pub use tree::{NodeId, NodeType, Operation, OperationId, ReplicaId, ReplicatedTree, TreeNode};
pub use vector_clock::VectorClock;

/// Result type used throughout the Arbor library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Arbor library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured errors from the tree module
    #[error(transparent)]
    Tree(tree::TreeError),

    /// Structured errors from the replica coordinator
    #[error(transparent)]
    Replica(replica::ReplicaError),

    /// Structured storage errors from the backend module
    #[error(transparent)]
    Backend(backend::BackendError),

    /// Structured errors from the sync module
    #[error(transparent)]
    Sync(sync::SyncError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Tree(_) => "tree",
            Error::Replica(_) => "replica",
            Error::Backend(_) => "backend",
            Error::Sync(_) => "sync",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Check if this error indicates a node or operation was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Tree(tree_err) => tree_err.is_not_found(),
            Error::Replica(replica_err) => replica_err.is_not_found(),
            Error::Backend(backend_err) => backend_err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error indicates a conflict with the current node state.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Replica(replica_err) => replica_err.is_conflict(),
            _ => false,
        }
    }

    /// Check if this error is a rejected intent or malformed operation.
    pub fn is_validation_error(&self) -> bool {
        match self {
            Error::Tree(tree_err) => tree_err.is_invalid_operation(),
            Error::Replica(replica_err) => replica_err.is_validation_error(),
            _ => false,
        }
    }

    /// Check if this error is storage related.
    pub fn is_backend_error(&self) -> bool {
        matches!(self, Error::Backend(_))
    }

    /// Check if this error is sync related.
    pub fn is_sync_error(&self) -> bool {
        matches!(self, Error::Sync(_))
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Backend(backend_err) => backend_err.is_io_error(),
            _ => false,
        }
    }
}
