//! Change notifications published by a replica.

use crate::sync::SyncReport;
use crate::tree::{OperationId, OperationKind, TreeNode};

/// Indicates whether a change originated locally or arrived from another replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteSource {
    /// Produced by an intent on this replica
    Local,
    /// Received by broadcast or anti-entropy
    Remote,
}

/// Delivered to every receiver from [`Replica::subscribe_events`](crate::Replica::subscribe_events).
#[derive(Debug, Clone)]
pub enum ReplicaEvent {
    /// An operation was integrated. `node` is the node's converged value,
    /// `None` if the node is not present (its creation has not arrived).
    NodeChanged {
        source: WriteSource,
        operation: OperationId,
        kind: OperationKind,
        node: Option<TreeNode>,
    },
    /// An anti-entropy round began.
    SyncStarted { peers: usize },
    /// An anti-entropy round integrated at least one operation.
    SyncCompleted { report: SyncReport },
}

impl ReplicaEvent {
    pub fn is_remote_change(&self) -> bool {
        matches!(
            self,
            ReplicaEvent::NodeChanged {
                source: WriteSource::Remote,
                ..
            }
        )
    }
}
