//! User intents.
//!
//! Each intent is validated against the current tree, encoded as one move
//! operation stamped by the HLC, applied locally, persisted and broadcast.
//! Validation and application happen under the replica's write lock, so the
//! tree an intent was checked against is the tree it lands on.
//!
//! Moving a folder under its own descendant is not an error: the operation
//! is issued and recorded, but the tree refuses it exactly as every other
//! replica will. [`Mutation::rejected`] reports that outcome.

use tracing::{debug, instrument};

use super::{Replica, ReplicaError, ReplicaEvent, WriteSource};
use crate::Result;
use crate::hlc::Timestamp;
use crate::tree::{
    NodeId, NodeType, Operation, OperationId, ReplicaId, ReplicatedTree, TreeNode,
};

/// A committed intent.
#[derive(Debug, Clone)]
pub struct Mutation {
    /// The operation that was issued and broadcast.
    pub operation: Operation,
    /// The node after the operation was applied.
    pub node: TreeNode,
    /// The tree refused the move (it would have created a cycle).
    pub rejected: bool,
}

/// An operation before it has been stamped.
struct Draft {
    node_id: NodeId,
    parent_id: NodeId,
    old_parent_id: Option<NodeId>,
    name: String,
    old_name: Option<String>,
    node_type: NodeType,
}

impl Draft {
    fn stamp(self, replica_id: ReplicaId, timestamp: Timestamp, vector_clock: String) -> Operation {
        Operation {
            id: OperationId::new_v4(),
            node_id: self.node_id,
            parent_id: Some(self.parent_id),
            old_parent_id: self.old_parent_id,
            name: self.name,
            old_name: self.old_name,
            node_type: self.node_type,
            replica_id,
            timestamp,
            vector_clock,
        }
    }

    /// Draft that keeps `node` where it is under a new parent and name.
    fn relocate(node: &TreeNode, parent_id: NodeId, name: String) -> Self {
        Draft {
            node_id: node.id,
            parent_id,
            old_parent_id: Some(node.parent_id.unwrap_or(NodeId::VIRTUAL_ROOT)),
            name,
            old_name: Some(node.name.clone()),
            node_type: node.node_type,
        }
    }
}

fn validate_name(name: String) -> Result<String> {
    let reason = if name.trim().is_empty() {
        "name must not be empty"
    } else if name.contains('/') {
        "name must not contain '/'"
    } else {
        return Ok(name);
    };
    Err(ReplicaError::InvalidName {
        name,
        reason: reason.to_string(),
    }
    .into())
}

/// Resolve the folder a node should be placed under.
///
/// `None` and the virtual root both mean the top level.
fn resolve_parent(tree: &ReplicatedTree, parent: Option<NodeId>) -> Result<NodeId> {
    let id = match parent {
        None | Some(NodeId::VIRTUAL_ROOT) => return Ok(NodeId::VIRTUAL_ROOT),
        Some(NodeId::TRASH_ROOT) => {
            return Err(ReplicaError::InvalidTarget {
                id: NodeId::TRASH_ROOT,
                reason: "use delete to move nodes into the trash".to_string(),
            }
            .into());
        }
        Some(id) => id,
    };

    let node = tree.get(&id).ok_or(ReplicaError::NodeNotFound { id })?;
    if node.deleted {
        return Err(ReplicaError::Conflict {
            id,
            reason: "target folder is deleted".to_string(),
        }
        .into());
    }
    if !node.is_folder() {
        return Err(ReplicaError::NotAFolder { id }.into());
    }
    Ok(id)
}

/// An existing node that is not in the trash.
fn live_node(tree: &ReplicatedTree, id: NodeId) -> Result<TreeNode> {
    if id.is_sentinel() {
        return Err(ReplicaError::InvalidTarget {
            id,
            reason: "reserved nodes cannot be modified".to_string(),
        }
        .into());
    }
    let node = tree.get(&id).ok_or(ReplicaError::NodeNotFound { id })?;
    if node.deleted {
        return Err(ReplicaError::Conflict {
            id,
            reason: "node is deleted".to_string(),
        }
        .into());
    }
    Ok(TreeNode::clone(node))
}

impl Replica {
    pub async fn create_folder(
        &self,
        name: impl Into<String>,
        parent: Option<NodeId>,
    ) -> Result<Mutation> {
        self.create_node(name, parent, NodeType::Folder).await
    }

    pub async fn create_file(
        &self,
        name: impl Into<String>,
        parent: Option<NodeId>,
    ) -> Result<Mutation> {
        self.create_node(name, parent, NodeType::File).await
    }

    /// Create a node under `parent`, or at the top level for `None`.
    #[instrument(skip(self, name), fields(replica = %self.id()))]
    pub async fn create_node(
        &self,
        name: impl Into<String>,
        parent: Option<NodeId>,
        node_type: NodeType,
    ) -> Result<Mutation> {
        let name = validate_name(name.into())?;
        self.commit_one(move |tree| {
            Ok(Draft {
                node_id: NodeId::new_v4(),
                parent_id: resolve_parent(tree, parent)?,
                old_parent_id: None,
                name,
                old_name: None,
                node_type,
            })
        })
        .await
    }

    #[instrument(skip(self, name), fields(replica = %self.id()))]
    pub async fn rename(&self, id: NodeId, name: impl Into<String>) -> Result<Mutation> {
        let name = validate_name(name.into())?;
        self.commit_one(move |tree| {
            let node = live_node(tree, id)?;
            let parent = node.parent_id.unwrap_or(NodeId::VIRTUAL_ROOT);
            Ok(Draft::relocate(&node, parent, name))
        })
        .await
    }

    /// Move a node under `parent`, or to the top level for `None`.
    #[instrument(skip(self), fields(replica = %self.id()))]
    pub async fn move_node(&self, id: NodeId, parent: Option<NodeId>) -> Result<Mutation> {
        self.commit_one(move |tree| {
            let node = live_node(tree, id)?;
            let target = resolve_parent(tree, parent)?;
            let name = node.name.clone();
            Ok(Draft::relocate(&node, target, name))
        })
        .await
    }

    /// Move a node into the trash. Its descendants stay attached to it.
    #[instrument(skip(self), fields(replica = %self.id()))]
    pub async fn delete(&self, id: NodeId) -> Result<Mutation> {
        self.commit_one(move |tree| {
            let node = live_node(tree, id)?;
            let name = node.name.clone();
            Ok(Draft::relocate(&node, NodeId::TRASH_ROOT, name))
        })
        .await
    }

    /// Restore a deleted node under `parent`, or to the top level for `None`.
    #[instrument(skip(self), fields(replica = %self.id()))]
    pub async fn undelete(&self, id: NodeId, parent: Option<NodeId>) -> Result<Mutation> {
        self.commit_one(move |tree| {
            if id.is_sentinel() {
                return Err(ReplicaError::InvalidTarget {
                    id,
                    reason: "reserved nodes cannot be modified".to_string(),
                }
                .into());
            }
            let node = tree.get(&id).ok_or(ReplicaError::NodeNotFound { id })?;
            if !node.deleted {
                return Err(ReplicaError::Conflict {
                    id,
                    reason: "node is not deleted".to_string(),
                }
                .into());
            }
            let target = resolve_parent(tree, parent)?;
            Ok(Draft::relocate(node, target, node.name.clone()))
        })
        .await
    }

    /// Duplicate `source` and its visible descendants under `parent`.
    ///
    /// Copies keep their names and types and receive fresh ids. Parents are
    /// created before their children, siblings in name order.
    #[instrument(skip(self), fields(replica = %self.id()))]
    pub async fn copy_node(&self, source: NodeId, parent: Option<NodeId>) -> Result<Vec<Mutation>> {
        self.commit(move |tree| {
            let root = live_node(tree, source)?;
            let target = resolve_parent(tree, parent)?;

            let mut drafts = Vec::new();
            let mut stack = vec![(root, target)];
            while let Some((original, new_parent)) = stack.pop() {
                let copy_id = NodeId::new_v4();
                // Reverse so the lowest name is popped first.
                for child in tree.children(Some(original.id)).into_iter().rev() {
                    stack.push((TreeNode::clone(&child), copy_id));
                }
                drafts.push(Draft {
                    node_id: copy_id,
                    parent_id: new_parent,
                    old_parent_id: None,
                    name: original.name,
                    old_name: None,
                    node_type: original.node_type,
                });
            }
            Ok(drafts)
        })
        .await
    }

    async fn commit_one<F>(&self, plan: F) -> Result<Mutation>
    where
        F: FnOnce(&ReplicatedTree) -> Result<Draft>,
    {
        let _guard = self.write_lock().lock().await;
        let draft = plan(&self.tree())?;
        self.commit_draft(draft).await
    }

    async fn commit<F>(&self, plan: F) -> Result<Vec<Mutation>>
    where
        F: FnOnce(&ReplicatedTree) -> Result<Vec<Draft>>,
    {
        let _guard = self.write_lock().lock().await;
        let drafts = plan(&self.tree())?;
        let mut mutations = Vec::with_capacity(drafts.len());
        for draft in drafts {
            mutations.push(self.commit_draft(draft).await?);
        }
        Ok(mutations)
    }

    /// Stamp, apply, persist and broadcast one draft.
    ///
    /// Caller must hold the write lock.
    async fn commit_draft(&self, draft: Draft) -> Result<Mutation> {
        let timestamp = self.clock().tick();
        let (operation, node, rejected, touched) = {
            let mut tree = self.tree_mut();
            let mut clock = tree.vector_clock().clone();
            clock.observe(self.id(), timestamp);
            let operation = draft.stamp(self.id().clone(), timestamp, clock.to_json());
            let outcome = tree.apply(operation.clone());
            let rejected = outcome.is_rejected();
            let node = tree.get(&operation.node_id).map(|n| TreeNode::clone(n));
            (operation, node, rejected, outcome.touched().to_vec())
        };
        let node = node.ok_or(ReplicaError::NodeNotFound {
            id: operation.node_id,
        })?;

        debug!(
            op = %operation.id,
            kind = %operation.kind(),
            node = %operation.node_id,
            timestamp = %timestamp,
            rejected,
            "Committed local operation"
        );

        self.persist(&operation, touched).await;
        self.publish(&operation).await;
        self.emit(ReplicaEvent::NodeChanged {
            source: WriteSource::Local,
            operation: operation.id,
            kind: operation.kind(),
            node: Some(node.clone()),
        });

        Ok(Mutation {
            operation,
            node,
            rejected,
        })
    }
}
