//! Externally visible view of a tree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::node::{NodeId, NodeType, ReplicaId, TreeNode};
use crate::hlc::Timestamp;
use crate::vector_clock::VectorClock;

/// A visible node and its visible children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotNode {
    pub id: NodeId,
    pub name: String,
    pub node_type: NodeType,
    pub timestamp: Timestamp,
    pub replica_id: ReplicaId,
    pub children: Vec<SnapshotNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSnapshot {
    pub replica_id: ReplicaId,
    pub vector_clock: VectorClock,
    pub nodes: Vec<SnapshotNode>,
}

impl TreeSnapshot {
    /// Build from the node map. Deleted nodes and everything below them
    /// are left out; siblings are ordered by name, then id.
    pub(crate) fn build<'a>(
        replica_id: ReplicaId,
        vector_clock: VectorClock,
        nodes: impl Iterator<Item = &'a TreeNode>,
    ) -> Self {
        let mut roots = Vec::new();
        let mut by_parent: HashMap<NodeId, Vec<&TreeNode>> = HashMap::new();
        for node in nodes.filter(|n| !n.deleted) {
            if node.is_top_level() {
                roots.push(node);
            } else if let Some(parent) = node.parent_id {
                by_parent.entry(parent).or_default().push(node);
            }
        }

        let nodes = attach(roots, &by_parent);
        Self {
            replica_id,
            vector_clock,
            nodes,
        }
    }

    /// Every visible node as a slash separated path, depth first.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack: Vec<(String, &SnapshotNode)> = self
            .nodes
            .iter()
            .rev()
            .map(|n| (String::new(), n))
            .collect();
        while let Some((prefix, node)) = stack.pop() {
            let path = format!("{prefix}/{}", node.name);
            for child in node.children.iter().rev() {
                stack.push((path.clone(), child));
            }
            out.push(path);
        }
        out
    }

    /// Number of visible nodes.
    pub fn count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&SnapshotNode> = self.nodes.iter().collect();
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

fn attach(mut level: Vec<&TreeNode>, by_parent: &HashMap<NodeId, Vec<&TreeNode>>) -> Vec<SnapshotNode> {
    level.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    level
        .into_iter()
        .map(|node| {
            let children = by_parent
                .get(&node.id)
                .map(|kids| attach(kids.clone(), by_parent))
                .unwrap_or_default();
            SnapshotNode {
                id: node.id,
                name: node.name.clone(),
                node_type: node.node_type,
                timestamp: node.timestamp,
                replica_id: node.replica_id.clone(),
                children,
            }
        })
        .collect()
}
