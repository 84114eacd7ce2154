//! Identifier and node value types for the replicated tree.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hlc::Timestamp;

/// Globally unique node identifier, generated by the client that creates the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Tombstone bucket. Deleting a node moves it here.
    pub const TRASH_ROOT: NodeId = NodeId(Uuid::from_u128(1));

    /// Parent of every ordinary top-level node.
    pub const VIRTUAL_ROOT: NodeId = NodeId(Uuid::from_u128(2));

    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// True for the two reserved parent ids, which never name a real node.
    pub fn is_sentinel(&self) -> bool {
        *self == Self::TRASH_ROOT || *self == Self::VIRTUAL_ROOT
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for NodeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Stable identifier of a writing process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ReplicaId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ReplicaId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for ReplicaId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ReplicaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&ReplicaId> for ReplicaId {
    fn from(id: &ReplicaId) -> Self {
        id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeType {
    File,
    Folder,
}

impl NodeType {
    pub fn is_folder(&self) -> bool {
        matches!(self, NodeType::Folder)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::File => write!(f, "FILE"),
            NodeType::Folder => write!(f, "FOLDER"),
        }
    }
}

/// One entry of the tree.
///
/// Values are immutable once placed in the tree; every transition builds a
/// new `TreeNode` and swaps it in. `deleted` is true exactly when the parent
/// is [`NodeId::TRASH_ROOT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub node_type: NodeType,
    pub timestamp: Timestamp,
    pub replica_id: ReplicaId,
    pub deleted: bool,
}

impl TreeNode {
    /// Top level means no parent or the virtual root.
    pub fn is_top_level(&self) -> bool {
        matches!(self.parent_id, None | Some(NodeId::VIRTUAL_ROOT))
    }

    pub fn is_folder(&self) -> bool {
        self.node_type.is_folder()
    }
}
