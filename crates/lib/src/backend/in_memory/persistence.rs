//! Persistence operations for the InMemory backend
//!
//! This module handles serialization and file I/O for saving/loading
//! the in-memory backend state to/from JSON files.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;

use super::{InMemory, StoredOperation};
use crate::backend::{BackendError, ReplicaState};
use crate::tree::{NodeId, OperationId, ReplicaId, TreeNode};
use crate::{Error, Result};

/// The current persistence file format version.
/// v0 indicates this is an unstable format subject to breaking changes.
const PERSISTENCE_VERSION: u8 = 0;

/// Helper to check if version is default (0) for serde skip_serializing_if
fn is_v0(v: &u8) -> bool {
    *v == 0
}

/// Validates the persistence version during deserialization.
fn validate_persistence_version<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u8::deserialize(deserializer)?;
    if version != PERSISTENCE_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported persistence version {version}; only version {PERSISTENCE_VERSION} is supported"
        )));
    }
    Ok(version)
}

/// Serializable form of the InMemory backend
#[derive(Serialize, Deserialize)]
struct SerializableBackend {
    /// File format version for compatibility checking
    #[serde(
        rename = "_v",
        default,
        skip_serializing_if = "is_v0",
        deserialize_with = "validate_persistence_version"
    )]
    version: u8,
    operations: HashMap<OperationId, StoredOperation>,
    #[serde(default)]
    nodes: HashMap<NodeId, TreeNode>,
    #[serde(default)]
    replica_states: HashMap<ReplicaId, ReplicaState>,
}

/// Saves the entire backend state to `path` as pretty-printed JSON.
pub(crate) async fn save_to_file<P: AsRef<Path>>(backend: &InMemory, path: P) -> Result<()> {
    let serializable = SerializableBackend {
        version: PERSISTENCE_VERSION,
        operations: backend.operations.read().await.clone(),
        nodes: backend.nodes.read().await.clone(),
        replica_states: backend.replica_states.read().await.clone(),
    };

    let json = serde_json::to_string_pretty(&serializable)
        .map_err(|e| -> Error { BackendError::SerializationFailed { source: e }.into() })?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| -> Error { BackendError::FileIo { source: e }.into() })
}

/// Loads backend state from `path`.
///
/// If the file does not exist, a new, empty `InMemory` backend is returned.
pub(crate) async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<InMemory> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => {
            let serializable: SerializableBackend =
                serde_json::from_str(&json).map_err(|e| -> Error {
                    BackendError::DeserializationFailed { source: e }.into()
                })?;
            Ok(InMemory {
                operations: RwLock::new(serializable.operations),
                nodes: RwLock::new(serializable.nodes),
                replica_states: RwLock::new(serializable.replica_states),
                available: AtomicBool::new(true),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(InMemory::new()),
        Err(e) => Err(BackendError::FileIo { source: e }.into()),
    }
}
