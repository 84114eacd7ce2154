//! Replica configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::tree::ReplicaId;

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 5;
const DEFAULT_EVENT_CAPACITY: usize = 256;

fn default_sync_interval() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

fn default_retry_interval() -> u64 {
    DEFAULT_RETRY_INTERVAL_SECS
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

/// Settings for one [`Replica`](crate::Replica).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use arbor::ReplicaConfig;
///
/// let config = ReplicaConfig::new("replica-1")
///     .with_sync_interval(Duration::from_secs(10))
///     .with_peer("replica-2");
/// assert_eq!(config.sync_interval(), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub replica_id: ReplicaId,

    /// Seconds between anti-entropy rounds
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Seconds between attempts to flush failed persistence writes
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// Peers to pull from in addition to every origin found in the store
    #[serde(default)]
    pub peers: Vec<ReplicaId>,

    /// Buffer size of the event channel; slow subscribers lag beyond it
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl ReplicaConfig {
    pub fn new(replica_id: impl Into<ReplicaId>) -> Self {
        Self {
            replica_id: replica_id.into(),
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            peers: Vec::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_peer(mut self, peer: impl Into<ReplicaId>) -> Self {
        self.peers.push(peer.into());
        self
    }

    pub fn with_peers<I, P>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ReplicaId>,
    {
        self.peers.extend(peers.into_iter().map(Into::into));
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }
}
