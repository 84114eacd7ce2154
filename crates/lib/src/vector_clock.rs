//! Per-replica high-water marks.
//!
//! A [`VectorClock`] records, for each origin replica, the highest timestamp
//! observed from it. The tree's clock counts every delivery, broadcast
//! included, and is stamped onto outgoing operations and saved with the
//! replica state. A replica also keeps a second clock of pull positions,
//! which only ordered anti-entropy pulls advance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::hlc::Timestamp;
use crate::tree::ReplicaId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<ReplicaId, Timestamp>);

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the entry for `replica` to `timestamp` if it is higher.
    pub fn observe(&mut self, replica: &ReplicaId, timestamp: Timestamp) {
        match self.0.get_mut(replica) {
            Some(current) if *current >= timestamp => {}
            Some(current) => *current = timestamp,
            None => {
                self.0.insert(replica.clone(), timestamp);
            }
        }
    }

    /// Highest timestamp seen from `replica`, [`Timestamp::ZERO`] if none.
    pub fn get(&self, replica: &ReplicaId) -> Timestamp {
        self.0.get(replica).copied().unwrap_or(Timestamp::ZERO)
    }

    /// Pointwise maximum with `other`.
    pub fn merge(&mut self, other: &VectorClock) {
        for (replica, timestamp) in other.iter() {
            self.observe(replica, timestamp);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, Timestamp)> {
        self.0.iter().map(|(r, t)| (r, *t))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON text form carried on operations. Falls back to `{}`.
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize vector clock, using empty clock");
                "{}".to_string()
            }
        }
    }

    /// Parse the JSON text form. Malformed or empty input yields an empty clock.
    pub fn from_json(json: &str) -> Self {
        if json.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str(json) {
            Ok(clock) => clock,
            Err(e) => {
                warn!(error = %e, "Failed to parse vector clock, using empty clock");
                Self::default()
            }
        }
    }
}

impl FromIterator<(ReplicaId, Timestamp)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (ReplicaId, Timestamp)>>(iter: I) -> Self {
        let mut clock = VectorClock::new();
        for (replica, timestamp) in iter {
            clock.observe(&replica, timestamp);
        }
        clock
    }
}
