//! Retry queue for persistence writes that failed.
//!
//! A local mutation never fails because the store is unreachable. The
//! operation is kept here instead and written later by the background
//! engine, with exponential backoff between attempts. The queue is in
//! memory only; after a restart the operations it held exist nowhere but in
//! the logs of replicas that received them by broadcast.

use std::sync::Mutex;

use crate::tree::{NodeId, Operation, OperationId};

/// Longest backoff exponent: 2^6 seconds.
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// An operation whose store write has not succeeded yet.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub operation: Operation,
    /// Nodes whose rows must be rewritten along with the operation
    pub touched: Vec<NodeId>,
    pub attempts: u32,
    /// Timestamp of last attempt in milliseconds since Unix epoch
    pub last_attempt_ms: u64,
}

impl PendingWrite {
    /// Backoff in milliseconds: 2^attempts * 1000ms, max 64 seconds
    fn backoff_ms(&self) -> u64 {
        2u64.pow(self.attempts.min(MAX_BACKOFF_EXPONENT)) * 1000
    }

    fn is_ready(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_attempt_ms) >= self.backoff_ms()
    }
}

/// Thread-safe queue of pending writes, at most one per operation id.
#[derive(Debug, Default)]
pub struct RetryQueue {
    entries: Mutex<Vec<PendingWrite>>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `operation` after its first failed attempt.
    ///
    /// Pushing an operation that is already queued widens its node set.
    pub fn push(&self, operation: Operation, touched: Vec<NodeId>, now_ms: u64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.iter_mut().find(|e| e.operation.id == operation.id) {
            for id in touched {
                if !existing.touched.contains(&id) {
                    existing.touched.push(id);
                }
            }
            return;
        }
        entries.push(PendingWrite {
            operation,
            touched,
            attempts: 1,
            last_attempt_ms: now_ms,
        });
    }

    /// Put back an entry whose retry failed again.
    pub fn requeue(&self, mut entry: PendingWrite, now_ms: u64) {
        entry.attempts += 1;
        entry.last_attempt_ms = now_ms;
        let mut entries = self.entries.lock().unwrap();
        if !entries.iter().any(|e| e.operation.id == entry.operation.id) {
            entries.push(entry);
        }
    }

    /// Remove and return the entries whose backoff has elapsed.
    pub fn take_ready(&self, now_ms: u64) -> Vec<PendingWrite> {
        let mut entries = self.entries.lock().unwrap();
        let (ready, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut *entries).into_iter().partition(|e| e.is_ready(now_ms));
        *entries = waiting;
        ready
    }

    /// Remove and return every entry, ignoring backoff.
    pub fn take_all(&self) -> Vec<PendingWrite> {
        std::mem::take(&mut *self.entries.lock().unwrap())
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.operation.id == *id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
