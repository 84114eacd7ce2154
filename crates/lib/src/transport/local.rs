//! In-process broadcast bus.
//!
//! Every replica in a process gets its own [`LocalTransport`] endpoint on a
//! shared [`LocalBus`]. Endpoints can be disconnected to simulate a network
//! partition: a disconnected endpoint cannot publish and misses everything
//! published while it is away.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Inbound, Transport};
use crate::Result;
use crate::sync::SyncError;
use crate::tree::{Operation, ReplicaId};

struct Subscriber {
    replica: ReplicaId,
    connected: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<Operation>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    delivered: AtomicU64,
}

/// Shared hub connecting [`LocalTransport`] endpoints.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBus")
            .field("subscribers", &self.inner.subscribers.lock().unwrap().len())
            .field("delivered", &self.delivered())
            .finish()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connected endpoint for `replica`.
    pub fn endpoint(&self, replica: impl Into<ReplicaId>) -> LocalTransport {
        LocalTransport {
            replica: replica.into(),
            bus: self.clone(),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Total number of deliveries made so far.
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    fn broadcast(&self, from: &ReplicaId, op: &Operation) -> usize {
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        subscribers.retain(|s| !s.sender.is_closed());

        let mut sent = 0;
        for subscriber in subscribers.iter() {
            if subscriber.replica == *from || !subscriber.connected.load(Ordering::SeqCst) {
                continue;
            }
            if subscriber.sender.send(op.clone()).is_ok() {
                sent += 1;
            }
        }
        self.inner.delivered.fetch_add(sent as u64, Ordering::Relaxed);
        sent
    }
}

/// One replica's connection to a [`LocalBus`].
#[derive(Debug, Clone)]
pub struct LocalTransport {
    replica: ReplicaId,
    bus: LocalBus,
    connected: Arc<AtomicBool>,
}

impl LocalTransport {
    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica
    }

    /// Cut this endpoint off from the bus.
    pub fn disconnect(&self) {
        debug!(replica = %self.replica, "Local transport disconnected");
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        debug!(replica = %self.replica, "Local transport reconnected");
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn transport_type(&self) -> &'static str {
        "local"
    }

    async fn publish(&self, op: &Operation) -> Result<()> {
        if !self.is_connected() {
            return Err(SyncError::TransportUnavailable {
                transport: self.transport_type(),
                reason: format!("endpoint {} is disconnected", self.replica),
            }
            .into());
        }
        let sent = self.bus.broadcast(&self.replica, op);
        trace!(replica = %self.replica, op = %op.id, sent, "Published operation");
        Ok(())
    }

    async fn subscribe(&self) -> Result<Inbound> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.bus.inner.subscribers.lock().unwrap().push(Subscriber {
            replica: self.replica.clone(),
            connected: Arc::clone(&self.connected),
            sender,
        });
        Ok(receiver)
    }
}
