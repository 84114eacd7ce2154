use std::sync::Arc;
use std::time::Duration;

use arbor::{
    ManualClock, NodeId, NodeType, Operation, OperationId, Replica, ReplicaConfig, ReplicaId,
    Timestamp,
    backend::InMemory,
    transport::{LocalBus, LocalTransport, NullTransport},
    tree::SnapshotNode,
};

/// Replicas sharing one store, one bus and one wall clock.
pub struct Cluster {
    pub store: Arc<InMemory>,
    pub bus: LocalBus,
    pub clock: Arc<ManualClock>,
    pub replicas: Vec<Replica>,
    pub transports: Vec<LocalTransport>,
}

impl Cluster {
    pub fn replica(&self, index: usize) -> &Replica {
        &self.replicas[index]
    }

    pub fn transport(&self, index: usize) -> &LocalTransport {
        &self.transports[index]
    }

    /// Run anti-entropy on every replica until nothing new arrives.
    pub async fn sync_all(&self) {
        for _ in 0..3 {
            for replica in &self.replicas {
                replica.sync_with_replicas().await.unwrap();
            }
        }
    }

    pub async fn start_background(&self) {
        for replica in &self.replicas {
            replica.start_background_sync().await.unwrap();
        }
    }

    pub async fn shutdown(&self) {
        for replica in &self.replicas {
            replica.shutdown().await.unwrap();
        }
    }

    pub fn assert_converged(&self) {
        let expected = visible(&self.replicas[0]);
        for replica in &self.replicas[1..] {
            assert_eq!(visible(replica), expected, "replica {} diverged", replica.id());
        }
    }
}

/// Config whose timers never fire during a test.
pub fn quiet_config(id: &str) -> ReplicaConfig {
    ReplicaConfig::new(id)
        .with_sync_interval(Duration::from_secs(3600))
        .with_retry_interval(Duration::from_secs(3600))
}

/// `n` replicas named `r0`, `r1`, ...
pub async fn cluster(n: usize) -> Cluster {
    let store = Arc::new(InMemory::new());
    let bus = LocalBus::new();
    let clock = Arc::new(ManualClock::default());

    let mut replicas = Vec::with_capacity(n);
    let mut transports = Vec::with_capacity(n);
    for i in 0..n {
        let id = format!("r{i}");
        let transport = bus.endpoint(id.as_str());
        let replica = Replica::open_with_clock(
            quiet_config(&id),
            store.clone(),
            Arc::new(transport.clone()),
            clock.clone(),
        )
        .await
        .unwrap();
        replicas.push(replica);
        transports.push(transport);
    }

    Cluster {
        store,
        bus,
        clock,
        replicas,
        transports,
    }
}

/// A replica on its own store with no transport.
pub async fn solo(id: &str) -> (Replica, Arc<InMemory>) {
    let store = Arc::new(InMemory::new());
    let replica = open_on(id, store.clone(), Arc::new(ManualClock::default())).await;
    (replica, store)
}

pub async fn open_on(id: &str, store: Arc<InMemory>, clock: Arc<ManualClock>) -> Replica {
    Replica::open_with_clock(quiet_config(id), store, Arc::new(NullTransport), clock)
        .await
        .unwrap()
}

/// The visible tree, without the replica-specific header.
pub fn visible(replica: &Replica) -> Vec<SnapshotNode> {
    replica.snapshot().nodes
}

/// Wait for `condition` to hold, yielding to background tasks in between.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Hand-built operation for feeding replicas and trees directly.
pub fn op(
    replica: &str,
    physical: u64,
    node: NodeId,
    parent: NodeId,
    old_parent: Option<NodeId>,
    name: &str,
) -> Operation {
    Operation {
        id: OperationId::new_v4(),
        node_id: node,
        parent_id: Some(parent),
        old_parent_id: old_parent,
        name: name.to_string(),
        old_name: None,
        node_type: NodeType::Folder,
        replica_id: ReplicaId::from(replica),
        timestamp: Timestamp::new(physical, 0),
        vector_clock: String::new(),
    }
}
