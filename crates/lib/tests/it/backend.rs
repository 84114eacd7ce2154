use std::sync::Arc;

use arbor::{
    ManualClock, NodeId, Replica,
    backend::{BackendImpl, InMemory},
};
use tempfile::TempDir;

use crate::helpers::{cluster, op, open_on, solo, visible};

#[tokio::test]
async fn test_saved_store_restores_replica() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");

    let (before, ops) = {
        let store = Arc::new(InMemory::new());
        let replica = open_on("r1", store.clone(), Arc::new(ManualClock::default())).await;
        let a = replica.create_folder("A", None).await.unwrap();
        replica.create_file("b.txt", Some(a.node.id)).await.unwrap();
        replica.delete(a.node.id).await.unwrap();
        replica.undelete(a.node.id, None).await.unwrap();
        replica.shutdown().await.unwrap();

        store.save_to_file(&path).await.unwrap();
        (visible(&replica), store.operation_count().await)
    };

    let loaded = Arc::new(InMemory::load_from_file(&path).await.unwrap());
    assert_eq!(loaded.operation_count().await, ops);
    assert!(loaded.get_replica_state(&"r1".into()).await.unwrap().is_some());

    let replica = open_on("r1", loaded, Arc::new(ManualClock::default())).await;
    assert_eq!(visible(&replica), before);
    assert_eq!(replica.snapshot().paths(), vec!["/A", "/A/b.txt"]);
}

#[tokio::test]
async fn test_missing_file_loads_empty_store() {
    let dir = TempDir::new().unwrap();
    let store = InMemory::load_from_file(dir.path().join("absent.json"))
        .await
        .unwrap();
    assert_eq!(store.operation_count().await, 0);
    assert!(store.all_nodes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sync_tolerates_unavailable_store() {
    let cluster = cluster(2).await;
    cluster.replica(0).create_folder("a", None).await.unwrap();

    cluster.store.set_available(false);
    let report = cluster.replica(1).sync_with_replicas().await.unwrap();
    assert_eq!(report.applied, 0);

    cluster.store.set_available(true);
    let report = cluster.replica(1).sync_with_replicas().await.unwrap();
    assert_eq!(report.applied, 1);
    cluster.assert_converged();
}

#[tokio::test]
async fn test_converged_nodes_are_persisted() {
    let cluster = cluster(2).await;
    let file = cluster.replica(0).create_file("f", None).await.unwrap();
    cluster.replica(1).rename(file.node.id, "g").await.unwrap_err();

    cluster.sync_all().await;
    cluster.replica(1).rename(file.node.id, "g").await.unwrap();

    let stored = cluster.store.get_node(&file.node.id).await.unwrap();
    assert_eq!(stored.name, "g");
    assert_eq!(stored.replica_id.as_str(), "r1");
}

/// Creates A and B at the top level, then moves A under B at t=30. Returns
/// the late move of B under A at t=20, which makes the replayed t=30 move a
/// cycle.
async fn crossing_moves(replica: &Replica) -> (NodeId, NodeId, arbor::Operation) {
    let a = NodeId::new_v4();
    let b = NodeId::new_v4();
    for operation in [
        op("r2", 10, a, NodeId::VIRTUAL_ROOT, None, "A"),
        op("r2", 11, b, NodeId::VIRTUAL_ROOT, None, "B"),
        op("r2", 30, a, b, Some(NodeId::VIRTUAL_ROOT), "A"),
    ] {
        replica.process_external_operation(operation).await.unwrap();
    }
    let late = op("r2", 20, b, a, Some(NodeId::VIRTUAL_ROOT), "B");
    (a, b, late)
}

async fn assert_store_matches(replica: &Replica, store: &InMemory, ids: &[NodeId]) {
    for id in ids {
        let stored = store.get_node(id).await.unwrap();
        assert_eq!(Some(stored), replica.get_node(id), "stored row for {id} is stale");
    }
}

#[tokio::test]
async fn test_rewind_rewrites_every_changed_node() {
    let (replica, store) = solo("me").await;
    let (a, b, late) = crossing_moves(&replica).await;
    assert_eq!(store.get_node(&a).await.unwrap().parent_id, Some(b));

    replica.process_external_operation(late).await.unwrap();

    assert_eq!(replica.get_node(&a).unwrap().parent_id, Some(NodeId::VIRTUAL_ROOT));
    assert_eq!(replica.get_node(&b).unwrap().parent_id, Some(a));
    assert_store_matches(&replica, &store, &[a, b]).await;
}

#[tokio::test]
async fn test_queued_rewind_rewrites_every_changed_node() {
    let (replica, store) = solo("me").await;
    let (a, b, late) = crossing_moves(&replica).await;

    store.set_available(false);
    replica.process_external_operation(late).await.unwrap();
    assert_eq!(replica.pending_writes(), 1);

    store.set_available(true);
    replica.flush_pending().await.unwrap();
    assert_store_matches(&replica, &store, &[a, b]).await;
}
