use std::sync::Arc;

use arbor::{
    ExternalOutcome, ManualClock, NodeId, ReplicaEvent,
    backend::{BackendImpl, InMemory},
    replica::WriteSource,
    tree::OperationKind,
};

use crate::helpers::{op, open_on, solo, visible};

#[tokio::test]
async fn test_create_and_resolve_paths() {
    let (replica, _store) = solo("r1").await;
    let docs = replica.create_folder("docs", None).await.unwrap();
    let notes = replica.create_file("notes.txt", Some(docs.node.id)).await.unwrap();

    assert_eq!(replica.snapshot().paths(), vec!["/docs", "/docs/notes.txt"]);
    assert_eq!(replica.path_of(&notes.node.id).unwrap(), "/docs/notes.txt");
    assert_eq!(replica.children(None).len(), 1);
    assert_eq!(replica.children(Some(docs.node.id))[0].id, notes.node.id);

    replica.delete(docs.node.id).await.unwrap();
    assert_eq!(replica.path_of(&notes.node.id).unwrap(), "/.trash/docs/notes.txt");
}

#[tokio::test]
async fn test_recovery_replays_store() {
    let store = Arc::new(InMemory::new());
    let clock = Arc::new(ManualClock::default());
    let before = {
        let replica = open_on("r1", store.clone(), clock.clone()).await;
        let a = replica.create_folder("A", None).await.unwrap();
        let b = replica.create_folder("B", None).await.unwrap();
        replica.move_node(a.node.id, Some(b.node.id)).await.unwrap();
        replica.rename(b.node.id, "Bee").await.unwrap();
        replica.shutdown().await.unwrap();
        visible(&replica)
    };

    let state = store.get_replica_state(&"r1".into()).await.unwrap().unwrap();
    assert!(!state.active);
    assert!(state.last_operation_timestamp.is_some());

    let reopened = open_on("r1", store.clone(), clock).await;
    assert_eq!(visible(&reopened), before);
    assert_eq!(reopened.snapshot().paths(), vec!["/Bee", "/Bee/A"]);
    assert_eq!(reopened.inspect(|tree| tree.log_len()), 4);

    let state = store.get_replica_state(&"r1".into()).await.unwrap().unwrap();
    assert!(state.active);
}

#[tokio::test]
async fn test_unavailable_store_queues_writes() {
    let (replica, store) = solo("r1").await;
    store.set_available(false);

    let file = replica.create_file("draft", None).await.unwrap();
    assert_eq!(replica.pending_writes(), 1);
    assert!(replica.get_node(&file.node.id).is_some());
    assert!(replica.flush_pending().await.unwrap_err().is_backend_error());

    store.set_available(true);
    replica.flush_pending().await.unwrap();
    assert_eq!(replica.pending_writes(), 0);
    assert!(store.is_applied(&file.operation.id).await.unwrap());
    assert_eq!(store.get_node(&file.node.id).await.unwrap().name, "draft");
}

#[tokio::test]
async fn test_external_operations() {
    let (replica, _store) = solo("r1").await;
    let node = NodeId::new_v4();

    let own = op("r1", 10, node, NodeId::VIRTUAL_ROOT, None, "mine");
    assert_eq!(
        replica.process_external_operation(own).await.unwrap(),
        ExternalOutcome::Ignored
    );
    assert!(replica.get_node(&node).is_none());

    let remote = op("r2", 10, node, NodeId::VIRTUAL_ROOT, None, "theirs");
    assert_eq!(
        replica.process_external_operation(remote.clone()).await.unwrap(),
        ExternalOutcome::Applied
    );
    assert_eq!(
        replica.process_external_operation(remote).await.unwrap(),
        ExternalOutcome::Duplicate
    );
    assert_eq!(replica.get_node(&node).unwrap().name, "theirs");

    let malformed = op("", 11, NodeId::new_v4(), NodeId::VIRTUAL_ROOT, None, "x");
    let err = replica.process_external_operation(malformed).await.unwrap_err();
    assert!(err.is_validation_error());
}

#[tokio::test]
async fn test_child_arrives_before_parent() {
    let (replica, _store) = solo("r1").await;
    let (parent, child) = (NodeId::new_v4(), NodeId::new_v4());

    let create_child = op("r2", 20, child, parent, None, "child");
    let create_parent = op("r2", 10, parent, NodeId::VIRTUAL_ROOT, None, "parent");

    replica.process_external_operation(create_child).await.unwrap();
    assert!(replica.get_node(&child).is_some());
    assert!(replica.snapshot().paths().is_empty());

    replica.process_external_operation(create_parent).await.unwrap();
    assert_eq!(replica.snapshot().paths(), vec!["/parent", "/parent/child"]);
}

#[tokio::test]
async fn test_events_report_source() {
    let (replica, _store) = solo("r1").await;
    let mut events = replica.subscribe_events();

    let local = replica.create_folder("a", None).await.unwrap();
    match events.recv().await.unwrap() {
        ReplicaEvent::NodeChanged {
            source,
            operation,
            kind,
            node,
        } => {
            assert_eq!(source, WriteSource::Local);
            assert_eq!(operation, local.operation.id);
            assert_eq!(kind, OperationKind::Create);
            assert_eq!(node.unwrap().id, local.node.id);
        }
        other => panic!("unexpected event {other:?}"),
    }

    let remote = op("r2", 10, NodeId::new_v4(), NodeId::VIRTUAL_ROOT, None, "b");
    replica.process_external_operation(remote).await.unwrap();
    assert!(events.recv().await.unwrap().is_remote_change());
}

#[tokio::test]
async fn test_operations_since() {
    let (replica, _store) = solo("r1").await;
    let first = replica.create_folder("a", None).await.unwrap();
    let second = replica.create_folder("b", None).await.unwrap();
    let remote = op("r2", 1, NodeId::new_v4(), NodeId::VIRTUAL_ROOT, None, "old");
    replica.process_external_operation(remote).await.unwrap();

    let own = replica.operations_since(None).await.unwrap();
    assert_eq!(own.len(), 2);
    assert!(own.iter().all(|o| o.replica_id == *replica.id()));

    let newer = replica
        .operations_since(Some(first.operation.timestamp))
        .await
        .unwrap();
    assert_eq!(newer.len(), 1);
    assert_eq!(newer[0].id, second.operation.id);
}

#[tokio::test]
async fn test_empty_replica_id_is_rejected() {
    let result = arbor::Replica::open(
        arbor::ReplicaConfig::new(""),
        Arc::new(InMemory::new()),
        Arc::new(arbor::transport::NullTransport),
    )
    .await;
    assert!(result.unwrap_err().is_validation_error());
}
