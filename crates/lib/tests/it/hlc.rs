use std::sync::Arc;

use arbor::{ManualClock, NodeId, backend::InMemory};

use crate::helpers::{op, open_on};

#[tokio::test]
async fn test_writes_in_one_millisecond_use_counter() {
    let clock = Arc::new(ManualClock::new(5_000));
    let replica = open_on("r1", Arc::new(InMemory::new()), clock.clone()).await;

    let _frozen = clock.freeze();
    let a = replica.create_folder("a", None).await.unwrap();
    let b = replica.create_folder("b", None).await.unwrap();

    let (ta, tb) = (a.operation.timestamp, b.operation.timestamp);
    assert_eq!(ta.physical(), tb.physical());
    assert_eq!(tb.counter(), ta.counter() + 1);
    assert!(tb > ta);
}

#[tokio::test]
async fn test_remote_timestamp_ahead_of_wall_clock() {
    let clock = Arc::new(ManualClock::new(5_000));
    let replica = open_on("r1", Arc::new(InMemory::new()), clock).await;

    let remote = op("r9", 9_000_000, NodeId::new_v4(), NodeId::VIRTUAL_ROOT, None, "far");
    replica.process_external_operation(remote.clone()).await.unwrap();

    let local = replica.create_folder("x", None).await.unwrap();
    assert!(local.operation.timestamp > remote.timestamp);
    assert_eq!(local.operation.timestamp.physical(), 9_000_000);
}

#[tokio::test]
async fn test_clock_survives_restart_behind_wall_time() {
    let store = Arc::new(InMemory::new());
    let last = {
        let replica = open_on("r1", store.clone(), Arc::new(ManualClock::new(1_000_000))).await;
        let m = replica.create_folder("a", None).await.unwrap();
        replica.shutdown().await.unwrap();
        m.operation.timestamp
    };

    // Wall clock went backwards across the restart.
    let replica = open_on("r1", store, Arc::new(ManualClock::new(10))).await;
    let next = replica.create_folder("b", None).await.unwrap();
    assert!(next.operation.timestamp > last);
}
