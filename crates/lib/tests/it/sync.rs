//! Broadcast, anti-entropy and concurrent edits across replicas.

use arbor::{NodeId, ReplicaEvent};

use crate::helpers::{cluster, eventually, visible};

#[tokio::test]
async fn test_anti_entropy_pulls_missed_operations() {
    let cluster = cluster(2).await;
    let (r0, r1) = (cluster.replica(0), cluster.replica(1));

    let docs = r0.create_folder("docs", None).await.unwrap();
    r0.create_file("a.txt", Some(docs.node.id)).await.unwrap();

    let report = r1.sync_with_replicas().await.unwrap();
    assert_eq!(report.peers, 1);
    assert_eq!(report.fetched, 2);
    assert_eq!(report.applied, 2);
    cluster.assert_converged();

    let again = r1.sync_with_replicas().await.unwrap();
    assert_eq!(again.fetched, 0);
    assert!(!again.has_changes());
}

#[tokio::test]
async fn test_concurrent_moves_never_form_cycle() {
    let cluster = cluster(2).await;
    let (r0, r1) = (cluster.replica(0), cluster.replica(1));

    let a = r0.create_folder("A", None).await.unwrap().node.id;
    let b = r0.create_folder("B", None).await.unwrap().node.id;
    cluster.sync_all().await;

    // Neither replica sees the other's move before issuing its own.
    r0.move_node(a, Some(b)).await.unwrap();
    r1.move_node(b, Some(a)).await.unwrap();
    cluster.sync_all().await;

    cluster.assert_converged();
    assert_eq!(r0.snapshot().paths(), vec!["/B", "/B/A"]);
    assert_eq!(r1.get_node(&b).unwrap().parent_id, Some(NodeId::VIRTUAL_ROOT));
}

#[tokio::test]
async fn test_concurrent_renames_last_writer_wins() {
    let cluster = cluster(2).await;
    let (r0, r1) = (cluster.replica(0), cluster.replica(1));

    let file = r0.create_file("draft", None).await.unwrap().node.id;
    cluster.sync_all().await;

    r0.rename(file, "from-r0").await.unwrap();
    let later = r1.rename(file, "from-r1").await.unwrap();
    cluster.sync_all().await;

    cluster.assert_converged();
    let node = r0.get_node(&file).unwrap();
    assert_eq!(node.name, "from-r1");
    assert_eq!(node.timestamp, later.operation.timestamp);
}

#[tokio::test]
async fn test_same_millisecond_tie_broken_by_replica_id() {
    let cluster = cluster(2).await;
    let (r0, r1) = (cluster.replica(0), cluster.replica(1));

    let file = r0.create_file("draft", None).await.unwrap().node.id;
    cluster.sync_all().await;

    let (x, y) = {
        let _frozen = cluster.clock.freeze();
        let x = r0.rename(file, "x").await.unwrap();
        let y = r1.rename(file, "y").await.unwrap();
        (x, y)
    };
    assert_eq!(x.operation.timestamp, y.operation.timestamp);
    cluster.sync_all().await;

    cluster.assert_converged();
    let node = r0.get_node(&file).unwrap();
    assert_eq!(node.name, "y");
    assert_eq!(node.replica_id.as_str(), "r1");
}

#[tokio::test]
async fn test_delete_racing_with_move_out() {
    let cluster = cluster(2).await;
    let (r0, r1) = (cluster.replica(0), cluster.replica(1));

    let folder = r0.create_folder("old", None).await.unwrap().node.id;
    let file = r0.create_file("keep.txt", Some(folder)).await.unwrap().node.id;
    cluster.sync_all().await;

    r0.delete(folder).await.unwrap();
    r1.move_node(file, None).await.unwrap();
    cluster.sync_all().await;

    cluster.assert_converged();
    assert_eq!(r0.snapshot().paths(), vec!["/keep.txt"]);
    assert!(r1.get_node(&folder).unwrap().deleted);
}

#[tokio::test]
async fn test_broadcast_delivers_without_pull() {
    let cluster = cluster(3).await;
    cluster.start_background().await;

    let created = cluster.replica(0).create_folder("shared", None).await.unwrap();
    let id = created.node.id;
    eventually(|| cluster.replicas.iter().all(|r| r.get_node(&id).is_some())).await;

    cluster.assert_converged();
    assert!(cluster.bus.delivered() >= 2);
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_gap_in_broadcast_is_filled_by_pull() {
    let cluster = cluster(2).await;
    let (r0, r1) = (cluster.replica(0), cluster.replica(1));
    cluster.start_background().await;

    cluster.transport(1).disconnect();
    let missed = r0.create_folder("missed", None).await.unwrap().node.id;
    cluster.transport(1).reconnect();
    let seen = r0.create_folder("seen", None).await.unwrap().node.id;

    eventually(|| r1.get_node(&seen).is_some()).await;
    assert!(r1.get_node(&missed).is_none());

    let report = r1.sync_now().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.duplicates, 1);
    assert!(r1.get_node(&missed).is_some());
    cluster.assert_converged();
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_partitioned_replica_keeps_writing() {
    let cluster = cluster(2).await;
    let (r0, r1) = (cluster.replica(0), cluster.replica(1));
    cluster.start_background().await;

    cluster.transport(1).disconnect();
    let offline = r1.create_folder("offline", None).await.unwrap();
    assert!(!offline.rejected);
    r0.create_folder("online", None).await.unwrap();
    cluster.transport(1).reconnect();

    r0.sync_now().await.unwrap();
    r1.sync_now().await.unwrap();
    cluster.assert_converged();
    assert_eq!(r0.snapshot().paths(), vec!["/offline", "/online"]);
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_background_lifecycle() {
    let cluster = cluster(1).await;
    let replica = cluster.replica(0);

    assert!(replica.sync_now().await.unwrap_err().is_sync_error());
    assert!(!replica.is_background_sync_running());

    replica.start_background_sync().await.unwrap();
    replica.start_background_sync().await.unwrap();
    assert!(replica.is_background_sync_running());
    replica.flush().await.unwrap();

    replica.stop_background_sync().await.unwrap();
    assert!(!replica.is_background_sync_running());
    assert!(replica.stop_background_sync().await.unwrap_err().is_sync_error());
}

#[tokio::test]
async fn test_sync_completed_event() {
    let cluster = cluster(2).await;
    let mut events = cluster.replica(1).subscribe_events();

    cluster.replica(0).create_folder("a", None).await.unwrap();
    cluster.replica(1).sync_with_replicas().await.unwrap();

    let mut completed = None;
    while let Ok(event) = events.try_recv() {
        if let ReplicaEvent::SyncCompleted { report } = event {
            completed = Some(report);
        }
    }
    assert_eq!(completed.unwrap().applied, 1);
}

#[tokio::test]
async fn test_three_replicas_converge_after_interleaved_edits() {
    let cluster = cluster(3).await;
    let root = cluster.replica(0).create_folder("root", None).await.unwrap().node.id;
    cluster.sync_all().await;

    let mut folders = vec![root];
    for round in 0..4 {
        for (i, replica) in cluster.replicas.iter().enumerate() {
            let known: Vec<NodeId> = folders
                .iter()
                .copied()
                .filter(|f| replica.get_node(f).is_some())
                .collect();
            let parent = known[(round + i) % known.len()];
            let created = replica
                .create_folder(format!("f{round}{i}"), Some(parent))
                .await
                .unwrap();
            folders.push(created.node.id);

            let target = known[(round * 3 + i) % known.len()];
            replica.move_node(created.node.id, Some(target)).await.unwrap();
        }
        if round % 2 == 1 {
            cluster.sync_all().await;
        }
    }
    cluster.sync_all().await;

    cluster.assert_converged();
    let total = visible(cluster.replica(0));
    assert_eq!(total.len(), 1);
    assert_eq!(cluster.replica(0).snapshot().count(), 13);
}
