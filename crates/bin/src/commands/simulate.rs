//! In-process simulation: several replicas, random intents, random partitions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arbor::{
    ManualClock, NodeId, Replica, ReplicaConfig, TreeNode,
    backend::InMemory,
    transport::{LocalBus, LocalTransport},
};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracing::{debug, info};

use crate::cli::SimulateArgs;
use crate::output::{OutputFormat, print_table};

/// Run the simulate command
pub async fn run(
    args: &SimulateArgs,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    if args.replicas == 0 {
        return Err("at least one replica is required".into());
    }
    let partition_rate = args.partition_rate.clamp(0.0, 1.0);
    let mut rng = StdRng::seed_from_u64(args.seed);

    let store = Arc::new(InMemory::new());
    let bus = LocalBus::new();
    let clock = Arc::new(ManualClock::default());

    let mut replicas = Vec::with_capacity(args.replicas);
    let mut endpoints: Vec<LocalTransport> = Vec::with_capacity(args.replicas);
    for i in 0..args.replicas {
        let id = format!("replica-{i}");
        let endpoint = bus.endpoint(id.as_str());
        // Anti-entropy is driven explicitly at the end of the run.
        let config = ReplicaConfig::new(id.as_str()).with_sync_interval(Duration::from_secs(3600));
        let replica = Replica::open_with_clock(
            config,
            store.clone(),
            Arc::new(endpoint.clone()),
            clock.clone(),
        )
        .await?;
        replica.start_background_sync().await?;
        replicas.push(replica);
        endpoints.push(endpoint);
    }
    info!(replicas = args.replicas, operations = args.operations, seed = args.seed, "Simulation started");

    let mut issued: BTreeMap<String, usize> = BTreeMap::new();
    let mut refused = 0usize;
    for step in 0..args.operations {
        for endpoint in &endpoints {
            if rng.gen_bool(partition_rate) {
                if endpoint.is_connected() {
                    endpoint.disconnect();
                } else {
                    endpoint.reconnect();
                }
            }
        }

        let replica = &replicas[rng.gen_range(0..replicas.len())];
        match random_intent(replica, &mut rng).await {
            Ok(kind) => *issued.entry(kind).or_default() += 1,
            Err(e) => {
                debug!(step, replica = %replica.id(), error = %e, "Intent refused");
                refused += 1;
            }
        }
        if step % 16 == 0 {
            tokio::task::yield_now().await;
        }
    }

    for endpoint in &endpoints {
        endpoint.reconnect();
    }
    let mut applied_by_sync = 0;
    for _ in 0..2 {
        for replica in &replicas {
            applied_by_sync += replica.sync_now().await?.applied;
        }
    }

    let reference = replicas[0].snapshot().nodes;
    let converged = replicas.iter().all(|r| r.snapshot().nodes == reference);
    let visible = replicas[0].snapshot().count();

    let rows: Vec<Vec<String>> = replicas
        .iter()
        .map(|r| {
            vec![
                r.id().to_string(),
                r.snapshot().count().to_string(),
                r.inspect(|tree| tree.log_len()).to_string(),
                r.pending_writes().to_string(),
            ]
        })
        .collect();

    for replica in &replicas {
        replica.shutdown().await?;
    }
    if let Some(path) = &args.save {
        store.save_to_file(path).await?;
        info!(path = %path.display(), "Saved store");
    }

    match format {
        OutputFormat::Human => {
            print_table(&["REPLICA", "VISIBLE", "LOG", "PENDING"], &rows);
            println!();
            println!("Intents:     {}", args.operations - refused);
            for (kind, count) in &issued {
                println!("  {kind:<10} {count}");
            }
            println!("Refused:     {refused}");
            println!("Broadcasts:  {}", bus.delivered());
            println!("Pulled:      {applied_by_sync}");
            println!("Visible:     {visible}");
            println!("Converged:   {}", if converged { "yes" } else { "no" });
        }
        OutputFormat::Json => {
            let value = serde_json::json!({
                "seed": args.seed,
                "replicas": args.replicas,
                "intents": issued,
                "refused": refused,
                "broadcasts": bus.delivered(),
                "pulled": applied_by_sync,
                "visible": visible,
                "converged": converged,
            });
            println!("{}", serde_json::to_string(&value)?);
        }
    }

    if !converged {
        return Err("replicas diverged".into());
    }
    Ok(())
}

/// Issue one random intent on `replica`, returning the kind of operation issued.
async fn random_intent(replica: &Replica, rng: &mut StdRng) -> arbor::Result<String> {
    let (live, deleted): (Vec<TreeNode>, Vec<TreeNode>) = replica.inspect(|tree| {
        tree.nodes()
            .filter(|n| tree.is_visible(&n.id) || n.deleted)
            .map(|n| TreeNode::clone(n))
            .partition(|n| !n.deleted)
    });
    let folders: Vec<NodeId> = live.iter().filter(|n| n.is_folder()).map(|n| n.id).collect();
    let parent = if rng.gen_bool(0.3) {
        None
    } else {
        folders.choose(rng).copied()
    };
    let name = format!("n{}", rng.gen_range(0..100));

    let mutation = match rng.gen_range(0..10) {
        0..=2 => replica.create_folder(name, parent).await?,
        3..=4 => replica.create_file(name, parent).await?,
        5 => match live.choose(rng) {
            Some(node) => replica.rename(node.id, name).await?,
            None => replica.create_folder(name, None).await?,
        },
        6..=7 => match live.choose(rng) {
            Some(node) => replica.move_node(node.id, parent).await?,
            None => replica.create_folder(name, None).await?,
        },
        8 => match live.choose(rng) {
            Some(node) => replica.delete(node.id).await?,
            None => replica.create_file(name, None).await?,
        },
        _ => match deleted.choose(rng) {
            Some(node) => replica.undelete(node.id, parent).await?,
            None => replica.create_file(name, None).await?,
        },
    };
    Ok(mutation.operation.kind().to_string())
}
