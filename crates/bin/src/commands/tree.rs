//! Print the visible tree of a recovered replica.

use std::sync::Arc;

use arbor::{Replica, ReplicaConfig, tree::SnapshotNode, transport::NullTransport};

use crate::cli::TreeArgs;
use crate::output::OutputFormat;
use crate::store::load_store;

/// Run the tree command
pub async fn run(args: &TreeArgs, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let store = load_store(&args.data).await?;
    let replica = Replica::open(
        ReplicaConfig::new(args.replica.as_str()),
        store,
        Arc::new(NullTransport),
    )
    .await?;
    let snapshot = replica.snapshot();

    match format {
        OutputFormat::Human => {
            println!("/");
            print_nodes(&snapshot.nodes, 1);
            println!();
            println!("{} visible nodes", snapshot.count());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
    }
    Ok(())
}

fn print_nodes(nodes: &[SnapshotNode], depth: usize) {
    for node in nodes {
        let suffix = if node.node_type.is_folder() { "/" } else { "" };
        println!("{}{}{suffix}", "  ".repeat(depth), node.name);
        print_nodes(&node.children, depth + 1);
    }
}
