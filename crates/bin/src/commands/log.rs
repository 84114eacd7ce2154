//! Print stored operations in the order every replica applies them.

use arbor::{Timestamp, backend::BackendImpl};

use crate::cli::LogArgs;
use crate::output::{OutputFormat, print_table};
use crate::store::load_store;

/// Run the log command
pub async fn run(args: &LogArgs, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let store = load_store(&args.data).await?;
    let ops = match args.since {
        Some(raw) => store.operations_since(Timestamp::from_raw(raw)).await?,
        None => store.all_operations().await?,
    };

    match format {
        OutputFormat::Human => {
            let rows: Vec<Vec<String>> = ops
                .iter()
                .map(|op| {
                    vec![
                        op.timestamp.to_string(),
                        op.replica_id.to_string(),
                        op.kind().to_string(),
                        op.node_id.to_string(),
                        op.name.clone(),
                    ]
                })
                .collect();
            print_table(&["TIMESTAMP", "REPLICA", "KIND", "NODE", "NAME"], &rows);
            println!("{} operations", ops.len());
        }
        OutputFormat::Json => {
            for op in &ops {
                println!("{}", op.to_json()?);
            }
        }
    }
    Ok(())
}
