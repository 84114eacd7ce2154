//! Loading saved stores.

use std::path::Path;
use std::sync::Arc;

use arbor::backend::InMemory;

/// Load the in-memory store persisted at `path`.
pub async fn load_store(path: &Path) -> Result<Arc<InMemory>, Box<dyn std::error::Error>> {
    if !tokio::fs::try_exists(path).await? {
        return Err(format!("no store found at {}", path.display()).into());
    }
    let store = InMemory::load_from_file(path).await?;
    tracing::info!(
        path = %path.display(),
        operations = store.operation_count().await,
        "Loaded store"
    );
    Ok(Arc::new(store))
}
