//! Loads records into the store from a JSON file.
//!
//! The file holds an array of objects, each carrying its `kind`:
//!
//! ```json
//! [
//!   {"kind": "ContactGroup", "metadata": {"name": "newsletter", "namespace": "default"},
//!    "spec": {"providers": [{"name": "Loops", "id": "clx..."}]}},
//!   {"kind": "Contact", "metadata": {"name": "newsletter-alice", "namespace": "default"},
//!    "spec": {"email": "alice@example.com"}}
//! ]
//! ```

use std::path::Path;

use anyhow::{Context, bail};
use loops_storage::DynStore;
use serde_json::Value;
use tracing::{info, warn};

/// Create every record in `path`. Records that already exist are skipped.
/// Returns the number created.
pub async fn load_seed(store: &DynStore, path: &Path) -> anyhow::Result<usize> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    let records: Vec<Value> = serde_json::from_str(&raw)
        .with_context(|| format!("seed file {} must be a JSON array of objects", path.display()))?;

    let mut created = 0;
    for (i, record) in records.iter().enumerate() {
        let Some(kind) = record.get("kind").and_then(Value::as_str) else {
            bail!("seed record #{i} has no kind");
        };
        match store.create(kind, record).await {
            Ok(stored) => {
                created += 1;
                info!(kind, key = %stored.key, "seeded record");
            }
            Err(err) if err.is_already_exists() => {
                warn!(kind, record = i, "seed record already exists, skipping");
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to seed record #{i} ({kind})"));
            }
        }
    }
    Ok(created)
}
