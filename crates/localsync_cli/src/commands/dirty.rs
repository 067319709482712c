//! Dirty command implementation.

use localsync_core::{DirtyQueue, Method, StorageKey};
use localsync_storage::FileStore;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// One queued operation.
#[derive(Debug, Serialize)]
pub struct DirtyEntry {
    /// Storage key the operation is filed under.
    pub key: String,
    /// Timestamp of the failed attempt.
    pub timestamp: u64,
    /// Method that failed.
    pub method: Method,
    /// Attributes sent with the attempt.
    pub data: Value,
}

/// Runs the dirty command.
pub fn run(
    path: &Path,
    queue_key: &str,
    key: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(path)?;
    let entries = list(&store, queue_key, key)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            if entries.is_empty() {
                println!("No queued operations");
            }
            for entry in &entries {
                println!(
                    "{:<24} {:>14}  {:<7} {}",
                    entry.key,
                    entry.timestamp,
                    entry.method.as_str(),
                    entry.data
                );
            }
        }
    }

    Ok(())
}

/// Lists queued operations, oldest first per key, optionally for one key.
pub fn list(store: &FileStore, queue_key: &str, key: Option<&str>) -> Result<Vec<DirtyEntry>, Box<dyn std::error::Error>> {
    let queue = DirtyQueue::new(store, queue_key);

    let keys: Vec<StorageKey> = match key {
        Some(key) => vec![StorageKey::from(key)],
        None => queue.snapshot()?.into_keys().collect(),
    };

    let mut entries = Vec::new();
    for key in keys {
        for (timestamp, op) in queue.pending_for(&key)? {
            entries.push(DirtyEntry {
                key: key.to_string(),
                timestamp,
                method: op.method,
                data: Value::Object(op.payload),
            });
        }
    }
    Ok(entries)
}
