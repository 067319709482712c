//! Inspect command implementation.

use localsync_core::{DirtyQueue, JsonStoreExt};
use localsync_storage::{FileStore, LocalStore};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store file path.
    pub path: String,
    /// Log file size in bytes.
    pub log_size: u64,
    /// Number of live keys, including the dirty queue.
    pub key_count: usize,
    /// Superseded or deleted records a compaction would drop.
    pub dead_records: u64,
    /// Keys holding a JSON object (entity snapshots).
    pub snapshot_count: usize,
    /// Keys holding a JSON array of strings (collection key lists).
    pub collection_count: usize,
    /// Storage keys with queued operations.
    pub dirty_entities: usize,
    /// Queued operations in total.
    pub dirty_operations: usize,
    /// All live keys (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, queue_key: &str, show_keys: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(path)?;
    let result = collect(&store, queue_key, show_keys)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Gathers statistics about an open store.
pub fn collect(store: &FileStore, queue_key: &str, show_keys: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let keys = store.keys()?;
    let mut snapshot_count = 0;
    let mut collection_count = 0;

    for key in keys.iter().filter(|k| k.as_str() != queue_key) {
        match store.get_json::<Value>(key) {
            Ok(Some(Value::Object(_))) => snapshot_count += 1,
            Ok(Some(Value::Array(items))) if items.iter().all(Value::is_string) => collection_count += 1,
            Ok(_) => {}
            Err(err) => tracing::debug!(key = %key, error = %err, "value is not JSON"),
        }
    }

    let queue = DirtyQueue::new(store, queue_key);
    let snapshot = queue.snapshot()?;

    Ok(InspectResult {
        path: store.path().display().to_string(),
        log_size: store.log_size(),
        key_count: keys.len(),
        dead_records: store.dead_records(),
        snapshot_count,
        collection_count,
        dirty_entities: snapshot.len(),
        dirty_operations: snapshot.values().map(|ops| ops.len()).sum(),
        keys: show_keys.then_some(keys),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("localsync store: {}", result.path);
    println!();
    println!("Log:");
    println!("  Size:          {} bytes", result.log_size);
    println!("  Dead records:  {}", result.dead_records);
    println!();
    println!("Contents:");
    println!("  Keys:          {}", result.key_count);
    println!("  Snapshots:     {}", result.snapshot_count);
    println!("  Collections:   {}", result.collection_count);
    println!();
    println!("Dirty queue:");
    println!("  Entities:      {}", result.dirty_entities);
    println!("  Operations:    {}", result.dirty_operations);

    if let Some(keys) = &result.keys {
        println!();
        println!("Keys:");
        for key in keys {
            println!("  {key}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localsync_core::{Method, StorageKey};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn counts_snapshots_lists_and_queue() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(&dir.path().join("store.log")).unwrap();

        store.put_json("book/1", &json!({"id": 1})).unwrap();
        store.put_json("book/2", &json!({"id": 2})).unwrap();
        store.put_json("book", &json!(["book/1", "book/2"])).unwrap();
        store.put_json("book/1", &json!({"id": 1, "title": "T"})).unwrap();

        let queue = DirtyQueue::new(&store, "dirtyModels");
        let payload = json!({"id": 2}).as_object().cloned().unwrap();
        queue
            .record_failure(&StorageKey::from("book/2"), Method::Delete, payload)
            .unwrap();

        let result = collect(&store, "dirtyModels", true).unwrap();
        assert_eq!(result.key_count, 4);
        assert_eq!(result.snapshot_count, 2);
        assert_eq!(result.collection_count, 1);
        assert_eq!(result.dirty_entities, 1);
        assert_eq!(result.dirty_operations, 1);
        assert_eq!(result.dead_records, 1);
        assert_eq!(result.keys.unwrap().len(), 4);
    }
}
