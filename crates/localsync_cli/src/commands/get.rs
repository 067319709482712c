//! Get command implementation.

use localsync_storage::{FileStore, LocalStore};
use serde_json::Value;
use std::path::Path;

/// Runs the get command.
pub fn run(path: &Path, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(path)?;
    println!("{}", render(&store, key)?);
    Ok(())
}

/// Returns the value under `key`: pretty JSON if it parses, raw text
/// otherwise.
pub fn render(store: &FileStore, key: &str) -> Result<String, Box<dyn std::error::Error>> {
    let bytes = store
        .get(key)?
        .ok_or_else(|| format!("No value stored under {key:?}"))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => Ok(serde_json::to_string_pretty(&value)?),
        Err(_) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
    }
}
