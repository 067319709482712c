//! CLI command implementations.

pub mod compact;
pub mod dirty;
pub mod get;
pub mod inspect;

use localsync_storage::FileStore;
use std::path::Path;

/// Opens an existing store file.
///
/// Refuses to create a new file, so a mistyped path is reported instead of
/// silently inspected as an empty store.
pub fn open_store(path: &Path) -> Result<FileStore, Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("No store file found at {}", path.display()).into());
    }
    Ok(FileStore::open(path)?)
}
