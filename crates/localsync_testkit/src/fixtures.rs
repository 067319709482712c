//! Test fixtures and cache helpers.
//!
//! Provides convenience functions for setting up caches over in-memory and
//! file-backed stores in front of a [`FauxServer`].

use crate::faux_server::FauxServer;
use localsync_core::{Attributes, CacheConfig, KeyGenerator, LocalCache, Record};
use localsync_storage::{FileStore, InMemoryStore};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Converts a JSON object literal into [`Attributes`].
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A new, unsaved book.
pub fn new_book(title: &str, author: &str) -> Record {
    let mut book = Record::new("book");
    book.insert("title", title);
    book.insert("author", author);
    book
}

/// A book handle carrying only its remote id.
pub fn book_with_id(id: u64) -> Record {
    let mut book = Record::new("book");
    book.insert("id", id);
    book
}

/// Cache configuration with deterministic `tmp-<n>` local keys.
pub fn test_config() -> CacheConfig {
    CacheConfig::new().with_key_generator(KeyGenerator::sequential("tmp"))
}

/// A cache over an in-memory store in front of `server`.
pub fn memory_cache(server: &FauxServer) -> LocalCache<InMemoryStore, &FauxServer> {
    LocalCache::with_config(Arc::new(InMemoryStore::new()), server, test_config())
}

/// A temporary directory holding one store file, removed on drop.
///
/// Open the store, drop it, and open it again to simulate a restart.
pub struct TempStoreDir {
    path: PathBuf,
    _temp_dir: TempDir,
}

impl TempStoreDir {
    /// Creates a fresh temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("cache").join("localsync.log");
        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the store file, creating it on first use.
    ///
    /// # Panics
    ///
    /// Panics if the store cannot be opened, e.g. while another handle
    /// still holds its lock.
    pub fn open(&self) -> Arc<FileStore> {
        Arc::new(FileStore::open_with_create_dirs(&self.path).expect("Failed to open file store"))
    }
}

impl Default for TempStoreDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f` with a cache over an in-memory store and a seeded book server.
pub fn with_book_cache<F, R>(f: F) -> R
where
    F: FnOnce(&LocalCache<InMemoryStore, &FauxServer>, &FauxServer) -> R,
{
    let server = FauxServer::with_books();
    let cache = memory_cache(&server);
    f(&cache, &server)
}
