//! # localsync Storage
//!
//! Durable key-value stores backing the localsync cache.
//!
//! Stores are **opaque byte maps**: they never interpret the values they
//! hold. The reconciliation engine in `localsync_core` owns the layout
//! (entity snapshots, collection key lists, the dirty-operation queue).
//!
//! ## Design Principles
//!
//! - A store is a flat `key -> bytes` map with `get`, `put` and `delete`
//! - Sequential `put`/`get` from one thread always observe each other
//! - Must be `Send + Sync`; implementations lock internally
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral caches
//! - [`FileStore`] - Append-only log file that survives process restarts
//!
//! ## Example
//!
//! ```rust
//! use localsync_storage::{InMemoryStore, LocalStore};
//!
//! let store = InMemoryStore::new();
//! store.put("book/4", br#"{"id":4}"#).unwrap();
//! assert_eq!(store.get("book/4").unwrap().as_deref(), Some(&br#"{"id":4}"#[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod record;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use record::{LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION};
pub use store::LocalStore;
