//! # LocalSync Core
//!
//! Local-first reconciliation engine for REST-style resources.
//!
//! This crate provides:
//! - A cache facade with per-call local/remote routing ([`LocalCache`])
//! - Storage key resolution for entities with and without remote identity
//! - A persistent dirty-operation queue for remote writes that failed
//! - Drain-before-write replay of queued operations
//! - An HTTP executor over a pluggable client
//!
//! ## Model
//!
//! Every operation carries an [`OperationConfig`]: `local` and `remote`
//! choose the stores involved, `cache` stores remote answers locally,
//! `auto_sync` drains the entity's queue first and `patch` turns a save
//! into a partial update.
//!
//! ## Key Invariants
//!
//! - A remote write failure is never lost: it is queued under the entity's
//!   storage key with a unique, increasing timestamp
//! - A queued operation leaves the queue only after its replay succeeded
//! - Read failures are surfaced, never queued
//! - An entity keeps its generated key until the remote assigns an identity;
//!   then its snapshot and queue move to the resource path

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod dirty;
mod entity;
mod error;
mod http;
mod json;
mod key;
mod replay;
mod router;
mod transport;
mod types;

pub use cache::LocalCache;
pub use config::{CacheConfig, ConfigOverrides, KeyGenerator, OperationConfig, Verb, DEFAULT_DIRTY_QUEUE_KEY};
pub use dirty::{DirtyMap, DirtyQueue, EntityQueue, PendingOp};
pub use entity::{join_path, Collection, Entity, Record, DEFAULT_ID_ATTRIBUTE};
pub use error::{SyncError, SyncResult};
pub use http::{http_method, HttpClient, HttpExecutor, HttpResponse};
pub use json::JsonStoreExt;
pub use key::StorageKeyResolver;
pub use replay::{DrainReport, ReplayCoordinator, ReplayState, Replayed};
pub use router::{OperationRouter, Outcome, Source};
pub use transport::{MockExecutor, RemoteExecutor, RemoteRequest};
pub use types::{Attributes, Method, StorageKey, Timestamp};
