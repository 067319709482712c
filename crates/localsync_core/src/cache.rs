//! The public cache facade.

use crate::config::{CacheConfig, OperationConfig};
use crate::dirty::{DirtyQueue, PendingOp};
use crate::entity::{Collection, Entity};
use crate::error::{SyncError, SyncResult};
use crate::json::JsonStoreExt;
use crate::key::StorageKeyResolver;
use crate::replay::{DrainReport, ReplayCoordinator};
use crate::router::{OperationRouter, Outcome, Source};
use crate::transport::{RemoteExecutor, RemoteRequest};
use crate::types::{Attributes, Method, StorageKey, Timestamp};
use localsync_storage::LocalStore;
use serde_json::Value;
use std::sync::Arc;

/// Local-first cache in front of a remote resource store.
///
/// Every operation takes an [`OperationConfig`] deciding which stores it
/// touches. Remote write failures never lose data: the operation is queued
/// and replayed before the entity's next local+remote operation.
///
/// # Example
///
/// ```rust
/// use localsync_core::{Entity, LocalCache, MockExecutor, OperationConfig, Record, Source};
/// use localsync_storage::InMemoryStore;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let remote = MockExecutor::new();
/// let cache = LocalCache::new(Arc::new(InMemoryStore::new()), &remote);
///
/// let mut book = Record::new("book");
/// book.insert("title", "The Grapes of Wrath");
///
/// remote.set_online(false);
/// let outcome = cache.save(&mut book, None, OperationConfig::save()).unwrap();
/// assert_eq!(outcome.source, Source::LocalFallback);
/// assert_eq!(cache.dirty_queue().total_pending().unwrap(), 1);
///
/// remote.set_online(true);
/// remote.push_reply(json!({"id": 1, "title": "The Grapes of Wrath"}));
/// cache.save(&mut book, None, OperationConfig::save()).unwrap();
/// assert_eq!(book.remote_id().as_deref(), Some("1"));
/// assert_eq!(cache.dirty_queue().total_pending().unwrap(), 0);
/// ```
pub struct LocalCache<S: LocalStore, X: RemoteExecutor> {
    store: Arc<S>,
    executor: X,
    dirty: DirtyQueue<Arc<S>>,
    keys: StorageKeyResolver,
    config: CacheConfig,
}

impl<S: LocalStore, X: RemoteExecutor> LocalCache<S, X> {
    /// Creates a cache with the default [`CacheConfig`].
    pub fn new(store: Arc<S>, executor: X) -> Self {
        Self::with_config(store, executor, CacheConfig::default())
    }

    /// Creates a cache with a custom configuration.
    pub fn with_config(store: Arc<S>, executor: X, config: CacheConfig) -> Self {
        let dirty = DirtyQueue::new(Arc::clone(&store), config.dirty_queue_key.clone());
        let keys = StorageKeyResolver::new(config.key_generator.clone());
        Self {
            store,
            executor,
            dirty,
            keys,
            config,
        }
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the remote executor.
    pub fn executor(&self) -> &X {
        &self.executor
    }

    /// Returns the dirty-operation queue.
    pub fn dirty_queue(&self) -> &DirtyQueue<Arc<S>> {
        &self.dirty
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the storage key of `entity`, assigning a local one if needed.
    pub fn storage_key<E: Entity + ?Sized>(&self, entity: &mut E) -> StorageKey {
        self.keys.resolve(entity)
    }

    /// Returns the queued operations of `entity`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be loaded.
    pub fn pending_for<E: Entity + ?Sized>(&self, entity: &E) -> SyncResult<Vec<(Timestamp, PendingOp)>> {
        match self.keys.peek(entity) {
            Some(key) => self.dirty.pending_for(&key),
            None => Ok(Vec::new()),
        }
    }

    fn router(&self) -> OperationRouter<'_, Arc<S>, X> {
        OperationRouter::new(
            &self.store,
            &self.executor,
            &self.dirty,
            &self.keys,
            self.config.parallel_replay,
        )
    }

    /// Loads `entity` and applies the result to it.
    ///
    /// With the remote disabled this reads the cached snapshot. Otherwise the
    /// remote is read (after draining the dirty queue when `auto_sync` is
    /// set). With `cache` the resulting snapshot is stored locally, even when
    /// `local` is off. Read failures are returned, never queued.
    ///
    /// # Errors
    ///
    /// See [`OperationRouter::route`]. A response that is not a JSON object
    /// yields [`SyncError::UnexpectedPayload`].
    pub fn fetch<E: Entity + ?Sized>(&self, entity: &mut E, config: OperationConfig) -> SyncResult<Outcome> {
        let outcome = self
            .router()
            .route(Method::Read, entity, Attributes::new(), &config)?;

        let attrs = expect_object(&outcome.data, "fetch")?;
        entity.set(attrs);
        self.settle_key(entity)?;

        if config.cache {
            let key = self.keys.resolve(entity);
            self.store.put_json(key.as_str(), &entity.snapshot())?;
        }
        Ok(outcome)
    }

    /// Saves `entity`, first merging `attrs` into it.
    ///
    /// A new entity is created remotely (or stored under its generated key
    /// when the remote is disabled); an identified one is updated, or patched
    /// with just `attrs` when `patch` is set. A remote failure is queued and,
    /// with the local store enabled, reported as success carrying the locally
    /// applied data. Once the entity has a remote identity its snapshot moves
    /// from the generated key to the resource path, along with any queued
    /// operations.
    ///
    /// # Errors
    ///
    /// See [`OperationRouter::route`].
    pub fn save<E: Entity + ?Sized>(
        &self,
        entity: &mut E,
        attrs: Option<Attributes>,
        config: OperationConfig,
    ) -> SyncResult<Outcome> {
        config.validate()?;
        if let Some(attrs) = &attrs {
            entity.set(attrs);
        }

        let method = if entity.is_new() && (config.remote || !config.patch) {
            Method::Create
        } else if config.patch {
            Method::Patch
        } else {
            Method::Update
        };
        let payload = match (method, attrs) {
            (Method::Patch, Some(attrs)) => attrs,
            _ => entity.snapshot(),
        };

        let patched = (method == Method::Patch).then(|| payload.clone());
        let outcome = self.router().route(method, entity, payload, &config)?;

        if outcome.source == Source::Remote {
            if let Value::Object(server) = &outcome.data {
                entity.set(server);
            }
        }
        self.settle_key(entity)?;

        if config.cache {
            let key = self.keys.resolve(entity);
            let snapshot = match patched {
                // Only the patched attributes and the server's answer reach
                // the stored snapshot, never unsaved in-memory state.
                Some(patched) => {
                    let mut stored: Attributes = self.store.get_json(key.as_str())?.unwrap_or_default();
                    stored.extend(patched);
                    if outcome.source == Source::Remote {
                        if let Value::Object(server) = &outcome.data {
                            stored.extend(server.clone());
                        }
                    }
                    stored
                }
                None => entity.snapshot(),
            };
            self.store.put_json(key.as_str(), &snapshot)?;
        }
        Ok(outcome)
    }

    /// Deletes `entity` locally and remotely.
    ///
    /// An entity the remote has never seen is only removed locally.
    ///
    /// # Errors
    ///
    /// See [`OperationRouter::route`].
    pub fn destroy<E: Entity + ?Sized>(&self, entity: &mut E, config: OperationConfig) -> SyncResult<Outcome> {
        config.validate()?;

        let config = if entity.is_new() {
            config.remote(false)
        } else {
            config
        };
        if !config.local && !config.remote {
            tracing::debug!(url_root = entity.url_root(), "destroying unsaved entity; nothing to do");
            return Ok(Outcome {
                data: Value::Null,
                source: Source::Local,
                storage_key: None,
                drain: None,
            });
        }

        let snapshot = entity.snapshot();
        let outcome = self.router().route(Method::Delete, entity, snapshot, &config)?;
        self.settle_key(entity)?;
        Ok(outcome)
    }

    /// Fetches `entity`; if that fails for any reason, saves it instead.
    ///
    /// # Errors
    ///
    /// Returns the error of the save, if it fails too.
    pub fn fetch_or_save<E: Entity + ?Sized>(
        &self,
        entity: &mut E,
        attrs: Option<Attributes>,
        config: OperationConfig,
    ) -> SyncResult<Outcome> {
        match self.fetch(entity, config) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::debug!(error = %err, "fetch failed; falling back to save");
                self.save(entity, attrs, config)
            }
        }
    }

    /// Loads a whole collection.
    ///
    /// With the remote disabled the member list is rebuilt from the cached
    /// key list at the collection path; listed keys with no snapshot are
    /// skipped. Otherwise the remote is read. With `cache`, each member
    /// snapshot plus the key list are stored. Caching is best effort: members
    /// that cannot be stored are logged and left out of the key list.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotFoundLocal`] for a local-only fetch with no key list.
    /// - [`SyncError::RemoteFailure`] if the remote read fails.
    /// - [`SyncError::UnexpectedPayload`] if the remote does not return an
    ///   array of objects.
    pub fn fetch_collection(&self, collection: &mut Collection, config: OperationConfig) -> SyncResult<Outcome> {
        config.validate()?;
        let url = collection.url().to_string();

        let (snapshots, source) = if config.remote {
            let data = self.executor.execute(&RemoteRequest::read_collection(url.as_str()))?;
            (expect_array_of_objects(data, &url)?, Source::Remote)
        } else {
            (self.read_cached_collection(&url)?, Source::Local)
        };

        collection.reset(snapshots);
        if config.cache {
            self.cache_members(collection);
        }

        let data = Value::Array(
            collection
                .members()
                .iter()
                .map(|member| Value::Object(member.snapshot()))
                .collect(),
        );
        Ok(Outcome {
            data,
            source,
            storage_key: config.local.then(|| StorageKey::new(url)),
            drain: None,
        })
    }

    /// Replays the dirty queue of `entity` without running a new operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be loaded or updated.
    pub fn sync<E: Entity + ?Sized>(&self, entity: &mut E) -> SyncResult<DrainReport> {
        let key = self.keys.resolve(entity);
        let coordinator = ReplayCoordinator::new(&self.dirty, &self.executor, self.config.parallel_replay);
        let report = coordinator.drain(&key, entity)?;
        self.settle_key(entity)?;
        Ok(report)
    }

    /// Moves local state off the generated key once the entity has a remote
    /// identity.
    fn settle_key<E: Entity + ?Sized>(&self, entity: &E) -> SyncResult<()> {
        let Some((old, new)) = self.keys.migration(entity) else {
            return Ok(());
        };

        if let Some(snapshot) = self.store.get(old.as_str())? {
            if !self.store.contains(new.as_str())? {
                self.store.put(new.as_str(), &snapshot)?;
            }
            self.store.delete(old.as_str())?;
        }
        let moved = self.dirty.rekey(&old, &new)?;
        if moved > 0 {
            tracing::debug!(from = %old, to = %new, moved, "moved queued operations to resource key");
        }
        Ok(())
    }

    fn read_cached_collection(&self, url: &str) -> SyncResult<Vec<Attributes>> {
        let keys: Vec<String> = self
            .store
            .get_json(url)?
            .ok_or_else(|| SyncError::NotFoundLocal { key: url.to_string() })?;

        let mut snapshots = Vec::with_capacity(keys.len());
        for key in keys {
            match self.store.get_json::<Attributes>(&key) {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                Ok(None) => tracing::debug!(collection = url, key = %key, "listed member not cached; skipping"),
                Err(err) => tracing::warn!(collection = url, key = %key, error = %err, "unreadable cached member; skipping"),
            }
        }
        Ok(snapshots)
    }

    fn cache_members(&self, collection: &mut Collection) {
        let url = collection.url().to_string();
        let mut listed = Vec::with_capacity(collection.len());

        for member in collection.members_mut() {
            let key = self.keys.resolve(member);
            match self.store.put_json(key.as_str(), &member.snapshot()) {
                Ok(()) => listed.push(key.to_string()),
                Err(err) => tracing::warn!(collection = %url, key = %key, error = %err, "failed to cache member"),
            }
        }

        if let Err(err) = self.store.put_json(&url, &listed) {
            tracing::warn!(collection = %url, error = %err, "failed to cache collection key list");
        }
    }
}

fn expect_object<'v>(data: &'v Value, context: &str) -> SyncResult<&'v Attributes> {
    data.as_object()
        .ok_or_else(|| SyncError::UnexpectedPayload(format!("{context}: expected an object, got {data}")))
}

fn expect_array_of_objects(data: Value, context: &str) -> SyncResult<Vec<Attributes>> {
    let Value::Array(items) = data else {
        return Err(SyncError::UnexpectedPayload(format!("{context}: expected an array")));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(attrs) => Ok(attrs),
            other => Err(SyncError::UnexpectedPayload(format!(
                "{context}: expected object members, got {other}"
            ))),
        })
        .collect()
}
