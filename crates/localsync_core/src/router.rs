//! Per-method dispatch between the local store and the remote.

use crate::config::OperationConfig;
use crate::dirty::DirtyQueue;
use crate::entity::Entity;
use crate::error::{SyncError, SyncResult};
use crate::json::JsonStoreExt;
use crate::key::StorageKeyResolver;
use crate::replay::{DrainReport, ReplayCoordinator};
use crate::transport::{RemoteExecutor, RemoteRequest};
use crate::types::{Attributes, Method, StorageKey};
use localsync_storage::LocalStore;
use serde_json::Value;

/// Where the data reported to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The remote answered.
    Remote,
    /// Only the local store was involved.
    Local,
    /// The remote failed; the locally applied data stands in for its answer.
    LocalFallback,
}

/// Successful result of one routed operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Response body, cached snapshot, or locally applied data.
    pub data: Value,
    /// Where `data` came from.
    pub source: Source,
    /// Storage key used, when the local store participated.
    pub storage_key: Option<StorageKey>,
    /// What the pre-operation drain did, if one ran.
    pub drain: Option<DrainReport>,
}

impl Outcome {
    fn new(data: Value, source: Source) -> Self {
        Self {
            data,
            source,
            storage_key: None,
            drain: None,
        }
    }

    /// Returns the data as an attribute map, if it is a JSON object.
    pub fn attributes(&self) -> Option<&Attributes> {
        self.data.as_object()
    }
}

/// Decides, per method and configuration, what touches the local store and
/// what goes to the remote.
///
/// | method        | local                         | remote                     |
/// |---------------|-------------------------------|----------------------------|
/// | create/update | store snapshot                | execute; queue on failure  |
/// | read          | cached snapshot (remote off)  | execute; failures surfaced |
/// | patch         | merge into stored snapshot    | execute; queue on failure  |
/// | delete        | remove snapshot               | execute; queue on failure  |
///
/// A failed remote write is always queued. With the local store enabled the
/// caller still sees success, carrying the locally applied data.
pub struct OperationRouter<'a, S: LocalStore, X: RemoteExecutor> {
    store: &'a S,
    executor: &'a X,
    dirty: &'a DirtyQueue<S>,
    keys: &'a StorageKeyResolver,
    parallel_replay: bool,
}

impl<'a, S: LocalStore, X: RemoteExecutor> OperationRouter<'a, S, X> {
    /// Creates a router over borrowed engine parts.
    pub fn new(
        store: &'a S,
        executor: &'a X,
        dirty: &'a DirtyQueue<S>,
        keys: &'a StorageKeyResolver,
        parallel_replay: bool,
    ) -> Self {
        Self {
            store,
            executor,
            dirty,
            keys,
            parallel_replay,
        }
    }

    /// Routes `method` for `entity`, draining its dirty queue first when the
    /// configuration asks for it.
    ///
    /// `payload` is the full snapshot for create/update and the changed
    /// attributes for patch; reads and deletes ignore it remotely.
    ///
    /// Only writes are queued. A failed remote read returns its error and
    /// leaves the dirty queue untouched; entries carrying [`Method::Read`]
    /// are still replayed if an older queue holds them.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidConfig`] if neither store is enabled.
    /// - [`SyncError::IdentityMissing`] for a remote read of a new entity.
    /// - [`SyncError::NotFoundLocal`] for a local-only read with nothing cached.
    /// - [`SyncError::RemoteFailure`] for failed reads, and for failed writes
    ///   when the local store is disabled.
    pub fn route<E: Entity + ?Sized>(
        &self,
        method: Method,
        entity: &mut E,
        payload: Attributes,
        config: &OperationConfig,
    ) -> SyncResult<Outcome> {
        config.validate()?;

        if !config.drains() {
            return self.dispatch(method, entity, payload, config);
        }

        let key = self.keys.resolve(entity);
        let coordinator = ReplayCoordinator::new(self.dirty, self.executor, self.parallel_replay);
        let replayed = coordinator.run(&key, entity, |entity| {
            // A replayed create may have given the entity its identity.
            if method == Method::Create && !entity.is_new() {
                tracing::debug!(key = %key, "entity acquired identity during drain; saving as update");
                let snapshot = entity.snapshot();
                self.dispatch(Method::Update, entity, snapshot, config)
            } else {
                self.dispatch(method, entity, payload, config)
            }
        });

        let mut outcome = replayed.result?;
        outcome.drain = Some(replayed.report);
        Ok(outcome)
    }

    fn dispatch<E: Entity + ?Sized>(
        &self,
        method: Method,
        entity: &mut E,
        payload: Attributes,
        config: &OperationConfig,
    ) -> SyncResult<Outcome> {
        let key = self.keys.resolve(entity);

        let mut outcome = match method {
            Method::Read => self.read(entity, &key, config)?,
            Method::Create | Method::Update => {
                if config.local {
                    self.store.put_json(key.as_str(), &payload)?;
                }
                let applied = Value::Object(payload.clone());
                self.write(method, entity, &key, payload, applied, config)?
            }
            Method::Patch => {
                let applied = if config.local {
                    let mut stored: Attributes = self.store.get_json(key.as_str())?.unwrap_or_default();
                    for (name, value) in &payload {
                        stored.insert(name.clone(), value.clone());
                    }
                    self.store.put_json(key.as_str(), &stored)?;
                    Value::Object(stored)
                } else {
                    Value::Object(payload.clone())
                };
                self.write(method, entity, &key, payload, applied, config)?
            }
            Method::Delete => {
                if config.local {
                    self.store.delete(key.as_str())?;
                }
                self.write(method, entity, &key, payload, Value::Null, config)?
            }
        };

        if config.local {
            outcome.storage_key = Some(key);
        }
        Ok(outcome)
    }

    fn read<E: Entity + ?Sized>(
        &self,
        entity: &E,
        key: &StorageKey,
        config: &OperationConfig,
    ) -> SyncResult<Outcome> {
        if config.remote {
            if entity.is_new() {
                return Err(SyncError::IdentityMissing(entity.url_root().to_string()));
            }
            let request = RemoteRequest::for_entity(Method::Read, entity, Attributes::new());
            let data = self.executor.execute(&request)?;
            return Ok(Outcome::new(data, Source::Remote));
        }

        match self.store.get_json::<Value>(key.as_str())? {
            Some(data) => Ok(Outcome::new(data, Source::Local)),
            None => Err(SyncError::NotFoundLocal {
                key: key.to_string(),
            }),
        }
    }

    fn write<E: Entity + ?Sized>(
        &self,
        method: Method,
        entity: &E,
        key: &StorageKey,
        payload: Attributes,
        applied: Value,
        config: &OperationConfig,
    ) -> SyncResult<Outcome> {
        if !config.remote {
            return Ok(Outcome::new(applied, Source::Local));
        }

        let request = RemoteRequest::for_entity(method, entity, payload.clone());
        match self.executor.execute(&request) {
            Ok(data) => Ok(Outcome::new(data, Source::Remote)),
            Err(err) if err.is_remote() => {
                let timestamp = self.dirty.record_failure(key, method, payload)?;
                if config.local {
                    tracing::warn!(
                        key = %key,
                        method = %method,
                        timestamp,
                        error = %err,
                        "remote write failed; applied locally and queued for replay"
                    );
                    Ok(Outcome::new(applied, Source::LocalFallback))
                } else {
                    tracing::warn!(key = %key, method = %method, timestamp, error = %err, "remote write failed; queued for replay");
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }
}
