//! Durable queue of remote operations that failed and await replay.

use crate::error::{SyncError, SyncResult};
use crate::json::JsonStoreExt;
use crate::types::{Attributes, Method, StorageKey, Timestamp};
use localsync_storage::LocalStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A remote operation that was attempted and failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOp {
    /// The method that failed.
    pub method: Method,
    /// Attribute snapshot sent with the attempt.
    #[serde(rename = "data", alias = "payload")]
    pub payload: Attributes,
}

impl PendingOp {
    /// Creates a pending operation.
    pub fn new(method: Method, payload: Attributes) -> Self {
        Self { method, payload }
    }
}

/// Per-entity pending operations, keyed by attempt timestamp.
pub type EntityQueue = BTreeMap<Timestamp, PendingOp>;

/// The whole persisted queue: storage key to that entity's pending operations.
pub type DirtyMap = BTreeMap<StorageKey, EntityQueue>;

/// Durable per-entity log of failed remote operations.
///
/// The queue is persisted as a single JSON document under one store key
/// (`"dirtyModels"` by default):
///
/// ```text
/// { "<storage key>": { "<timestamp>": { "method": "update", "data": { ... } } } }
/// ```
///
/// # Invariants
///
/// - Timestamps within one entity's queue are unique and increase in
///   attempt order
/// - An entity with no pending work has no entry in the map
/// - The store key is removed entirely when nothing is pending anywhere
///
/// # Concurrency
///
/// Every mutation reads, modifies and rewrites the whole map under one
/// mutex, so concurrent calls for different entities never lose each
/// other's entries. The map is loaded on first access and flushed on every
/// mutation.
pub struct DirtyQueue<S: LocalStore> {
    store: S,
    key: String,
    clock: fn() -> Timestamp,
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    map: Option<DirtyMap>,
    last_timestamp: Timestamp,
}

impl<S: LocalStore> DirtyQueue<S> {
    /// Creates a queue persisted under `key` in `store`.
    pub fn new(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            clock: now_millis,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Replaces the wall clock used for timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> Timestamp) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the store key the queue is persisted under.
    #[must_use]
    pub fn store_key(&self) -> &str {
        &self.key
    }

    /// Records a failed remote operation and returns its timestamp.
    ///
    /// The timestamp is the current time in milliseconds, bumped past the
    /// last one issued (and past any occupied slot) if the clock has not
    /// advanced.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be loaded or persisted; the entry
    /// is not kept in that case.
    pub fn record_failure(
        &self,
        key: &StorageKey,
        method: Method,
        payload: Attributes,
    ) -> SyncResult<Timestamp> {
        let mut state = self.state.lock();
        self.map_mut(&mut state)?;
        let mut timestamp = (self.clock)().max(state.last_timestamp.saturating_add(1));

        let map = state.map.get_or_insert_with(DirtyMap::new);
        let entity = map.entry(key.clone()).or_default();
        while entity.contains_key(&timestamp) {
            timestamp += 1;
        }
        entity.insert(timestamp, PendingOp::new(method, payload));

        if let Err(err) = self.flush(map) {
            if let Some(entity) = map.get_mut(key) {
                entity.remove(&timestamp);
                if entity.is_empty() {
                    map.remove(key);
                }
            }
            return Err(err);
        }

        state.last_timestamp = timestamp;
        tracing::debug!(key = %key, %method, timestamp, "recorded dirty operation");
        Ok(timestamp)
    }

    /// Returns the entity's pending operations in ascending timestamp order.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be loaded.
    pub fn pending_for(&self, key: &StorageKey) -> SyncResult<Vec<(Timestamp, PendingOp)>> {
        let mut state = self.state.lock();
        let map = self.map_mut(&mut state)?;
        Ok(map
            .get(key)
            .map(|entity| entity.iter().map(|(ts, op)| (*ts, op.clone())).collect())
            .unwrap_or_default())
    }

    /// Removes one entry. Returns false if it was not queued.
    ///
    /// Drops the entity from the map when its last entry goes.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be loaded or persisted.
    pub fn clear(&self, key: &StorageKey, timestamp: Timestamp) -> SyncResult<bool> {
        let mut state = self.state.lock();
        let map = self.map_mut(&mut state)?;

        let Some(entity) = map.get_mut(key) else {
            return Ok(false);
        };
        let Some(op) = entity.remove(&timestamp) else {
            return Ok(false);
        };
        if entity.is_empty() {
            map.remove(key);
        }

        if let Err(err) = self.flush(map) {
            map.entry(key.clone()).or_default().insert(timestamp, op);
            return Err(err);
        }
        tracing::debug!(key = %key, timestamp, "cleared dirty operation");
        Ok(true)
    }

    /// Moves every entry filed under `old` to `new`.
    ///
    /// Used when an entity acquires a remote identity and its storage key
    /// changes. Colliding timestamps are bumped. Returns the number of entries
    /// moved.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be loaded or persisted.
    pub fn rekey(&self, old: &StorageKey, new: &StorageKey) -> SyncResult<usize> {
        if old == new {
            return Ok(0);
        }

        let mut state = self.state.lock();
        let map = self.map_mut(&mut state)?;

        let Some(moved) = map.remove(old) else {
            return Ok(0);
        };
        let count = moved.len();
        let target = map.entry(new.clone()).or_default();
        for (mut timestamp, op) in moved {
            while target.contains_key(&timestamp) {
                timestamp += 1;
            }
            target.insert(timestamp, op);
        }

        if let Err(err) = self.flush(map) {
            // Reload the persisted queue on next access.
            state.map = None;
            return Err(err);
        }
        tracing::debug!(from = %old, to = %new, count, "moved dirty operations");
        Ok(count)
    }

    /// Returns a copy of the whole queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be loaded.
    pub fn snapshot(&self) -> SyncResult<DirtyMap> {
        let mut state = self.state.lock();
        Ok(self.map_mut(&mut state)?.clone())
    }

    /// Returns the number of pending operations across all entities.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be loaded.
    pub fn total_pending(&self) -> SyncResult<usize> {
        let mut state = self.state.lock();
        Ok(self.map_mut(&mut state)?.values().map(EntityQueue::len).sum())
    }

    /// Forgets the in-memory copy; the next access reloads from the store.
    pub fn invalidate(&self) {
        self.state.lock().map = None;
    }

    fn map_mut<'a>(&self, state: &'a mut QueueState) -> SyncResult<&'a mut DirtyMap> {
        if state.map.is_none() {
            let map = self.load()?;
            let newest = map
                .values()
                .filter_map(|entity| entity.keys().next_back())
                .max()
                .copied()
                .unwrap_or(0);
            state.last_timestamp = state.last_timestamp.max(newest);
            state.map = Some(map);
        }
        Ok(state.map.get_or_insert_with(DirtyMap::new))
    }

    fn load(&self) -> SyncResult<DirtyMap> {
        match self.store.get_json::<DirtyMap>(&self.key) {
            Ok(Some(mut map)) => {
                map.retain(|_, entity| !entity.is_empty());
                Ok(map)
            }
            Ok(None) => Ok(DirtyMap::new()),
            Err(SyncError::Serialization(e)) => {
                let err = SyncError::QueueCorrupt(e.to_string());
                tracing::warn!(key = %self.key, error = %err, "treating dirty queue as empty");
                Ok(DirtyMap::new())
            }
            Err(e) => Err(e),
        }
    }

    fn flush(&self, map: &DirtyMap) -> SyncResult<()> {
        if map.is_empty() {
            self.store.delete(&self.key)?;
        } else {
            self.store.put_json(&self.key, map)?;
        }
        Ok(())
    }
}

fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use localsync_storage::InMemoryStore;
    use localsync_storage::{StorageError, StorageResult};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Store whose writes can be switched to fail.
    #[derive(Default)]
    struct FailingStore {
        inner: InMemoryStore,
        fail_writes: AtomicBool,
    }

    impl FailingStore {
        fn check(&self) -> StorageResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    impl LocalStore for FailingStore {
        fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
            self.check()?;
            self.inner.put(key, value)
        }

        fn delete(&self, key: &str) -> StorageResult<()> {
            self.check()?;
            self.inner.delete(key)
        }

        fn keys(&self) -> StorageResult<Vec<String>> {
            self.inner.keys()
        }
    }

    fn frozen_clock() -> Timestamp {
        1_000
    }

    fn queue() -> (Arc<InMemoryStore>, DirtyQueue<Arc<InMemoryStore>>) {
        let store = Arc::new(InMemoryStore::new());
        let queue = DirtyQueue::new(Arc::clone(&store), "dirtyModels").with_clock(frozen_clock);
        (store, queue)
    }

    fn payload(title: &str) -> Attributes {
        json!({ "title": title }).as_object().cloned().unwrap()
    }

    #[test]
    fn record_then_clear_roundtrip() {
        let (store, queue) = queue();
        let key = StorageKey::from("book/1");

        let ts = queue
            .record_failure(&key, Method::Update, payload("X"))
            .unwrap();
        let pending = queue.pending_for(&key).unwrap();
        assert_eq!(pending, vec![(ts, PendingOp::new(Method::Update, payload("X")))]);
        assert!(store.contains("dirtyModels").unwrap());

        assert!(queue.clear(&key, ts).unwrap());
        assert!(queue.pending_for(&key).unwrap().is_empty());
        assert!(!store.contains("dirtyModels").unwrap());
    }

    #[test]
    fn frozen_clock_still_yields_unique_timestamps() {
        let (_, queue) = queue();
        let key = StorageKey::from("book/1");

        let a = queue.record_failure(&key, Method::Create, payload("a")).unwrap();
        let b = queue.record_failure(&key, Method::Update, payload("b")).unwrap();
        let c = queue.record_failure(&key, Method::Patch, payload("c")).unwrap();
        assert_eq!((a, b, c), (1_000, 1_001, 1_002));

        let methods: Vec<_> = queue
            .pending_for(&key)
            .unwrap()
            .into_iter()
            .map(|(_, op)| op.method)
            .collect();
        assert_eq!(methods, vec![Method::Create, Method::Update, Method::Patch]);
    }

    #[test]
    fn entities_are_independent() {
        let (_, queue) = queue();
        let one = StorageKey::from("book/1");
        let two = StorageKey::from("book/2");

        let ts = queue.record_failure(&one, Method::Update, payload("1")).unwrap();
        queue.record_failure(&two, Method::Delete, payload("2")).unwrap();
        queue.clear(&one, ts).unwrap();

        let snapshot = queue.snapshot().unwrap();
        assert!(!snapshot.contains_key(&one));
        assert_eq!(snapshot[&two].len(), 1);
        assert_eq!(queue.total_pending().unwrap(), 1);
    }

    #[test]
    fn clear_unknown_entry_is_noop() {
        let (_, queue) = queue();
        assert!(!queue.clear(&StorageKey::from("nope"), 5).unwrap());
    }

    #[test]
    fn persisted_layout_uses_data_field() {
        let (store, queue) = queue();
        queue
            .record_failure(&StorageKey::from("tmp-1"), Method::Create, payload("X"))
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&store.get("dirtyModels").unwrap().unwrap()).unwrap();
        assert_eq!(
            raw,
            json!({ "tmp-1": { "1000": { "method": "create", "data": { "title": "X" } } } })
        );
    }

    #[test]
    fn reload_from_store_continues_timestamps() {
        let (store, queue) = queue();
        let key = StorageKey::from("book/1");
        queue.record_failure(&key, Method::Update, payload("a")).unwrap();
        queue.record_failure(&key, Method::Update, payload("b")).unwrap();

        let reopened = DirtyQueue::new(Arc::clone(&store), "dirtyModels").with_clock(frozen_clock);
        let ts = reopened.record_failure(&key, Method::Update, payload("c")).unwrap();
        assert_eq!(ts, 1_002);
        assert_eq!(reopened.pending_for(&key).unwrap().len(), 3);
    }

    #[test]
    fn corrupt_queue_is_treated_as_empty() {
        let store = Arc::new(InMemoryStore::new());
        store.put("dirtyModels", b"[[[not a map").unwrap();
        let queue = DirtyQueue::new(Arc::clone(&store), "dirtyModels");

        assert_eq!(queue.total_pending().unwrap(), 0);
        queue
            .record_failure(&StorageKey::from("k"), Method::Delete, Attributes::new())
            .unwrap();
        assert_eq!(queue.total_pending().unwrap(), 1);
    }

    #[test]
    fn rekey_moves_entries() {
        let (_, queue) = queue();
        let old = StorageKey::from("tmp-1");
        let new = StorageKey::from("book/9");

        queue.record_failure(&old, Method::Create, payload("a")).unwrap();
        queue.record_failure(&new, Method::Update, payload("b")).unwrap();
        assert_eq!(queue.rekey(&old, &new).unwrap(), 1);

        assert!(queue.pending_for(&old).unwrap().is_empty());
        let moved = queue.pending_for(&new).unwrap();
        assert_eq!(moved.len(), 2);
        assert_eq!(moved[0].1.method, Method::Create);
    }

    #[test]
    fn concurrent_records_for_different_entities_are_kept() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(DirtyQueue::new(Arc::clone(&store), "dirtyModels"));

        std::thread::scope(|scope| {
            for i in 0..8 {
                let queue = Arc::clone(&queue);
                scope.spawn(move || {
                    let key = StorageKey::new(format!("book/{i}"));
                    for _ in 0..5 {
                        queue
                            .record_failure(&key, Method::Update, Attributes::new())
                            .unwrap();
                    }
                });
            }
        });

        let reloaded = DirtyQueue::new(store, "dirtyModels");
        assert_eq!(reloaded.total_pending().unwrap(), 40);
        assert_eq!(reloaded.snapshot().unwrap().len(), 8);
    }

    #[test]
    fn failed_clear_keeps_entry_in_memory_and_store() {
        let store = Arc::new(FailingStore::default());
        let queue = DirtyQueue::new(Arc::clone(&store), "dirtyModels").with_clock(frozen_clock);
        let key = StorageKey::from("book/1");
        let ts = queue.record_failure(&key, Method::Update, payload("X")).unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        assert!(queue.clear(&key, ts).is_err());
        assert_eq!(
            queue.pending_for(&key).unwrap(),
            vec![(ts, PendingOp::new(Method::Update, payload("X")))]
        );
        assert!(store.contains("dirtyModels").unwrap());

        store.fail_writes.store(false, Ordering::SeqCst);
        assert!(queue.clear(&key, ts).unwrap());
        assert_eq!(queue.total_pending().unwrap(), 0);
    }

    #[test]
    fn failed_rekey_leaves_entries_under_old_key() {
        let store = Arc::new(FailingStore::default());
        let queue = DirtyQueue::new(Arc::clone(&store), "dirtyModels").with_clock(frozen_clock);
        let old = StorageKey::from("tmp-1");
        let new = StorageKey::from("book/9");
        queue.record_failure(&old, Method::Create, payload("a")).unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        assert!(queue.rekey(&old, &new).is_err());
        assert_eq!(queue.pending_for(&old).unwrap().len(), 1);
        assert!(queue.pending_for(&new).unwrap().is_empty());
    }
}
