//! Drain-before-write replay of queued operations.

use crate::dirty::DirtyQueue;
use crate::entity::Entity;
use crate::error::{SyncError, SyncResult};
use crate::transport::{RemoteExecutor, RemoteRequest};
use crate::types::{Attributes, Method, StorageKey, Timestamp};
use localsync_storage::LocalStore;
use serde_json::Value;
use std::thread;

/// Phase of one drain-then-execute run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    /// Nothing started yet.
    Idle,
    /// Retrying the entity's queued operations.
    Draining,
    /// Running the caller's operation.
    Executing,
    /// The caller's operation succeeded.
    Done,
    /// The caller's operation (or loading the queue) failed.
    Failed,
}

impl ReplayState {
    /// Returns true once the run has settled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplayState::Done | ReplayState::Failed)
    }
}

/// What a drain did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Timestamps whose retry succeeded and were cleared.
    pub cleared: Vec<Timestamp>,
    /// Timestamps whose retry failed again and stay queued.
    pub still_pending: Vec<Timestamp>,
    /// Attributes the remote returned for a replayed create.
    pub assigned: Option<Attributes>,
}

impl DrainReport {
    /// Returns the number of retries dispatched.
    pub fn attempted(&self) -> usize {
        self.cleared.len() + self.still_pending.len()
    }

    /// Returns true if nothing is left queued for the entity.
    pub fn is_drained(&self) -> bool {
        self.still_pending.is_empty()
    }
}

/// Result of [`ReplayCoordinator::run`].
#[derive(Debug)]
pub struct Replayed<T> {
    /// What the drain did.
    pub report: DrainReport,
    /// Terminal state of the run.
    pub state: ReplayState,
    /// Result of the caller's operation.
    pub result: SyncResult<T>,
}

/// Retries an entity's dirty queue before a new operation runs.
///
/// Retries are dispatched in timestamp order, either concurrently (scoped
/// threads joined before anything else happens) or one after another.
/// Successes are cleared from the queue; failures stay queued under their
/// original timestamp. The caller's operation runs whether or not the queue
/// emptied: a node applies its latest write even while older ones remain
/// unconfirmed.
pub struct ReplayCoordinator<'a, S: LocalStore, X: RemoteExecutor> {
    dirty: &'a DirtyQueue<S>,
    executor: &'a X,
    parallel: bool,
}

impl<'a, S: LocalStore, X: RemoteExecutor> ReplayCoordinator<'a, S, X> {
    /// Creates a coordinator.
    pub fn new(dirty: &'a DirtyQueue<S>, executor: &'a X, parallel: bool) -> Self {
        Self {
            dirty,
            executor,
            parallel,
        }
    }

    /// Drains the queue for `key`, then runs `operation` on the entity.
    pub fn run<E, T, F>(&self, key: &StorageKey, entity: &mut E, operation: F) -> Replayed<T>
    where
        E: Entity + ?Sized,
        F: FnOnce(&mut E) -> SyncResult<T>,
    {
        let mut state = ReplayState::Idle;
        advance(key, &mut state, ReplayState::Draining);
        let report = match self.drain(key, entity) {
            Ok(report) => report,
            Err(err) => {
                advance(key, &mut state, ReplayState::Failed);
                return Replayed {
                    report: DrainReport::default(),
                    state,
                    result: Err(err),
                };
            }
        };

        advance(key, &mut state, ReplayState::Executing);
        let result = operation(entity);
        let settled = if result.is_ok() {
            ReplayState::Done
        } else {
            ReplayState::Failed
        };
        advance(key, &mut state, settled);

        Replayed {
            report,
            state,
            result,
        }
    }

    /// Retries every queued operation for `key` and clears the ones that
    /// succeed.
    ///
    /// While the entity has no remote identity, entries are retried one at a
    /// time. A replayed create that returns an object hands the entity the
    /// attributes it does not have yet (typically its new identity); local
    /// values are never overwritten by the echo of an older attempt. Once
    /// the entity has an identity, later queued creates are sent as updates
    /// to its resource, so the remote never receives a second create.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be loaded or updated. Failed
    /// retries are not errors.
    pub fn drain<E: Entity + ?Sized>(&self, key: &StorageKey, entity: &mut E) -> SyncResult<DrainReport> {
        let pending = self.dirty.pending_for(key)?;
        let mut report = DrainReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        tracing::debug!(key = %key, count = pending.len(), parallel = self.parallel, "draining dirty queue");
        let mut pending = pending.into_iter();

        while entity.is_new() {
            let Some((timestamp, op)) = pending.next() else {
                break;
            };
            let request = retry_request(entity, op.method, op.payload);
            let outcome = self.executor.execute(&request);
            self.settle(key, timestamp, &request, outcome, entity, &mut report)?;
        }

        let requests: Vec<(Timestamp, RemoteRequest)> = pending
            .map(|(timestamp, op)| (timestamp, retry_request(entity, op.method, op.payload)))
            .collect();
        let outcomes = self.dispatch(&requests);
        for ((timestamp, request), outcome) in requests.iter().zip(outcomes) {
            self.settle(key, *timestamp, request, outcome, entity, &mut report)?;
        }

        if !report.cleared.is_empty() {
            tracing::info!(
                key = %key,
                cleared = report.cleared.len(),
                remaining = report.still_pending.len(),
                "replayed dirty operations"
            );
        }
        Ok(report)
    }

    fn settle<E: Entity + ?Sized>(
        &self,
        key: &StorageKey,
        timestamp: Timestamp,
        request: &RemoteRequest,
        outcome: SyncResult<Value>,
        entity: &mut E,
        report: &mut DrainReport,
    ) -> SyncResult<()> {
        match outcome {
            Ok(value) => {
                self.dirty.clear(key, timestamp)?;
                report.cleared.push(timestamp);
                if request.method == Method::Create {
                    if let Value::Object(attrs) = value {
                        adopt_missing(entity, &attrs);
                        report.assigned = Some(attrs);
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    key = %key,
                    timestamp,
                    method = %request.method,
                    error = %err,
                    "replayed operation failed again; keeping it queued"
                );
                report.still_pending.push(timestamp);
            }
        }
        Ok(())
    }

    fn dispatch(&self, requests: &[(Timestamp, RemoteRequest)]) -> Vec<SyncResult<Value>> {
        let executor = self.executor;

        if !self.parallel || requests.len() < 2 {
            return requests
                .iter()
                .map(|(_, request)| executor.execute(request))
                .collect();
        }

        thread::scope(|scope| {
            let handles: Vec<_> = requests
                .iter()
                .map(|(_, request)| scope.spawn(move || executor.execute(request)))
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(SyncError::remote("replay worker panicked")))
                })
                .collect()
        })
    }
}

/// Builds the retry for a queued entry. A create for an entity the remote
/// already knows becomes an update of its resource.
fn retry_request<E: Entity + ?Sized>(entity: &E, method: Method, payload: Attributes) -> RemoteRequest {
    let method = if method == Method::Create && !entity.is_new() {
        Method::Update
    } else {
        method
    };
    RemoteRequest::for_entity(method, entity, payload)
}

/// Sets the attributes of `assigned` that the entity does not have.
fn adopt_missing<E: Entity + ?Sized>(entity: &mut E, assigned: &Attributes) {
    let current = entity.snapshot();
    let missing: Attributes = assigned
        .iter()
        .filter(|(name, _)| !current.contains_key(*name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    entity.set(&missing);
}

fn advance(key: &StorageKey, state: &mut ReplayState, next: ReplayState) {
    let from = *state;
    tracing::debug!(key = %key, from = ?from, to = ?next, "replay transition");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;
    use crate::transport::MockExecutor;
    use localsync_storage::InMemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn setup() -> (DirtyQueue<Arc<InMemoryStore>>, MockExecutor) {
        let store = Arc::new(InMemoryStore::new());
        (DirtyQueue::new(store, "dirtyModels"), MockExecutor::new())
    }

    #[test]
    fn empty_queue_goes_straight_to_execute() {
        let (dirty, executor) = setup();
        let coordinator = ReplayCoordinator::new(&dirty, &executor, true);
        let mut book = Record::new("book");

        let replayed = coordinator.run(&StorageKey::from("tmp-1"), &mut book, |_| Ok(7));
        assert_eq!(replayed.state, ReplayState::Done);
        assert_eq!(replayed.report.attempted(), 0);
        assert_eq!(replayed.result.unwrap(), 7);
        assert_eq!(executor.call_count(), 0);
    }

    #[test]
    fn successful_retries_are_cleared_in_order() {
        let (dirty, executor) = setup();
        let key = StorageKey::from("book/1");
        let mut book = Record::with_attributes("book", attrs(json!({"id": 1})));

        let first = dirty.record_failure(&key, Method::Update, attrs(json!({"v": 1}))).unwrap();
        let second = dirty.record_failure(&key, Method::Patch, attrs(json!({"v": 2}))).unwrap();

        let coordinator = ReplayCoordinator::new(&dirty, &executor, false);
        let report = coordinator.drain(&key, &mut book).unwrap();

        assert_eq!(report.cleared, vec![first, second]);
        assert!(report.is_drained());
        assert!(dirty.pending_for(&key).unwrap().is_empty());

        let methods: Vec<_> = executor.calls().iter().map(|c| c.method).collect();
        assert_eq!(methods, vec![Method::Update, Method::Patch]);
    }

    #[test]
    fn failed_retries_stay_queued_and_operation_still_runs() {
        let (dirty, executor) = setup();
        let key = StorageKey::from("book/1");
        let mut book = Record::with_attributes("book", attrs(json!({"id": 1})));
        let ts = dirty.record_failure(&key, Method::Delete, Attributes::new()).unwrap();

        executor.set_online(false);
        let coordinator = ReplayCoordinator::new(&dirty, &executor, true);
        let replayed = coordinator.run(&key, &mut book, |_| -> SyncResult<()> {
            Err(SyncError::remote("still down"))
        });

        assert_eq!(replayed.report.still_pending, vec![ts]);
        assert_eq!(replayed.state, ReplayState::Failed);
        assert!(replayed.result.is_err());

        let pending = dirty.pending_for(&key).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, ts);
    }

    #[test]
    fn parallel_drain_joins_all_retries() {
        let (dirty, executor) = setup();
        let key = StorageKey::from("book/5");
        let mut book = Record::with_attributes("book", attrs(json!({"id": 5})));
        for i in 0..6 {
            dirty.record_failure(&key, Method::Update, attrs(json!({"n": i}))).unwrap();
        }

        let coordinator = ReplayCoordinator::new(&dirty, &executor, true);
        let report = coordinator.drain(&key, &mut book).unwrap();

        assert_eq!(report.cleared.len(), 6);
        assert_eq!(executor.call_count(), 6);
        assert!(dirty.pending_for(&key).unwrap().is_empty());
    }

    #[test]
    fn replayed_create_assigns_identity_without_clobbering() {
        let (dirty, executor) = setup();
        let key = StorageKey::from("tmp-1");
        let mut book = Record::with_attributes("book", attrs(json!({"title": "newer"})));
        dirty
            .record_failure(&key, Method::Create, attrs(json!({"title": "older"})))
            .unwrap();
        executor.push_reply(json!({"id": 42, "title": "older"}));

        let coordinator = ReplayCoordinator::new(&dirty, &executor, true);
        let report = coordinator.drain(&key, &mut book).unwrap();

        assert!(report.assigned.is_some());
        assert_eq!(book.remote_id(), Some("42".to_string()));
        assert_eq!(book.get("title"), Some(&json!("newer")));
        assert_eq!(executor.calls()[0].path, "book");
    }

    #[test]
    fn second_queued_create_becomes_update_of_first() {
        let (dirty, executor) = setup();
        let key = StorageKey::from("tmp-1");
        let mut book = Record::with_attributes("book", attrs(json!({"title": "Nana"})));
        let first = dirty
            .record_failure(&key, Method::Create, attrs(json!({"title": "Nana"})))
            .unwrap();
        let second = dirty
            .record_failure(&key, Method::Create, attrs(json!({"title": "Nana", "year": 1880})))
            .unwrap();
        executor.push_reply(json!({"id": 11, "title": "Nana"}));

        let coordinator = ReplayCoordinator::new(&dirty, &executor, true);
        let report = coordinator.drain(&key, &mut book).unwrap();

        assert_eq!(report.cleared, vec![first, second]);
        let calls = executor.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!((calls[0].method, calls[0].path.as_str()), (Method::Create, "book"));
        assert_eq!((calls[1].method, calls[1].path.as_str()), (Method::Update, "book/11"));
        assert_eq!(book.remote_id(), Some("11".to_string()));
    }

    #[test]
    fn failed_create_holds_back_later_entries_in_order() {
        let (dirty, executor) = setup();
        let key = StorageKey::from("tmp-1");
        let mut book = Record::new("book");
        dirty.record_failure(&key, Method::Create, attrs(json!({"t": 1}))).unwrap();
        dirty.record_failure(&key, Method::Create, attrs(json!({"t": 2}))).unwrap();
        executor.push_failure("503");
        executor.push_reply(json!({"id": 12}));

        let coordinator = ReplayCoordinator::new(&dirty, &executor, true);
        let report = coordinator.drain(&key, &mut book).unwrap();

        assert_eq!(report.cleared.len(), 1);
        assert_eq!(report.still_pending.len(), 1);
        assert_eq!(book.remote_id(), Some("12".to_string()));
        assert!(executor.calls().iter().all(|c| c.method == Method::Create));
    }
}
