//! Remote executor abstraction.

use crate::entity::Entity;
use crate::error::{SyncError, SyncResult};
use crate::types::{Attributes, Method};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One call to the remote.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    /// Method to perform.
    pub method: Method,
    /// Resource path (collection root for creates).
    pub path: String,
    /// Request body, for methods that carry one.
    pub payload: Option<Attributes>,
}

impl RemoteRequest {
    /// Creates a request.
    pub fn new(method: Method, path: impl Into<String>, payload: Option<Attributes>) -> Self {
        Self {
            method,
            path: path.into(),
            payload,
        }
    }

    /// Builds the request for `method` on `entity`.
    ///
    /// Creates go to the collection root; everything else goes to the
    /// resource path. Reads and deletes carry no body.
    pub fn for_entity<E: Entity + ?Sized>(method: Method, entity: &E, payload: Attributes) -> Self {
        let path = match method {
            Method::Create => entity.url_root().to_string(),
            _ => entity
                .resource_path()
                .unwrap_or_else(|| entity.url_root().to_string()),
        };
        let payload = match method {
            Method::Read | Method::Delete => None,
            _ => Some(payload),
        };
        Self::new(method, path, payload)
    }

    /// Builds a read of a whole collection.
    pub fn read_collection(path: impl Into<String>) -> Self {
        Self::new(Method::Read, path, None)
    }
}

/// Executes operations against the remote store.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process servers, mocks for testing).
/// Implementations must report both transport errors and application-level
/// rejections as [`SyncError::RemoteFailure`].
pub trait RemoteExecutor: Send + Sync {
    /// Performs `request` and returns the response body.
    fn execute(&self, request: &RemoteRequest) -> SyncResult<Value>;
}

impl<X: RemoteExecutor + ?Sized> RemoteExecutor for Arc<X> {
    fn execute(&self, request: &RemoteRequest) -> SyncResult<Value> {
        (**self).execute(request)
    }
}

impl<X: RemoteExecutor + ?Sized> RemoteExecutor for &X {
    fn execute(&self, request: &RemoteRequest) -> SyncResult<Value> {
        (**self).execute(request)
    }
}

#[derive(Debug, Clone)]
enum MockReply {
    Ok(Value),
    Fail(String),
}

/// A mock executor for testing.
///
/// Scripted replies are consumed in order; without one, the request body is
/// echoed back (or `null` for body-less requests).
#[derive(Debug)]
pub struct MockExecutor {
    online: AtomicBool,
    replies: Mutex<VecDeque<MockReply>>,
    calls: Mutex<Vec<RemoteRequest>>,
}

impl MockExecutor {
    /// Creates a new, reachable mock executor.
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets whether the remote is reachable. Unreachable calls fail.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Queues a successful reply.
    pub fn push_reply(&self, value: Value) {
        self.replies.lock().push_back(MockReply::Ok(value));
    }

    /// Queues a failing reply.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies.lock().push_back(MockReply::Fail(message.into()));
    }

    /// Returns every request received so far.
    pub fn calls(&self) -> Vec<RemoteRequest> {
        self.calls.lock().clone()
    }

    /// Returns the number of requests received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteExecutor for MockExecutor {
    fn execute(&self, request: &RemoteRequest) -> SyncResult<Value> {
        self.calls.lock().push(request.clone());

        if !self.online.load(Ordering::SeqCst) {
            return Err(SyncError::remote("remote unreachable"));
        }

        match self.replies.lock().pop_front() {
            Some(MockReply::Ok(value)) => Ok(value),
            Some(MockReply::Fail(message)) => Err(SyncError::remote(message)),
            None => Ok(request
                .payload
                .clone()
                .map(Value::Object)
                .unwrap_or(Value::Null)),
        }
    }
}
