//! In-process REST server for exercising the cache without a network.
//!
//! [`FauxServer`] keeps collections of JSON objects keyed by numeric id and
//! answers [`RemoteRequest`]s the way a conventional REST backend would:
//! `POST <root>` assigns an id, `GET <root>` lists, and `GET/PUT/PATCH/DELETE
//! <root>/<id>` address one resource. It can be switched off to simulate an
//! unreachable remote.

use localsync_core::{Attributes, Method, RemoteExecutor, RemoteRequest, SyncError, SyncResult};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// The ten books served by [`FauxServer::with_books`], as `(title, author)`.
pub const BOOKS: [(&str, &str); 10] = [
    ("Madame Bovary", "Gustave Flaubert"),
    ("Moby-Dick", "Herman Melville"),
    ("Le Père Goriot", "Honoré de Balzac"),
    ("The Grapes of Wrath", "John Steinbeck"),
    ("The Sun Also Rises", "Ernest Hemingway"),
    ("Anna Karenina", "Leo Tolstoy"),
    ("Middlemarch", "George Eliot"),
    ("Les Misérables", "Victor Hugo"),
    ("Mrs Dalloway", "Virginia Woolf"),
    ("Crime and Punishment", "Fyodor Dostoevsky"),
];

#[derive(Debug, Default)]
struct ServerState {
    collections: BTreeMap<String, BTreeMap<u64, Attributes>>,
    next_id: u64,
}

/// A fake REST backend implementing [`RemoteExecutor`].
#[derive(Debug)]
pub struct FauxServer {
    enabled: AtomicBool,
    state: Mutex<ServerState>,
    calls: Mutex<Vec<RemoteRequest>>,
}

impl FauxServer {
    /// Creates an empty, enabled server.
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            state: Mutex::new(ServerState {
                collections: BTreeMap::new(),
                next_id: 1,
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates a server whose `book` collection holds [`BOOKS`] under ids
    /// 1 to 10.
    pub fn with_books() -> Self {
        let server = Self::new();
        for (title, author) in BOOKS {
            let attrs = json!({"title": title, "author": author});
            server.seed("book", attrs.as_object().cloned().unwrap_or_default());
        }
        server
    }

    /// Switches the server on or off. A disabled server fails every call.
    pub fn enable(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Returns true if the server answers calls.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Inserts a resource directly, bypassing the call log. Returns its id.
    pub fn seed(&self, root: &str, attrs: Attributes) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state
            .collections
            .entry(root.to_string())
            .or_default()
            .insert(id, with_id(attrs, id));
        id
    }

    /// Returns the stored resource at `root/id`.
    pub fn resource(&self, root: &str, id: u64) -> Option<Attributes> {
        self.state
            .lock()
            .collections
            .get(root)
            .and_then(|items| items.get(&id))
            .cloned()
    }

    /// Returns the number of resources under `root`.
    pub fn len(&self, root: &str) -> usize {
        self.state
            .lock()
            .collections
            .get(root)
            .map_or(0, BTreeMap::len)
    }

    /// Returns every request received, including refused ones.
    pub fn calls(&self) -> Vec<RemoteRequest> {
        self.calls.lock().clone()
    }

    /// Returns the number of requests received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the number of requests received with `method`.
    pub fn calls_with(&self, method: Method) -> usize {
        self.calls.lock().iter().filter(|c| c.method == method).count()
    }

    /// Forgets the call log.
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    fn handle(&self, request: &RemoteRequest) -> SyncResult<Value> {
        let (root, id) = split_path(&request.path);
        let mut state = self.state.lock();

        match (request.method, id) {
            (Method::Create, None) => {
                let id = state.next_id;
                state.next_id += 1;
                let attrs = with_id(request.payload.clone().unwrap_or_default(), id);
                state
                    .collections
                    .entry(root.to_string())
                    .or_default()
                    .insert(id, attrs.clone());
                Ok(Value::Object(attrs))
            }
            (Method::Read, None) => {
                let items: Vec<Value> = state
                    .collections
                    .get(root)
                    .map(|items| items.values().cloned().map(Value::Object).collect())
                    .unwrap_or_default();
                Ok(Value::Array(items))
            }
            (Method::Read, Some(id)) => state
                .collections
                .get(root)
                .and_then(|items| items.get(&id))
                .cloned()
                .map(Value::Object)
                .ok_or_else(|| not_found(&request.path)),
            (Method::Update, Some(id)) => {
                let items = state.collections.entry(root.to_string()).or_default();
                if !items.contains_key(&id) {
                    return Err(not_found(&request.path));
                }
                let attrs = with_id(request.payload.clone().unwrap_or_default(), id);
                items.insert(id, attrs.clone());
                Ok(Value::Object(attrs))
            }
            (Method::Patch, Some(id)) => {
                let existing = state
                    .collections
                    .get_mut(root)
                    .and_then(|items| items.get_mut(&id))
                    .ok_or_else(|| not_found(&request.path))?;
                if let Some(changes) = &request.payload {
                    for (name, value) in changes {
                        existing.insert(name.clone(), value.clone());
                    }
                }
                Ok(Value::Object(existing.clone()))
            }
            (Method::Delete, Some(id)) => state
                .collections
                .get_mut(root)
                .and_then(|items| items.remove(&id))
                .map(|_| Value::Null)
                .ok_or_else(|| not_found(&request.path)),
            (method, _) => Err(SyncError::remote_status(
                405,
                format!("{method} not allowed on {}", request.path),
            )),
        }
    }
}

impl Default for FauxServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteExecutor for FauxServer {
    fn execute(&self, request: &RemoteRequest) -> SyncResult<Value> {
        self.calls.lock().push(request.clone());
        if !self.is_enabled() {
            return Err(SyncError::remote("faux server disabled"));
        }
        self.handle(request)
    }
}

fn with_id(mut attrs: Attributes, id: u64) -> Attributes {
    attrs.insert("id".to_string(), Value::from(id));
    attrs
}

fn not_found(path: &str) -> SyncError {
    SyncError::remote_status(404, format!("{path} not found"))
}

fn split_path(path: &str) -> (&str, Option<u64>) {
    let path = path.trim_matches('/');
    match path.rsplit_once('/') {
        Some((root, id)) => match id.parse() {
            Ok(id) => (root, Some(id)),
            Err(_) => (path, None),
        },
        None => (path, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, path: &str, payload: Option<Value>) -> RemoteRequest {
        RemoteRequest::new(method, path, payload.and_then(|v| v.as_object().cloned()))
    }

    #[test]
    fn seeded_books() {
        let server = FauxServer::with_books();
        assert_eq!(server.len("book"), 10);

        let book = server.execute(&request(Method::Read, "book/4", None)).unwrap();
        assert_eq!(book["author"], "John Steinbeck");
        assert_eq!(book["id"], 4);
    }

    #[test]
    fn create_assigns_next_id() {
        let server = FauxServer::with_books();
        let created = server
            .execute(&request(Method::Create, "book", Some(json!({"title": "Nana"}))))
            .unwrap();
        assert_eq!(created["id"], 11);
        assert_eq!(server.len("book"), 11);
    }

    #[test]
    fn patch_merges_and_update_replaces() {
        let server = FauxServer::with_books();
        server
            .execute(&request(Method::Patch, "book/5", Some(json!({"year": 1926}))))
            .unwrap();
        let book = server.resource("book", 5).unwrap();
        assert_eq!(book["author"], "Ernest Hemingway");
        assert_eq!(book["year"], 1926);

        server
            .execute(&request(Method::Update, "book/5", Some(json!({"title": "Fiesta"}))))
            .unwrap();
        let book = server.resource("book", 5).unwrap();
        assert!(book.get("author").is_none());
        assert_eq!(book["id"], 5);
    }

    #[test]
    fn missing_resource_is_404() {
        let server = FauxServer::new();
        let err = server
            .execute(&request(Method::Delete, "book/1", None))
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteFailure { status: Some(404), .. }));
    }

    #[test]
    fn disabled_server_refuses_but_logs() {
        let server = FauxServer::with_books();
        server.enable(false);
        assert!(server
            .execute(&request(Method::Read, "book", None))
            .unwrap_err()
            .is_remote());
        assert_eq!(server.call_count(), 1);
        assert_eq!(server.calls_with(Method::Read), 1);
    }
}
