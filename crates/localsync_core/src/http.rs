//! HTTP remote executor.
//!
//! Maps cache requests onto REST calls with JSON bodies. The actual HTTP
//! client is abstracted via a trait so any library (reqwest, ureq, hyper)
//! or an in-process fake can be plugged in.

use crate::error::{SyncError, SyncResult};
use crate::transport::{RemoteExecutor, RemoteRequest};
use crate::types::Method;
use parking_lot::RwLock;
use serde_json::Value;

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. Connection
/// failures are returned as `Err`; any response, whatever its status, as
/// `Ok`.
pub trait HttpClient: Send + Sync {
    /// Sends one request.
    fn send(&self, method: &str, url: &str, body: Option<Vec<u8>>) -> Result<HttpResponse, String>;
}

/// Returns the HTTP verb used for a cache method.
#[must_use]
pub const fn http_method(method: Method) -> &'static str {
    match method {
        Method::Create => "POST",
        Method::Read => "GET",
        Method::Update => "PUT",
        Method::Patch => "PATCH",
        Method::Delete => "DELETE",
    }
}

/// REST executor over an [`HttpClient`].
pub struct HttpExecutor<C: HttpClient> {
    /// Base URL of the API (e.g., "https://api.example.com").
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpExecutor<C> {
    /// Creates a new HTTP executor.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns the absolute URL for a resource path.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn fail(&self, err: SyncError) -> SyncError {
        *self.last_error.write() = Some(err.to_string());
        err
    }
}

impl<C: HttpClient> RemoteExecutor for HttpExecutor<C> {
    fn execute(&self, request: &RemoteRequest) -> SyncResult<Value> {
        let body = request
            .payload
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()?;

        let url = self.url_for(&request.path);
        let verb = http_method(request.method);
        tracing::trace!(%verb, %url, "sending remote request");

        let response = self
            .client
            .send(verb, &url, body)
            .map_err(|e| self.fail(SyncError::remote(e)))?;

        if !response.is_success() {
            let message = String::from_utf8_lossy(&response.body).into_owned();
            let message = if message.is_empty() {
                format!("{verb} {url} returned {}", response.status)
            } else {
                message
            };
            return Err(self.fail(SyncError::remote_status(response.status, message)));
        }

        *self.last_error.write() = None;

        if response.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&response.body).map_err(|e| {
            self.fail(SyncError::UnexpectedPayload(format!(
                "{verb} {url} returned invalid JSON: {e}"
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct ScriptedClient {
        sent: Mutex<Vec<(String, String, Option<Vec<u8>>)>>,
        reply: Mutex<Option<Result<HttpResponse, String>>>,
    }

    impl ScriptedClient {
        fn replying(reply: Result<HttpResponse, String>) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                reply: Mutex::new(Some(reply)),
            }
        }
    }

    impl HttpClient for ScriptedClient {
        fn send(&self, method: &str, url: &str, body: Option<Vec<u8>>) -> Result<HttpResponse, String> {
            self.sent
                .lock()
                .push((method.to_string(), url.to_string(), body));
            self.reply.lock().take().unwrap_or_else(|| {
                Ok(HttpResponse {
                    status: 204,
                    body: Vec::new(),
                })
            })
        }
    }

    #[test]
    fn create_posts_to_collection_root() {
        let client = ScriptedClient::replying(Ok(HttpResponse {
            status: 201,
            body: br#"{"id":1,"title":"T"}"#.to_vec(),
        }));
        let executor = HttpExecutor::new("https://api.example.com/", client);

        let request = RemoteRequest::new(
            Method::Create,
            "/book",
            json!({"title": "T"}).as_object().cloned(),
        );
        let value = executor.execute(&request).unwrap();
        assert_eq!(value, json!({"id": 1, "title": "T"}));

        let sent = executor.client.sent.lock();
        assert_eq!(sent[0].0, "POST");
        assert_eq!(sent[0].1, "https://api.example.com/book");
        assert_eq!(sent[0].2.as_deref(), Some(&br#"{"title":"T"}"#[..]));
    }

    #[test]
    fn non_success_status_is_remote_failure() {
        let client = ScriptedClient::replying(Ok(HttpResponse {
            status: 503,
            body: Vec::new(),
        }));
        let executor = HttpExecutor::new("http://localhost", client);

        let err = executor
            .execute(&RemoteRequest::new(Method::Delete, "book/1", None))
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::RemoteFailure {
                status: Some(503),
                ..
            }
        ));
        assert!(executor.last_error().unwrap().contains("503"));
    }

    #[test]
    fn connection_error_is_remote_failure() {
        let client = ScriptedClient::replying(Err("connection refused".into()));
        let executor = HttpExecutor::new("http://localhost", client);

        let err = executor
            .execute(&RemoteRequest::read_collection("book"))
            .unwrap_err();
        assert!(err.is_remote());
    }

    #[test]
    fn empty_body_is_null() {
        let executor = HttpExecutor::new("http://localhost", ScriptedClient::default());
        let value = executor
            .execute(&RemoteRequest::new(Method::Delete, "book/1", None))
            .unwrap();
        assert_eq!(value, Value::Null);
        assert_eq!(http_method(Method::Patch), "PATCH");
    }
}
