//! Error types for the reconciliation engine.

use thiserror::Error;

/// Result type for cache and sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while reconciling local and remote state.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A remote operation needs an identity the entity does not have.
    #[error("entity has no remote identity: {0}")]
    IdentityMissing(String),

    /// A local-only read found nothing cached.
    #[error("nothing cached locally under {key}")]
    NotFoundLocal {
        /// The storage key that was looked up.
        key: String,
    },

    /// The remote executor reported a failure.
    #[error("remote failure: {message}")]
    RemoteFailure {
        /// Error message.
        message: String,
        /// Response status, when the failure came from an HTTP-like remote.
        status: Option<u16>,
    },

    /// The persisted dirty queue could not be parsed.
    #[error("dirty queue corrupt: {0}")]
    QueueCorrupt(String),

    /// An operation configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A remote or cached payload did not have the expected shape.
    #[error("unexpected payload: {0}")]
    UnexpectedPayload(String),

    /// Local store error.
    #[error("storage error: {0}")]
    Storage(#[from] localsync_storage::StorageError),

    /// JSON encoding or decoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Creates a remote failure without a status code (network-level).
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteFailure {
            message: message.into(),
            status: None,
        }
    }

    /// Creates a remote failure carrying a response status.
    pub fn remote_status(status: u16, message: impl Into<String>) -> Self {
        Self::RemoteFailure {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Returns true if this error came from the remote executor.
    ///
    /// Only remote failures of writes are absorbed into the dirty queue.
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncError::RemoteFailure { .. })
    }

    /// Returns true if this error is a local-only cache miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFoundLocal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors() {
        assert!(SyncError::remote("connection refused").is_remote());
        assert!(SyncError::remote_status(503, "unavailable").is_remote());
        assert!(!SyncError::IdentityMissing("book".into()).is_remote());
        assert!(!SyncError::NotFoundLocal { key: "k".into() }.is_remote());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotFoundLocal {
            key: "book/4".into(),
        };
        assert_eq!(err.to_string(), "nothing cached locally under book/4");
        assert!(err.is_not_found());

        let err = SyncError::remote_status(500, "boom");
        assert_eq!(err.to_string(), "remote failure: boom");
        assert!(matches!(
            err,
            SyncError::RemoteFailure {
                status: Some(500),
                ..
            }
        ));
    }
}
