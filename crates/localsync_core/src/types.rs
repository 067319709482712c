//! Core type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute map of an entity, as stored and sent over the wire.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Millisecond timestamp keying one dirty-queue entry.
pub type Timestamp = u64;

/// A CRUD method routed through the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Create a resource that has no remote identity yet.
    Create,
    /// Read a resource.
    Read,
    /// Replace a resource.
    Update,
    /// Partially update a resource.
    Patch,
    /// Delete a resource.
    Delete,
}

impl Method {
    /// Returns the lowercase method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Create => "create",
            Method::Read => "read",
            Method::Update => "update",
            Method::Patch => "patch",
            Method::Delete => "delete",
        }
    }

    /// Returns true for methods that change remote state.
    #[must_use]
    pub const fn is_write(self) -> bool {
        !matches!(self, Method::Read)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key under which an entity is filed in the local store.
///
/// Either a generated identifier (entity has no remote identity yet) or the
/// entity's resource path.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    /// Wraps a raw key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StorageKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for StorageKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}
