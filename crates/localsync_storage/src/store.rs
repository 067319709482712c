//! Local store trait definition.

use crate::error::StorageResult;
use std::sync::Arc;

/// A durable key-value store for cached entity state.
///
/// Stores are **opaque byte maps**. The caller decides what keys mean and
/// how values are encoded; a store only keeps them.
///
/// # Invariants
///
/// - `get` after `put` on the same key returns the bytes just written
/// - `get` after `delete` returns `None`
/// - `delete` of an absent key succeeds
/// - Stores must be `Send + Sync`; all methods take `&self`
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait LocalStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying medium cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable.
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `key` from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be made durable.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Returns every live key, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the key set cannot be read.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Returns true if `key` currently holds a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying medium cannot be read.
    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

impl<S: LocalStore + ?Sized> LocalStore for Arc<S> {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        (**self).delete(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        (**self).keys()
    }

    fn contains(&self, key: &str) -> StorageResult<bool> {
        (**self).contains(key)
    }
}

impl<S: LocalStore + ?Sized> LocalStore for &S {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        (**self).delete(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        (**self).keys()
    }

    fn contains(&self, key: &str) -> StorageResult<bool> {
        (**self).contains(key)
    }
}
