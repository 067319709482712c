//! JSON helpers over a [`LocalStore`].

use crate::error::SyncResult;
use localsync_storage::LocalStore;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Typed JSON access to a byte store.
pub trait JsonStoreExt: LocalStore {
    /// Reads and decodes the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the value is not valid JSON
    /// for `T`.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encodes `value` and stores it under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the store write fails.
    fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> SyncResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, &bytes)?;
        Ok(())
    }
}

impl<S: LocalStore + ?Sized> JsonStoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attributes;
    use localsync_storage::InMemoryStore;
    use serde_json::json;

    #[test]
    fn json_roundtrip_and_absent() {
        let store = InMemoryStore::new();
        assert_eq!(store.get_json::<Attributes>("book/1").unwrap(), None);

        let attrs = json!({"title": "East of Eden"}).as_object().cloned().unwrap();
        store.put_json("book/1", &attrs).unwrap();
        assert_eq!(store.get_json::<Attributes>("book/1").unwrap(), Some(attrs));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let store = InMemoryStore::new();
        store.put("bad", b"{not json").unwrap();
        assert!(store.get_json::<Attributes>("bad").is_err());
    }
}
