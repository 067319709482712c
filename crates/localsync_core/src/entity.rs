//! Entity and collection abstractions consumed by the cache.

use crate::types::Attributes;
use serde_json::Value;

/// Default attribute carrying an entity's remote identity.
pub const DEFAULT_ID_ATTRIBUTE: &str = "id";

/// A record the cache can file locally and address remotely.
///
/// The cache only needs attribute access, an identity predicate and a
/// resource path. Implement this for your own model types or use
/// [`Record`].
pub trait Entity {
    /// Returns a serializable snapshot of all attributes.
    fn snapshot(&self) -> Attributes;

    /// Merges `attrs` into the entity's attributes.
    fn set(&mut self, attrs: &Attributes);

    /// Returns the remote identity, if the remote has assigned one.
    fn remote_id(&self) -> Option<String>;

    /// Returns true while the entity has no remote identity.
    fn is_new(&self) -> bool {
        self.remote_id().is_none()
    }

    /// Returns the collection path new entities are created under.
    fn url_root(&self) -> &str;

    /// Returns the resource path, once the entity has a remote identity.
    fn resource_path(&self) -> Option<String> {
        self.remote_id().map(|id| join_path(self.url_root(), &id))
    }

    /// Returns the generated local key, if one was assigned.
    fn local_key(&self) -> Option<&str>;

    /// Stores a generated local key on the entity.
    fn assign_local_key(&mut self, key: String);
}

/// Joins a collection root and an identifier into a resource path.
pub fn join_path(root: &str, id: &str) -> String {
    if root.ends_with('/') {
        format!("{root}{id}")
    } else {
        format!("{root}/{id}")
    }
}

/// A schemaless entity backed by a JSON attribute map.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    url_root: String,
    id_attribute: String,
    attributes: Attributes,
    local_key: Option<String>,
}

impl Record {
    /// Creates an empty record living under `url_root`.
    pub fn new(url_root: impl Into<String>) -> Self {
        Self::with_attributes(url_root, Attributes::new())
    }

    /// Creates a record with initial attributes.
    pub fn with_attributes(url_root: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            url_root: url_root.into(),
            id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
            attributes,
            local_key: None,
        }
    }

    /// Uses `name` instead of `id` as the identity attribute.
    #[must_use]
    pub fn with_id_attribute(mut self, name: impl Into<String>) -> Self {
        self.id_attribute = name.into();
        self
    }

    /// Returns one attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Sets one attribute.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Returns all attributes.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

impl Entity for Record {
    fn snapshot(&self) -> Attributes {
        self.attributes.clone()
    }

    fn set(&mut self, attrs: &Attributes) {
        for (name, value) in attrs {
            self.attributes.insert(name.clone(), value.clone());
        }
    }

    fn remote_id(&self) -> Option<String> {
        match self.attributes.get(&self.id_attribute)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn url_root(&self) -> &str {
        &self.url_root
    }

    fn local_key(&self) -> Option<&str> {
        self.local_key.as_deref()
    }

    fn assign_local_key(&mut self, key: String) {
        self.local_key = Some(key);
    }
}

/// An ordered set of [`Record`]s living under one collection path.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    url: String,
    members: Vec<Record>,
}

impl Collection {
    /// Creates an empty collection at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            members: Vec::new(),
        }
    }

    /// Returns the collection path.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the members in order.
    #[must_use]
    pub fn members(&self) -> &[Record] {
        &self.members
    }

    /// Returns the members mutably.
    pub fn members_mut(&mut self) -> &mut [Record] {
        &mut self.members
    }

    /// Returns the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the collection has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Finds a member by remote identity.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.members
            .iter()
            .find(|m| m.remote_id().as_deref() == Some(id))
    }

    /// Finds a member by remote identity, mutably.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        self.members
            .iter_mut()
            .find(|m| m.remote_id().as_deref() == Some(id))
    }

    /// Appends a member.
    pub fn push(&mut self, record: Record) {
        self.members.push(record);
    }

    /// Replaces all members with records built from `snapshots`.
    pub fn reset(&mut self, snapshots: Vec<Attributes>) {
        self.members = snapshots
            .into_iter()
            .map(|attrs| Record::with_attributes(self.url.clone(), attrs))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn record_identity() {
        let mut book = Record::new("book");
        assert!(book.is_new());
        assert_eq!(book.resource_path(), None);

        book.insert("id", 4);
        assert!(!book.is_new());
        assert_eq!(book.remote_id(), Some("4".to_string()));
        assert_eq!(book.resource_path(), Some("book/4".to_string()));

        book.insert("id", Value::Null);
        assert!(book.is_new());
    }

    #[test]
    fn record_string_id_and_custom_attribute() {
        let book = Record::with_attributes("books/", attrs(json!({"isbn": "978-0"})))
            .with_id_attribute("isbn");
        assert_eq!(book.resource_path(), Some("books/978-0".to_string()));
    }

    #[test]
    fn record_set_merges() {
        let mut book = Record::with_attributes("book", attrs(json!({"title": "A", "year": 1929})));
        book.set(&attrs(json!({"year": 1937})));
        assert_eq!(book.snapshot(), attrs(json!({"title": "A", "year": 1937})));
    }

    #[test]
    fn collection_reset_and_lookup() {
        let mut books = Collection::new("book");
        books.reset(vec![attrs(json!({"id": 1})), attrs(json!({"id": 2}))]);
        assert_eq!(books.len(), 2);
        assert_eq!(books.get("2").unwrap().url_root(), "book");
        assert!(books.get("3").is_none());
    }
}
