//! Storage key resolution.

use crate::config::KeyGenerator;
use crate::entity::Entity;
use crate::types::StorageKey;

/// Derives the local-store key for an entity.
///
/// While the entity has no remote identity it is filed under a generated
/// identifier, assigned on the first call and kept on the entity. Once the
/// remote has assigned an identity, the resource path is used instead.
///
/// # Side effects
///
/// [`resolve`](Self::resolve) on an identity-less entity without a local key
/// assigns one. That happens at most once per entity instance; later calls
/// return the same key for as long as the entity stays new.
#[derive(Debug, Clone, Default)]
pub struct StorageKeyResolver {
    generator: KeyGenerator,
}

impl StorageKeyResolver {
    /// Creates a resolver using `generator` for new entities.
    pub fn new(generator: KeyGenerator) -> Self {
        Self { generator }
    }

    /// Returns the storage key for `entity`, assigning a local key if needed.
    pub fn resolve<E: Entity + ?Sized>(&self, entity: &mut E) -> StorageKey {
        if let Some(path) = entity.resource_path() {
            return StorageKey::new(path);
        }
        if let Some(key) = entity.local_key() {
            return StorageKey::from(key);
        }

        let key = self.generator.generate();
        tracing::trace!(key = %key, "assigned local storage key");
        entity.assign_local_key(key.clone());
        StorageKey::new(key)
    }

    /// Returns the storage key without assigning anything.
    pub fn peek<E: Entity + ?Sized>(&self, entity: &E) -> Option<StorageKey> {
        entity
            .resource_path()
            .or_else(|| entity.local_key().map(str::to_string))
            .map(StorageKey::new)
    }

    /// Returns the generated key, if one was ever assigned.
    pub fn generated<E: Entity + ?Sized>(&self, entity: &E) -> Option<StorageKey> {
        entity.local_key().map(StorageKey::from)
    }

    /// Returns `(generated, resource_path)` if the entity was filed under a
    /// generated key and has since acquired a remote identity.
    pub fn migration<E: Entity + ?Sized>(&self, entity: &E) -> Option<(StorageKey, StorageKey)> {
        let old = self.generated(entity)?;
        let new = StorageKey::new(entity.resource_path()?);
        (old != new).then_some((old, new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;

    fn resolver() -> StorageKeyResolver {
        StorageKeyResolver::new(KeyGenerator::sequential("local"))
    }

    #[test]
    fn new_entity_gets_stable_generated_key() {
        let resolver = resolver();
        let mut book = Record::new("book");

        let first = resolver.resolve(&mut book);
        let second = resolver.resolve(&mut book);
        assert_eq!(first.as_str(), "local-1");
        assert_eq!(first, second);
        assert_eq!(book.local_key(), Some("local-1"));
    }

    #[test]
    fn identified_entity_uses_resource_path() {
        let resolver = resolver();
        let mut book = Record::new("book");
        book.insert("id", 7);

        assert_eq!(resolver.resolve(&mut book).as_str(), "book/7");
        assert_eq!(book.local_key(), None);
        assert_eq!(resolver.migration(&book), None);
    }

    #[test]
    fn identity_assignment_reports_migration() {
        let resolver = resolver();
        let mut book = Record::new("book");
        let generated = resolver.resolve(&mut book);

        book.insert("id", 12);
        let (old, new) = resolver.migration(&book).unwrap();
        assert_eq!(old, generated);
        assert_eq!(new.as_str(), "book/12");
        assert_eq!(resolver.resolve(&mut book), new);
    }

    #[test]
    fn peek_does_not_assign() {
        let resolver = resolver();
        let book = Record::new("book");
        assert_eq!(resolver.peek(&book), None);
        assert_eq!(book.local_key(), None);
    }
}
