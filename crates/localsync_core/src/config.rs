//! Configuration for cache operations.

use crate::error::{SyncError, SyncResult};
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default store key holding the dirty-operation queue.
pub const DEFAULT_DIRTY_QUEUE_KEY: &str = "dirtyModels";

/// The public operation a configuration is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Single-entity fetch.
    Fetch,
    /// Single-entity save.
    Save,
    /// Single-entity destroy.
    Destroy,
    /// Fetch, falling back to save.
    FetchOrSave,
    /// Collection fetch.
    CollectionFetch,
}

/// Which stores one operation touches, and how.
///
/// A plain value: resolved once per call, never mutated afterwards. Use the
/// per-verb constructors for the documented defaults and the builder methods
/// to override single flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationConfig {
    /// Read from / write to the local store.
    pub local: bool,
    /// Invoke the remote executor.
    pub remote: bool,
    /// Write successful results into the local store.
    pub cache: bool,
    /// Drain the entity's dirty queue before a local+remote operation.
    pub auto_sync: bool,
    /// Send only the given attributes as a partial update.
    pub patch: bool,
}

impl OperationConfig {
    /// Defaults for `fetch`.
    #[must_use]
    pub const fn fetch() -> Self {
        Self {
            local: true,
            remote: true,
            cache: true,
            auto_sync: true,
            patch: false,
        }
    }

    /// Defaults for `save`.
    #[must_use]
    pub const fn save() -> Self {
        Self::fetch()
    }

    /// Defaults for `destroy` (caching does not apply).
    #[must_use]
    pub const fn destroy() -> Self {
        Self {
            local: true,
            remote: true,
            cache: false,
            auto_sync: true,
            patch: false,
        }
    }

    /// Defaults for `fetch_or_save`.
    #[must_use]
    pub const fn fetch_or_save() -> Self {
        Self::fetch()
    }

    /// Defaults for a collection fetch.
    #[must_use]
    pub const fn collection_fetch() -> Self {
        Self {
            local: true,
            remote: true,
            cache: true,
            auto_sync: false,
            patch: false,
        }
    }

    /// Returns the defaults for `verb`.
    #[must_use]
    pub const fn for_verb(verb: Verb) -> Self {
        match verb {
            Verb::Fetch => Self::fetch(),
            Verb::Save => Self::save(),
            Verb::Destroy => Self::destroy(),
            Verb::FetchOrSave => Self::fetch_or_save(),
            Verb::CollectionFetch => Self::collection_fetch(),
        }
    }

    /// Sets whether the local store participates.
    #[must_use]
    pub const fn local(mut self, value: bool) -> Self {
        self.local = value;
        self
    }

    /// Sets whether the remote executor participates.
    #[must_use]
    pub const fn remote(mut self, value: bool) -> Self {
        self.remote = value;
        self
    }

    /// Sets whether successful results are cached.
    #[must_use]
    pub const fn cache(mut self, value: bool) -> Self {
        self.cache = value;
        self
    }

    /// Sets whether the dirty queue is drained first.
    #[must_use]
    pub const fn auto_sync(mut self, value: bool) -> Self {
        self.auto_sync = value;
        self
    }

    /// Sets whether saves are partial updates.
    #[must_use]
    pub const fn patch(mut self, value: bool) -> Self {
        self.patch = value;
        self
    }

    /// Returns true if both stores participate.
    #[must_use]
    pub const fn is_dual_mode(&self) -> bool {
        self.local && self.remote
    }

    /// Returns true if this operation drains the dirty queue first.
    #[must_use]
    pub const fn drains(&self) -> bool {
        self.local && self.remote && self.auto_sync
    }

    /// Checks that the configuration can be executed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if neither store participates.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.local && !self.remote {
            return Err(SyncError::InvalidConfig(
                "at least one of local or remote must be enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Loose per-call overrides, as read from JSON or another untyped source.
///
/// Every flag is optional; unknown flags are rejected at deserialization.
///
/// ```rust
/// use localsync_core::{ConfigOverrides, Verb};
///
/// let overrides: ConfigOverrides = serde_json::from_str(r#"{"remote": false}"#).unwrap();
/// let config = overrides.resolve(Verb::Save).unwrap();
/// assert!(config.local && !config.remote && config.cache);
///
/// assert!(serde_json::from_str::<ConfigOverrides>(r#"{"sync": true}"#).is_err());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ConfigOverrides {
    /// Override for [`OperationConfig::local`].
    pub local: Option<bool>,
    /// Override for [`OperationConfig::remote`].
    pub remote: Option<bool>,
    /// Override for [`OperationConfig::cache`].
    pub cache: Option<bool>,
    /// Override for [`OperationConfig::auto_sync`].
    #[serde(alias = "auto_sync")]
    pub auto_sync: Option<bool>,
    /// Override for [`OperationConfig::patch`].
    pub patch: Option<bool>,
}

impl ConfigOverrides {
    /// Applies the overrides on top of the defaults for `verb`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if the result disables both
    /// stores, or if `cache` is given for a destroy.
    pub fn resolve(&self, verb: Verb) -> SyncResult<OperationConfig> {
        if verb == Verb::Destroy && self.cache.is_some() {
            return Err(SyncError::InvalidConfig(
                "cache does not apply to destroy".into(),
            ));
        }

        let defaults = OperationConfig::for_verb(verb);
        let config = OperationConfig {
            local: self.local.unwrap_or(defaults.local),
            remote: self.remote.unwrap_or(defaults.remote),
            cache: self.cache.unwrap_or(defaults.cache),
            auto_sync: self.auto_sync.unwrap_or(defaults.auto_sync),
            patch: self.patch.unwrap_or(defaults.patch),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Produces the generated storage keys for entities without remote identity.
#[derive(Clone)]
pub struct KeyGenerator(Arc<dyn Fn() -> String + Send + Sync>);

impl KeyGenerator {
    /// Random UUID v4 keys.
    #[must_use]
    pub fn uuid_v4() -> Self {
        Self(Arc::new(|| uuid::Uuid::new_v4().to_string()))
    }

    /// Deterministic `<prefix>-<n>` keys, starting at 1.
    #[must_use]
    pub fn sequential(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let counter = AtomicU64::new(0);
        Self(Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{prefix}-{n}")
        }))
    }

    /// Wraps a custom generator.
    pub fn from_fn(f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Produces the next key.
    #[must_use]
    pub fn generate(&self) -> String {
        (self.0)()
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::uuid_v4()
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyGenerator(..)")
    }
}

/// Engine-level configuration of a [`crate::LocalCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Store key holding the dirty-operation queue.
    pub dirty_queue_key: String,
    /// Dispatch drain retries concurrently (joined before the new operation).
    pub parallel_replay: bool,
    /// Generator for local storage keys.
    pub key_generator: KeyGenerator,
}

impl CacheConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dirty_queue_key: DEFAULT_DIRTY_QUEUE_KEY.to_string(),
            parallel_replay: true,
            key_generator: KeyGenerator::default(),
        }
    }

    /// Sets the store key of the dirty queue.
    #[must_use]
    pub fn with_dirty_queue_key(mut self, key: impl Into<String>) -> Self {
        self.dirty_queue_key = key.into();
        self
    }

    /// Sets whether drain retries run concurrently.
    #[must_use]
    pub fn with_parallel_replay(mut self, value: bool) -> Self {
        self.parallel_replay = value;
        self
    }

    /// Sets the local key generator.
    #[must_use]
    pub fn with_key_generator(mut self, generator: KeyGenerator) -> Self {
        self.key_generator = generator;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_defaults() {
        let fetch = OperationConfig::fetch();
        assert!(fetch.local && fetch.remote && fetch.cache && fetch.auto_sync);
        assert!(!fetch.patch);

        assert_eq!(OperationConfig::save(), fetch);
        assert!(!OperationConfig::destroy().cache);
        assert!(!OperationConfig::collection_fetch().auto_sync);
        assert!(OperationConfig::fetch().drains());
        assert!(!OperationConfig::fetch().remote(false).drains());
    }

    #[test]
    fn builder_pattern() {
        let config = OperationConfig::save().remote(false).patch(true);
        assert!(config.local);
        assert!(!config.remote);
        assert!(config.patch);
        assert!(!config.is_dual_mode());
    }

    #[test]
    fn neither_store_is_invalid() {
        let config = OperationConfig::fetch().local(false).remote(false);
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn overrides_apply_on_defaults() {
        let overrides: ConfigOverrides =
            serde_json::from_str(r#"{"local": false, "autoSync": false}"#).unwrap();
        let config = overrides.resolve(Verb::Fetch).unwrap();
        assert!(!config.local);
        assert!(config.remote);
        assert!(!config.auto_sync);
    }

    #[test]
    fn overrides_reject_unknown_and_invalid() {
        assert!(serde_json::from_str::<ConfigOverrides>(r#"{"wait": true}"#).is_err());

        let cache_on_destroy = ConfigOverrides {
            cache: Some(true),
            ..Default::default()
        };
        assert!(cache_on_destroy.resolve(Verb::Destroy).is_err());

        let nothing = ConfigOverrides {
            local: Some(false),
            remote: Some(false),
            ..Default::default()
        };
        assert!(nothing.resolve(Verb::Save).is_err());
    }

    #[test]
    fn sequential_keys() {
        let generator = KeyGenerator::sequential("tmp");
        assert_eq!(generator.generate(), "tmp-1");
        assert_eq!(generator.clone().generate(), "tmp-2");
    }

    #[test]
    fn cache_config_builder() {
        let config = CacheConfig::new()
            .with_dirty_queue_key("pending")
            .with_parallel_replay(false);
        assert_eq!(config.dirty_queue_key, "pending");
        assert!(!config.parallel_replay);
        assert_eq!(CacheConfig::default().dirty_queue_key, DEFAULT_DIRTY_QUEUE_KEY);
    }
}
