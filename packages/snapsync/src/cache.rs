//! Keyed caches of fetched, read-only payloads.
//!
//! Every logical cache (job groups, labor statistics, advice tips, advice
//! content) shares one update contract, [`KeyedCache::set`]: an update whose
//! key or value is missing is a no-op that returns the cache untouched
//! (pointer-equal). This is what lets the reducer treat heterogeneous caches
//! the same way.
//!
//! Entries are never invalidated by time. They are overwritten by a fresher
//! fetch, or dropped wholesale per project through [`KeyedCache::drop_scope`]
//! on a two-level cache.

use std::borrow::Borrow;
use std::fmt;

/// Separator between the business identifiers of a composite key.
pub const KEY_SEPARATOR: char = ':';

/// Composite cache key built from one or more business identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Single-identifier key. `None` when the identifier is empty.
    pub fn new(id: impl AsRef<str>) -> Option<Self> {
        Self::compose([id])
    }

    /// Join identifiers with [`KEY_SEPARATOR`].
    ///
    /// Returns `None` if there are no parts or any part is empty: a key with
    /// a hole in it would alias an unrelated entry.
    pub fn compose<I, S>(parts: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = String::new();
        for (i, part) in parts.into_iter().enumerate() {
            let part = part.as_ref();
            if part.is_empty() {
                return None;
            }
            if i > 0 {
                key.push(KEY_SEPARATOR);
            }
            key.push_str(part);
        }
        if key.is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistent map from [`CacheKey`] to a fetched payload.
///
/// Cloning is O(1) and shares structure. Updates return a new cache and leave
/// the original untouched.
#[derive(Clone, PartialEq)]
pub struct KeyedCache<V: Clone> {
    entries: im::HashMap<CacheKey, V>,
}

impl<V: Clone> KeyedCache<V> {
    pub fn new() -> Self {
        Self {
            entries: im::HashMap::new(),
        }
    }

    /// Add or overwrite `key -> value`.
    ///
    /// If either `key` or `value` is `None` the cache is returned unchanged
    /// (the same underlying map, see [`KeyedCache::same_as`]).
    pub fn set(&self, key: Option<CacheKey>, value: Option<V>) -> Self {
        match (key, value) {
            (Some(key), Some(value)) => Self {
                entries: self.entries.update(key, value),
            },
            _ => self.clone(),
        }
    }

    /// Remove an entry. Unchanged (same map) if it was absent.
    pub fn remove(&self, key: &str) -> Self {
        if self.entries.contains_key(key) {
            Self {
                entries: self.entries.without(key),
            }
        } else {
            self.clone()
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CacheKey, &V)> {
        self.entries.iter()
    }

    /// Reference equality: true when both caches share the same map.
    pub fn same_as(&self, other: &Self) -> bool {
        self.entries.ptr_eq(&other.entries)
    }
}

/// Two-level cache: entries grouped under a scope key (a project id).
impl<V: Clone> KeyedCache<KeyedCache<V>> {
    /// Set `scope -> key -> value`, creating the inner cache if needed.
    ///
    /// Same no-op rule as [`KeyedCache::set`], applied to all three parts.
    pub fn set_scoped(
        &self,
        scope: Option<CacheKey>,
        key: Option<CacheKey>,
        value: Option<V>,
    ) -> Self {
        let (Some(scope), Some(key), Some(value)) = (scope, key, value) else {
            return self.clone();
        };
        let inner = self.get(scope.as_str()).cloned().unwrap_or_default();
        self.set(Some(scope), Some(inner.set(Some(key), Some(value))))
    }

    pub fn get_scoped(&self, scope: &str, key: &str) -> Option<&V> {
        self.get(scope).and_then(|inner| inner.get(key))
    }

    /// Drop every entry under `scope` in one removal.
    pub fn drop_scope(&self, scope: &str) -> Self {
        self.remove(scope)
    }
}

impl<V: Clone> Default for KeyedCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + fmt::Debug> fmt::Debug for KeyedCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

/// Free-function form of the update contract, for caches that may not exist
/// yet.
///
/// - `key` or `value` missing: `cache` is returned as-is, including `None`.
/// - otherwise: a cache equal to `cache` (or empty) plus `key -> value`.
pub fn set<V: Clone>(
    cache: Option<&KeyedCache<V>>,
    key: Option<CacheKey>,
    value: Option<V>,
) -> Option<KeyedCache<V>> {
    match (key, value) {
        (Some(key), Some(value)) => {
            let base = cache.cloned().unwrap_or_default();
            Some(base.set(Some(key), Some(value)))
        }
        _ => cache.cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Option<CacheKey> {
        CacheKey::new(s)
    }

    #[test]
    fn test_compose_joins_with_separator() {
        let k = CacheKey::compose(["75", "job1"]).unwrap();
        assert_eq!(k.as_str(), "75:job1");
        assert_eq!(k.to_string(), "75:job1");
    }

    #[test]
    fn test_compose_rejects_missing_parts() {
        assert!(CacheKey::compose(["75", ""]).is_none());
        assert!(CacheKey::compose(["", "job1"]).is_none());
        assert!(CacheKey::compose(Vec::<String>::new()).is_none());
        assert!(CacheKey::new("").is_none());
    }

    #[test]
    fn test_set_adds_and_overwrites() {
        let cache = KeyedCache::new().set(key("a"), Some(1));
        assert_eq!(cache.get("a"), Some(&1));

        let updated = cache.set(key("a"), Some(2));
        assert_eq!(updated.get("a"), Some(&2));
        // Original untouched
        assert_eq!(cache.get("a"), Some(&1));
    }

    #[test]
    fn test_set_without_key_or_value_is_same_reference() {
        let cache = KeyedCache::new().set(key("a"), Some(1));

        assert!(cache.set(None, Some(5)).same_as(&cache));
        assert!(cache.set(key("b"), None).same_as(&cache));
        assert!(cache.set(None, None).same_as(&cache));
        assert_eq!(cache.set(None, Some(5)).len(), 1);
    }

    #[test]
    fn test_free_set_keeps_missing_cache_missing() {
        assert!(set::<u32>(None, None, Some(1)).is_none());
        assert!(set::<u32>(None, key("k"), None).is_none());

        let created = set(None, key("k"), Some(1)).unwrap();
        assert_eq!(created.get("k"), Some(&1));

        let unchanged = set(Some(&created), None, Some(2)).unwrap();
        assert!(unchanged.same_as(&created));
    }

    #[test]
    fn test_remove_absent_is_same_reference() {
        let cache = KeyedCache::new().set(key("a"), Some(1));
        assert!(cache.remove("missing").same_as(&cache));

        let removed = cache.remove("a");
        assert!(removed.is_empty());
        assert!(!removed.same_as(&cache));
    }

    #[test]
    fn test_scoped_set_and_drop() {
        let cache: KeyedCache<KeyedCache<&str>> = KeyedCache::new();
        let cache = cache
            .set_scoped(key("p1"), key("commute"), Some("take the bus"))
            .set_scoped(key("p1"), key("network"), Some("call friends"))
            .set_scoped(key("p2"), key("commute"), Some("walk"));

        assert_eq!(cache.get_scoped("p1", "network"), Some(&"call friends"));
        assert_eq!(cache.get("p1").map(KeyedCache::len), Some(2));

        let dropped = cache.drop_scope("p1");
        assert!(dropped.get("p1").is_none());
        assert_eq!(dropped.get_scoped("p2", "commute"), Some(&"walk"));
    }

    #[test]
    fn test_scoped_set_missing_part_is_noop() {
        let cache: KeyedCache<KeyedCache<u8>> = KeyedCache::new().set_scoped(key("p"), key("a"), Some(1));

        assert!(cache.set_scoped(None, key("a"), Some(2)).same_as(&cache));
        assert!(cache.set_scoped(key("p"), None, Some(2)).same_as(&cache));
        assert!(cache.set_scoped(key("p"), key("a"), None).same_as(&cache));
    }
}
