use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{RemoteError, RemoteResult};

/// Memoizes a catalog lookup.
///
/// Returns the cached value when present and fresh. Otherwise awaits the
/// block, stores its value and returns it. Errors from the block are returned
/// as is and never cached.
///
/// # Arguments
/// * `$cache`: a [`LookupCache`]
/// * `$key`: the [`LookupKey`] to store the value under
/// * `$ttl`: time-to-live in seconds
/// * `$block`: future producing a `RemoteResult` of the value
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        let key = $key;
        if let Some(cached) = $cache.get_from_cache(&key)? {
            Ok(cached)
        } else {
            let value = $block.await?;
            $cache.insert(&key, &value, $ttl);
            Ok(value)
        }
    }};
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    Providers(String),
    Catalog(String),
}

impl Display for LookupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupKey::Providers(movie_id) => write!(f, "providers:{}", movie_id),
            LookupKey::Catalog(query) => write!(f, "catalog:{}", query.to_lowercase()),
        }
    }
}

struct Stored {
    json: String,
    expires_at: Instant,
}

/// In-process cache for the opaque catalog and provider lookups
///
/// Values are kept serialized, so a hit hands out an independent copy.
#[derive(Clone, Default)]
pub struct LookupCache {
    entries: Arc<Mutex<HashMap<String, Stored>>>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key` unless it has expired
    pub fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &LookupKey,
    ) -> RemoteResult<Option<T>> {
        let mut entries = self.entries.lock();
        let key = key.to_string();

        let json = match entries.get(&key) {
            Some(stored) if stored.expires_at > Instant::now() => stored.json.clone(),
            Some(_) => {
                entries.remove(&key);
                return Ok(None);
            }
            None => return Ok(None),
        };
        drop(entries);

        let data = serde_json::from_str(&json)
            .map_err(|e| RemoteError::Network(format!("Cache deserialization error: {}", e)))?;
        Ok(Some(data))
    }

    pub fn insert<T: serde::Serialize>(&self, key: &LookupKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };

        let now = Instant::now();
        let mut entries = self.entries.lock();
        // Keys are open-ended (one per mood), so stale ones are swept here
        entries.retain(|_, stored| stored.expires_at > now);
        entries.insert(
            key.to_string(),
            Stored {
                json,
                expires_at: now + Duration::from_secs(ttl),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderSet;

    #[test]
    fn test_lookup_key_display() {
        assert_eq!(LookupKey::Providers("27205".to_string()).to_string(), "providers:27205");
        assert_eq!(LookupKey::Catalog("Cozy Rain".to_string()).to_string(), "catalog:cozy rain");
    }

    #[test]
    fn test_cache_miss() {
        let cache = LookupCache::new();
        let retrieved: Option<ProviderSet> = cache
            .get_from_cache(&LookupKey::Providers("1".to_string()))
            .unwrap();
        assert_eq!(retrieved, None);
    }

    #[test]
    fn test_insert_then_hit() {
        let cache = LookupCache::new();
        let key = LookupKey::Providers("27205".to_string());
        let value = ProviderSet {
            link: Some("https://example.org/watch".to_string()),
            ..Default::default()
        };

        cache.insert(&key, &value, 60);

        let retrieved: Option<ProviderSet> = cache.get_from_cache(&key).unwrap();
        assert_eq!(retrieved, Some(value));
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = LookupCache::new();
        let key = LookupKey::Providers("27205".to_string());
        cache.insert(&key, &ProviderSet::default(), 0);

        let retrieved: Option<ProviderSet> = cache.get_from_cache(&key).unwrap();
        assert_eq!(retrieved, None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_sweeps_expired_entries() {
        let cache = LookupCache::new();
        for mood in ["cozy", "tense", "sad"] {
            cache.insert(&LookupKey::Catalog(mood.to_string()), &Vec::<String>::new(), 0);
        }

        cache.insert(&LookupKey::Catalog("happy".to_string()), &vec!["Up".to_string()], 60);

        assert_eq!(cache.len(), 1);
        let retrieved: Option<Vec<String>> = cache
            .get_from_cache(&LookupKey::Catalog("happy".to_string()))
            .unwrap();
        assert_eq!(retrieved, Some(vec!["Up".to_string()]));
    }

    async fn lookup(cache: &LookupCache, calls: Arc<Mutex<u32>>) -> RemoteResult<Vec<String>> {
        cached!(
            cache,
            LookupKey::Catalog("heat".to_string()),
            60,
            async move {
                *calls.lock() += 1;
                Ok::<_, RemoteError>(vec!["Heat".to_string()])
            }
        )
    }

    async fn failing_lookup(cache: &LookupCache) -> RemoteResult<Vec<String>> {
        cached!(
            cache,
            LookupKey::Catalog("heat".to_string()),
            60,
            async { Err::<Vec<String>, _>(RemoteError::Network("down".to_string())) }
        )
    }

    #[tokio::test]
    async fn test_cached_macro_only_computes_once() {
        let cache = LookupCache::new();
        let calls = Arc::new(Mutex::new(0));

        for _ in 0..3 {
            let result = lookup(&cache, calls.clone()).await;
            assert_eq!(result.unwrap(), vec!["Heat".to_string()]);
        }

        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_cached_macro_does_not_store_errors() {
        let cache = LookupCache::new();

        assert!(failing_lookup(&cache).await.is_err());
        assert!(cache.is_empty());
    }
}
