//! Read-through cache
//!
//! Values are stored as JSON under `cache:<resource_type>` with native
//! expiry. The cache never fails its caller: unreadable entries are misses,
//! failed writes are logged and skipped. Concurrent misses for the same key
//! each fall through to the source; there is no single-flight.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::KeyValueStore;
use ig_common::cache_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KeyValueStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Cached value for `resource_type`, or None on a miss
    pub async fn get<T: DeserializeOwned>(&self, resource_type: &str) -> Option<T> {
        let key = cache_key(resource_type);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key = %key, error = %e, "Cached value did not deserialize, treating as miss");
                None
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, resource_type: &str, value: &T, ttl: Duration) {
        let key = cache_key(resource_type);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize cache value, skipping write");
                return;
            }
        };

        if let Err(e) = self.store.set_with_ttl(&key, &raw, ttl).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    pub async fn invalidate(&self, resource_type: &str) {
        let key = cache_key(resource_type);
        if let Err(e) = self.store.delete(&key).await {
            warn!(key = %key, error = %e, "Cache invalidation failed");
        }
    }

    /// Check the cache, fall back to `fetch` on a miss and populate the cache.
    ///
    /// Errors from `fetch` are returned as-is and nothing is cached.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        resource_type: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<(T, CacheStatus), E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(resource_type).await {
            return Ok((value, CacheStatus::Hit));
        }

        let value = fetch().await?;
        self.set(resource_type, &value, ttl).await;
        Ok((value, CacheStatus::Miss))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Quote {
        symbol: String,
        price: f64,
    }

    fn quote() -> Quote {
        Quote {
            symbol: "ACME".to_string(),
            price: 12.5,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_then_expiry() {
        let cache = Cache::new(Arc::new(MemoryStore::new()));

        cache.set("quotes:ACME", &quote(), Duration::from_secs(60)).await;
        assert_eq!(cache.get::<Quote>("quotes:ACME").await, Some(quote()));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.get::<Quote>("quotes:ACME").await, None);
    }

    #[tokio::test]
    async fn test_undecodable_value_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_with_ttl("cache:quotes:ACME", "not json", Duration::from_secs(60))
            .await
            .unwrap();

        let cache = Cache::new(store);
        assert_eq!(cache.get::<Quote>("quotes:ACME").await, None);
    }

    #[tokio::test]
    async fn test_wrong_type_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        store.set_add("cache:quotes:ACME", "x").await.unwrap();

        let cache = Cache::new(store);
        assert_eq!(cache.get::<Quote>("quotes:ACME").await, None);
        // the failed write is swallowed
        cache.set("quotes:ACME", &quote(), Duration::from_secs(60)).await;
    }

    #[tokio::test]
    async fn test_read_through() {
        let cache = Cache::new(Arc::new(MemoryStore::new()));
        let calls = AtomicUsize::new(0);

        for expected in [CacheStatus::Miss, CacheStatus::Hit] {
            let (value, status) = cache
                .get_or_fetch("quotes:ACME", Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(quote())
                })
                .await
                .unwrap();
            assert_eq!(value, quote());
            assert_eq!(status, expected);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_cached() {
        let cache = Cache::new(Arc::new(MemoryStore::new()));

        let result = cache
            .get_or_fetch::<Quote, _, _, _>("quotes:ACME", Duration::from_secs(60), || async {
                Err("upstream down".to_string())
            })
            .await;
        assert_eq!(result.unwrap_err(), "upstream down");
        assert_eq!(cache.get::<Quote>("quotes:ACME").await, None);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = Cache::new(Arc::new(MemoryStore::new()));
        cache.set("dashboard:u1", &quote(), Duration::from_secs(60)).await;
        cache.invalidate("dashboard:u1").await;
        assert_eq!(cache.get::<Quote>("dashboard:u1").await, None);
    }
}
