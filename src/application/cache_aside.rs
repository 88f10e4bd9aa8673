//! Cache-aside read path and write-side invalidation.
//!
//! Every read-path cache problem degrades to the source of truth: a miss, a
//! backend failure, and an undecodable entry all fall through to `fetch`.
//! Population after a fetch is best-effort. There is no stampede protection;
//! concurrent misses on one key all hit the source simultaneously.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::infra::cache::{CacheError, KeyValueCache};

/// The cache capability the services consume. Implemented by
/// [`KeyValueCache`]; tests substitute an in-memory map.
#[async_trait]
pub trait DocumentCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;
    async fn set(
        &self,
        key: &str,
        document: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[async_trait]
impl DocumentCache for KeyValueCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        KeyValueCache::get(self, key).await
    }

    async fn set(
        &self,
        key: &str,
        document: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        KeyValueCache::set(self, key, document, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        KeyValueCache::delete(self, key).await
    }
}

/// Serve `key` from the cache, falling through to `fetch` and populating the
/// entry with `ttl` on the way back.
///
/// Only `fetch` errors propagate; cache failures are logged and counted.
pub async fn read_through<C, T, E, F, Fut>(
    cache: &C,
    key: &str,
    ttl: Option<Duration>,
    fetch: F,
) -> Result<T, E>
where
    C: DocumentCache + ?Sized,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match cache.get(key).await {
        Ok(Some(document)) => match serde_json::from_value(document) {
            Ok(value) => return Ok(value),
            Err(error) => {
                warn!(key, %error, "cached document is stale-shaped; refetching");
            }
        },
        Ok(None) => debug!(key, "cache miss; reading source of truth"),
        Err(error) => {
            counter!("dispensa_cache_degraded_total").increment(1);
            warn!(key, %error, "cache unavailable on read; degrading to source of truth");
        }
    }

    let value = fetch().await?;

    match serde_json::to_value(&value) {
        Ok(document) => {
            if let Err(error) = cache.set(key, &document, ttl).await {
                warn!(key, %error, "failed to populate cache after fetch");
            }
        }
        Err(error) => warn!(key, %error, "fetched value is not representable as JSON"),
    }

    Ok(value)
}

/// Best-effort removal of every key in `keys` after a write.
///
/// Failures are returned (stale-data risk the caller may want to log or
/// alert on) but never block the write that triggered the invalidation.
pub async fn invalidate<C>(cache: &C, keys: &[String]) -> Vec<(String, CacheError)>
where
    C: DocumentCache + ?Sized,
{
    let mut failures = Vec::new();
    for key in keys {
        if let Err(error) = cache.delete(key).await {
            counter!("dispensa_cache_invalidation_failure_total").increment(1);
            warn!(key, %error, "failed to invalidate cache entry");
            failures.push((key.clone(), error));
        }
    }
    failures
}
