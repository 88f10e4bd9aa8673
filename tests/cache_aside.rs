//! Read-through and invalidation behavior against an in-memory document cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dispensa::application::cache_aside::{DocumentCache, invalidate, read_through};
use dispensa::application::keys;
use dispensa::infra::cache::CacheError;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Product {
    id: Uuid,
    name: String,
    calories: u32,
}

fn oat_milk() -> Product {
    Product {
        id: Uuid::nil(),
        name: "Oat Milk".into(),
        calories: 46,
    }
}

/// Document cache double. `broken` makes every operation fail the way a
/// disconnected backend does; a zero TTL removes the entry.
#[derive(Default)]
struct MemoryCache {
    entries: Mutex<HashMap<String, Value>>,
    broken: AtomicBool,
}

impl MemoryCache {
    fn broken() -> Self {
        let cache = Self::default();
        cache.broken.store(true, Ordering::SeqCst);
        cache
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.broken.load(Ordering::SeqCst) {
            Err(CacheError::NotConnected)
        } else {
            Ok(())
        }
    }

    fn entry(&self, key: &str) -> Option<Value> {
        self.entries.lock().expect("entries lock").get(key).cloned()
    }
}

#[async_trait]
impl DocumentCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.check()?;
        Ok(self.entry(key))
    }

    async fn set(
        &self,
        key: &str,
        document: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.check()?;
        let mut entries = self.entries.lock().expect("entries lock");
        if ttl == Some(Duration::ZERO) {
            entries.remove(key);
        } else {
            entries.insert(key.to_string(), document.clone());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.entries.lock().expect("entries lock").remove(key);
        Ok(())
    }
}

#[tokio::test]
async fn miss_fetches_and_populates() {
    let cache = MemoryCache::default();
    let key = keys::product(Uuid::nil(), Uuid::nil());
    let fetches = AtomicUsize::new(0);

    let value: Product = read_through(&cache, &key, None, || async {
        fetches.fetch_add(1, Ordering::SeqCst);
        Ok::<_, CacheError>(oat_milk())
    })
    .await
    .expect("read");

    assert_eq!(value, oat_milk());
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert!(cache.entry(&key).is_some());
}

#[tokio::test]
async fn hit_skips_the_source_of_truth() {
    let cache = MemoryCache::default();
    let key = keys::product(Uuid::nil(), Uuid::nil());
    cache
        .set(&key, &serde_json::to_value(oat_milk()).expect("json"), None)
        .await
        .expect("seed");

    let fetched = AtomicBool::new(false);
    let value: Product = read_through(&cache, &key, None, || async {
        fetched.store(true, Ordering::SeqCst);
        Ok::<_, CacheError>(Product {
            calories: 999,
            ..oat_milk()
        })
    })
    .await
    .expect("read");

    assert_eq!(value, oat_milk());
    assert!(!fetched.load(Ordering::SeqCst));
}

#[tokio::test]
async fn broken_cache_degrades_to_the_source_of_truth() {
    let cache = MemoryCache::broken();
    let key = keys::user("alice");

    let value: Product = read_through(&cache, &key, None, || async {
        Ok::<_, CacheError>(oat_milk())
    })
    .await
    .expect("read");

    assert_eq!(value, oat_milk());
}

#[tokio::test]
async fn undecodable_entry_falls_through_to_a_refetch() {
    let cache = MemoryCache::default();
    let key = keys::user("alice");
    cache
        .set(&key, &Value::String("not a product".into()), None)
        .await
        .expect("seed");

    let value: Product = read_through(&cache, &key, None, || async {
        Ok::<_, CacheError>(oat_milk())
    })
    .await
    .expect("read");

    assert_eq!(value, oat_milk());
    // The stale shape was overwritten with the fetched document.
    assert_eq!(
        cache.entry(&key),
        Some(serde_json::to_value(oat_milk()).expect("json"))
    );
}

#[tokio::test]
async fn fetch_errors_propagate() {
    let cache = MemoryCache::default();

    let result: Result<Product, CacheError> =
        read_through(&cache, "user:alice", None, || async {
            Err(CacheError::NotConnected)
        })
        .await;

    assert!(result.is_err());
    assert!(cache.entry("user:alice").is_none());
}

#[tokio::test]
async fn zero_ttl_population_leaves_no_entry() {
    let cache = MemoryCache::default();
    let key = keys::user("alice");

    let _: Product = read_through(&cache, &key, Some(Duration::ZERO), || async {
        Ok::<_, CacheError>(oat_milk())
    })
    .await
    .expect("read");

    assert!(cache.entry(&key).is_none());
}

#[tokio::test]
async fn invalidate_clears_every_key() {
    let cache = MemoryCache::default();
    let user_id = Uuid::nil();
    let targets = [keys::user("alice"), keys::user_products(user_id)];
    for key in &targets {
        cache
            .set(key, &Value::Bool(true), None)
            .await
            .expect("seed");
    }

    let failures = invalidate(&cache, &targets).await;

    assert!(failures.is_empty());
    assert!(cache.entry(&targets[0]).is_none());
    assert!(cache.entry(&targets[1]).is_none());
}

#[tokio::test]
async fn invalidate_reports_failures_without_stopping() {
    let cache = MemoryCache::broken();
    let targets = [keys::user("alice"), keys::user("bob")];

    let failures = invalidate(&cache, &targets).await;

    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].0, targets[0]);
    assert_eq!(failures[1].0, targets[1]);
}
