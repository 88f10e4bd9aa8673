//! Redis-backed document cache with explicit lifecycle.
//!
//! Every call is a network round trip; there is no in-process layer in front
//! of the remote store. Entries are JSON text with a TTL and last-writer-wins
//! semantics. A miss is `Ok(None)`; a backend failure while connected is a
//! typed error so callers can tell the two apart. Every operation invoked
//! before [`KeyValueCache::connect`] fails uniformly with
//! [`CacheError::NotConnected`]; callers decide whether to swallow it.

use std::time::Duration;

use metrics::counter;
use redis::{
    AsyncCommands, Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde_json::Value;
use thiserror::Error;
use time::{
    Date, OffsetDateTime, PrimitiveDateTime,
    format_description::{FormatItem, well_known::Iso8601},
    macros::format_description,
};
use tracing::{debug, info};

use crate::config::CacheSettings;

const CONNECT_RETRIES: usize = 1;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Errors surfaced by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection is not established")]
    NotConnected,
    #[error("failed to connect to Redis: {0}")]
    Connect(#[source] redis::RedisError),
    #[error("failed to read key `{key}` from cache: {source}")]
    Get {
        key: String,
        #[source]
        source: redis::RedisError,
    },
    #[error("failed to write key `{key}` to cache: {source}")]
    Set {
        key: String,
        #[source]
        source: redis::RedisError,
    },
    #[error("failed to delete key `{key}` from cache: {source}")]
    Delete {
        key: String,
        #[source]
        source: redis::RedisError,
    },
    #[error("failed to flush the cache database: {0}")]
    Flush(#[source] redis::RedisError),
    #[error("failed to serialize document for key `{key}`: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cached document for key `{key}` is not valid JSON: {source}")]
    Deserialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Async wrapper around a remote Redis database storing JSON documents.
///
/// Constructed explicitly and passed to consumers by reference; `connect` and
/// `disconnect` are bound to process startup and shutdown by the entry point
/// that owns the instance.
pub struct KeyValueCache {
    url: String,
    default_ttl: Duration,
    manager: Option<ConnectionManager>,
}

impl KeyValueCache {
    #[must_use]
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            url: settings.url.clone(),
            default_ttl: settings.default_ttl,
            manager: None,
        }
    }

    /// Establish the connection pool. Must be called before any operation.
    pub async fn connect(&mut self) -> Result<(), CacheError> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(CONNECT_RETRIES)
            .set_connection_timeout(CONNECT_TIMEOUT);

        let client = Client::open(self.url.as_str()).map_err(CacheError::Connect)?;
        let manager = client
            .get_connection_manager_with_config(config)
            .await
            .map_err(CacheError::Connect)?;

        self.manager = Some(manager);
        info!("connected to Redis cache");
        Ok(())
    }

    /// Drop the connection. Subsequent operations fail with `NotConnected`.
    pub async fn disconnect(&mut self) {
        if self.manager.take().is_some() {
            info!("disconnected from Redis cache");
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.manager.is_some()
    }

    /// TTL applied when `set` is called without an explicit one.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn connection(&self) -> Result<ConnectionManager, CacheError> {
        // ConnectionManager is a cheap handle; each operation clones it so
        // concurrent callers never contend on `self`.
        self.manager.clone().ok_or(CacheError::NotConnected)
    }

    /// Fetch the document stored under `key`, or `None` on a miss.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut conn = self.connection()?;
        let raw: Option<String> = conn.get(key).await.map_err(|source| CacheError::Get {
            key: key.to_string(),
            source,
        })?;

        match raw {
            Some(text) => {
                let mut document: Value =
                    serde_json::from_str(&text).map_err(|source| CacheError::Deserialize {
                        key: key.to_string(),
                        source,
                    })?;
                normalize_recorded_at(&mut document);
                counter!("dispensa_cache_hit_total").increment(1);
                debug!(key, "cache hit");
                Ok(Some(document))
            }
            None => {
                counter!("dispensa_cache_miss_total").increment(1);
                debug!(key, "cache miss");
                Ok(None)
            }
        }
    }

    /// Store `document` under `key` with an expiration.
    ///
    /// A zero TTL does not store anything: the key is removed instead, so the
    /// next `get` observes absence (Redis rejects zero expirations).
    pub async fn set(
        &self,
        key: &str,
        document: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        let ttl = ttl.unwrap_or(self.default_ttl);

        if ttl.is_zero() {
            let _: () = conn.del(key).await.map_err(|source| CacheError::Set {
                key: key.to_string(),
                source,
            })?;
            return Ok(());
        }

        let text = serde_json::to_string(document).map_err(|source| CacheError::Serialize {
            key: key.to_string(),
            source,
        })?;
        let ttl_secs = expiry_seconds(ttl);
        let _: () = conn
            .set_ex(key, text, ttl_secs)
            .await
            .map_err(|source| CacheError::Set {
                key: key.to_string(),
                source,
            })?;

        debug!(key, ttl_secs, "cache set");
        Ok(())
    }

    /// Remove `key`. Removing an absent key succeeds.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        let _: () = conn.del(key).await.map_err(|source| CacheError::Delete {
            key: key.to_string(),
            source,
        })?;
        debug!(key, "cache delete");
        Ok(())
    }

    /// Clear the entire logical database. Administrative use only.
    pub async fn flush(&self) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(CacheError::Flush)?;
        info!("flushed cache database");
        Ok(())
    }
}

/// Convert a non-zero TTL to the whole seconds SETEX expects, rounding any
/// fractional remainder up so the expiry never truncates to the zero value
/// Redis rejects.
fn expiry_seconds(ttl: Duration) -> u64 {
    let mut secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        secs += 1;
    }
    secs
}

/// Rewrite any `recorded_at` field from an ISO-8601 datetime string to its
/// calendar-date portion.
///
/// One caller (the weight log) serializes `recorded_at` dates through a
/// datetime representation and expects a date back on read. The rule is
/// applied to top-level objects and to each element of top-level arrays; it
/// is deliberately not generalized further.
fn normalize_recorded_at(document: &mut Value) {
    match document {
        Value::Array(items) => {
            for item in items {
                normalize_entry(item);
            }
        }
        _ => normalize_entry(document),
    }
}

fn normalize_entry(document: &mut Value) {
    let Value::Object(map) = document else {
        return;
    };
    let Some(Value::String(raw)) = map.get_mut("recorded_at") else {
        return;
    };
    if let Some(date) = date_portion(raw) {
        *raw = date;
    }
}

fn date_portion(raw: &str) -> Option<String> {
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Iso8601::DEFAULT) {
        return parsed.date().format(DATE_FORMAT).ok();
    }
    if let Ok(parsed) = PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT) {
        return parsed.date().format(DATE_FORMAT).ok();
    }
    if let Ok(parsed) = Date::parse(raw, &Iso8601::DEFAULT) {
        return parsed.format(DATE_FORMAT).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn unconnected_cache() -> KeyValueCache {
        KeyValueCache::new(&CacheSettings {
            url: "redis://127.0.0.1:6379/0".into(),
            default_ttl: Duration::from_secs(3600),
        })
    }

    #[tokio::test]
    async fn every_operation_fails_uniformly_before_connect() {
        let cache = unconnected_cache();

        assert!(matches!(
            cache.get("user:alice").await,
            Err(CacheError::NotConnected)
        ));
        assert!(matches!(
            cache.set("user:alice", &json!({}), None).await,
            Err(CacheError::NotConnected)
        ));
        assert!(matches!(
            cache.delete("user:alice").await,
            Err(CacheError::NotConnected)
        ));
        assert!(matches!(cache.flush().await, Err(CacheError::NotConnected)));
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_a_no_op() {
        let mut cache = unconnected_cache();
        assert!(!cache.is_connected());
        cache.disconnect().await;
        assert!(!cache.is_connected());
    }

    #[test]
    fn sub_second_ttls_round_up_to_a_full_second() {
        // Zero durations never reach the conversion; they take the delete
        // branch in `set`. Everything else must map to a positive expiry.
        assert_eq!(expiry_seconds(Duration::from_millis(500)), 1);
        assert_eq!(expiry_seconds(Duration::from_nanos(1)), 1);
        assert_eq!(expiry_seconds(Duration::from_secs(1)), 1);
        assert_eq!(expiry_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(expiry_seconds(Duration::from_secs(3600)), 3600);
    }

    #[test]
    fn recorded_at_datetime_collapses_to_date() {
        let mut document = json!({"weight": 82.5, "recorded_at": "2025-03-14T08:30:00Z"});
        normalize_recorded_at(&mut document);
        assert_eq!(document["recorded_at"], "2025-03-14");
    }

    #[test]
    fn recorded_at_is_normalized_per_array_element() {
        let mut document = json!([
            {"recorded_at": "2025-03-14T08:30:00Z"},
            {"recorded_at": "2025-03-15"},
            {"other": "2025-03-16T00:00:00Z"}
        ]);
        normalize_recorded_at(&mut document);
        assert_eq!(document[0]["recorded_at"], "2025-03-14");
        assert_eq!(document[1]["recorded_at"], "2025-03-15");
        assert_eq!(document[2]["other"], "2025-03-16T00:00:00Z");
    }

    #[test]
    fn unparseable_recorded_at_is_left_alone() {
        let mut document = json!({"recorded_at": "yesterday"});
        normalize_recorded_at(&mut document);
        assert_eq!(document["recorded_at"], "yesterday");
    }
}
