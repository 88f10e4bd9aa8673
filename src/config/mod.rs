//! Configuration layer: typed settings with layered precedence (file → env).

use std::{num::NonZeroU64, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;


const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "dispensa";
const ENV_PREFIX: &str = "DISPENSA";

const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_MULTIPART_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_PART_SIZE_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_FETCH_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FETCH_READ_TIMEOUT_SECS: u64 = 270;
const DEFAULT_FETCH_TOTAL_TIMEOUT_SECS: u64 = 300;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub object_store: ObjectStoreSettings,
    pub fetch: FetchSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub url: String,
    pub default_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct ObjectStoreSettings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Public domain prepended to object keys when building URLs.
    pub access_domain: String,
    pub multipart_threshold_bytes: NonZeroU64,
    pub part_size_bytes: NonZeroU64,
    pub max_upload_bytes: Option<NonZeroU64>,
    /// Content types accepted by `put`; empty means no restriction.
    pub allowed_content_types: Vec<String>,
}

/// Timeouts for URL-based ingestion. The connect timeout bounds dial latency,
/// the read timeout bounds socket stalls, and the total timeout caps the whole
/// download against slow third-party hosts.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub total_timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_FETCH_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_FETCH_READ_TIMEOUT_SECS),
            total_timeout: Duration::from_secs(DEFAULT_FETCH_TOTAL_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment).
pub fn load() -> Result<Settings, LoadError> {
    load_from(None)
}

/// Load settings, optionally forcing an explicit configuration file.
pub fn load_from(config_file: Option<&std::path::Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    object_store: RawObjectStoreSettings,
    fetch: RawFetchSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    url: Option<String>,
    default_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawObjectStoreSettings {
    bucket: Option<String>,
    region: Option<String>,
    endpoint: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    access_domain: Option<String>,
    multipart_threshold_bytes: Option<u64>,
    part_size_bytes: Option<u64>,
    max_upload_bytes: Option<u64>,
    allowed_content_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFetchSettings {
    connect_timeout_seconds: Option<u64>,
    read_timeout_seconds: Option<u64>,
    total_timeout_seconds: Option<u64>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            object_store,
            fetch,
        } = raw;

        let level = match logging.level.as_deref() {
            Some(value) => value.parse::<LevelFilter>().map_err(|_| {
                LoadError::invalid(
                    "logging.level",
                    format!("`{value}` is not one of trace|debug|info|warn|error"),
                )
            })?,
            None => LevelFilter::INFO,
        };
        let format = if logging.json.unwrap_or(false) {
            LogFormat::Json
        } else {
            LogFormat::Compact
        };

        let cache = CacheSettings {
            url: cache
                .url
                .ok_or_else(|| LoadError::invalid("cache.url", "missing Redis connection URL"))?,
            default_ttl: Duration::from_secs(
                cache.default_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS),
            ),
        };

        let multipart_threshold_bytes = non_zero(
            "object_store.multipart_threshold_bytes",
            object_store
                .multipart_threshold_bytes
                .unwrap_or(DEFAULT_MULTIPART_THRESHOLD_BYTES),
        )?;
        let part_size_bytes = non_zero(
            "object_store.part_size_bytes",
            object_store
                .part_size_bytes
                .unwrap_or(DEFAULT_PART_SIZE_BYTES),
        )?;
        if part_size_bytes > multipart_threshold_bytes {
            return Err(LoadError::invalid(
                "object_store.part_size_bytes",
                "part size must not exceed the multipart threshold",
            ));
        }
        let max_upload_bytes = object_store
            .max_upload_bytes
            .map(|value| non_zero("object_store.max_upload_bytes", value))
            .transpose()?;

        let object_store = ObjectStoreSettings {
            bucket: object_store
                .bucket
                .ok_or_else(|| LoadError::invalid("object_store.bucket", "missing bucket name"))?,
            region: object_store.region.unwrap_or_else(|| "us-east-1".into()),
            endpoint: object_store.endpoint,
            access_key_id: object_store.access_key_id,
            secret_access_key: object_store.secret_access_key,
            access_domain: object_store.access_domain.ok_or_else(|| {
                LoadError::invalid("object_store.access_domain", "missing public access domain")
            })?,
            multipart_threshold_bytes,
            part_size_bytes,
            max_upload_bytes,
            allowed_content_types: object_store.allowed_content_types.unwrap_or_default(),
        };

        let fetch = FetchSettings {
            connect_timeout: Duration::from_secs(
                fetch
                    .connect_timeout_seconds
                    .unwrap_or(DEFAULT_FETCH_CONNECT_TIMEOUT_SECS),
            ),
            read_timeout: Duration::from_secs(
                fetch
                    .read_timeout_seconds
                    .unwrap_or(DEFAULT_FETCH_READ_TIMEOUT_SECS),
            ),
            total_timeout: Duration::from_secs(
                fetch
                    .total_timeout_seconds
                    .unwrap_or(DEFAULT_FETCH_TOTAL_TIMEOUT_SECS),
            ),
        };
        if fetch.connect_timeout >= fetch.total_timeout {
            return Err(LoadError::invalid(
                "fetch.connect_timeout_seconds",
                "connect timeout must be shorter than the total timeout",
            ));
        }

        Ok(Self {
            logging: LoggingSettings { level, format },
            cache,
            object_store,
            fetch,
        })
    }
}

fn non_zero(key: &'static str, value: u64) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "value must be greater than zero"))
}
