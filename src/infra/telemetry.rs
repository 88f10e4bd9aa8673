use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "dispensa_cache_hit_total",
            Unit::Count,
            "Total number of cache hits."
        );
        describe_counter!(
            "dispensa_cache_miss_total",
            Unit::Count,
            "Total number of cache misses."
        );
        describe_counter!(
            "dispensa_cache_degraded_total",
            Unit::Count,
            "Total number of cache failures swallowed on the read path."
        );
        describe_counter!(
            "dispensa_cache_invalidation_failure_total",
            Unit::Count,
            "Total number of cache invalidations that could not be delivered."
        );
        describe_counter!(
            "dispensa_store_upload_bytes_total",
            Unit::Bytes,
            "Total bytes handed to the object store."
        );
        describe_counter!(
            "dispensa_store_multipart_sessions_total",
            Unit::Count,
            "Total number of multipart upload sessions opened."
        );
        describe_counter!(
            "dispensa_store_multipart_aborted_total",
            Unit::Count,
            "Total number of multipart upload sessions abandoned after a failure."
        );
        describe_counter!(
            "dispensa_fetch_failure_total",
            Unit::Count,
            "Total number of failed remote-URL ingestions."
        );
    });
}
