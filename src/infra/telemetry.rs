use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
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

/// Register descriptions for the page cache metrics. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "quire_page_cache_hit_total",
            Unit::Count,
            "Total number of requests answered from a stored page."
        );
        describe_counter!(
            "quire_page_cache_miss_total",
            Unit::Count,
            "Total number of requests kept out of the cache, by reason."
        );
        describe_counter!(
            "quire_page_cache_store_total",
            Unit::Count,
            "Total number of pages written to the cache."
        );
        describe_counter!(
            "quire_page_cache_store_failed_total",
            Unit::Count,
            "Total number of eligible pages that could not be written."
        );
        describe_counter!(
            "quire_page_cache_purge_deleted_total",
            Unit::Count,
            "Total number of stored pages deleted by purges."
        );
        describe_counter!(
            "quire_page_cache_purge_failed_total",
            Unit::Count,
            "Total number of stored pages a purge failed to delete."
        );
        describe_histogram!(
            "quire_page_cache_purge_ms",
            Unit::Milliseconds,
            "Full purge latency in milliseconds."
        );
    });
}
