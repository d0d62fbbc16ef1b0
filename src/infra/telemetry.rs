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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "piazza_cache_hit_total",
            Unit::Count,
            "Cache hits, labeled by read policy."
        );
        describe_counter!(
            "piazza_cache_miss_total",
            Unit::Count,
            "Cache misses that reached the backing source."
        );
        describe_counter!(
            "piazza_cache_null_marker_total",
            Unit::Count,
            "Lookups answered by the known-absent sentinel."
        );
        describe_counter!(
            "piazza_cache_stale_served_total",
            Unit::Count,
            "Logically-expired reads answered with the stale value."
        );
        describe_counter!(
            "piazza_cache_rebuild_total",
            Unit::Count,
            "Background cache rebuilds that repopulated an entry."
        );
        describe_counter!(
            "piazza_admission_total",
            Unit::Count,
            "Admission-gate decisions, labeled by outcome."
        );
        describe_counter!(
            "piazza_orders_persisted_total",
            Unit::Count,
            "Orders the worker committed to the relational store."
        );
        describe_counter!(
            "piazza_order_dropped_total",
            Unit::Count,
            "Deliveries the worker intentionally dropped, labeled by reason."
        );
        describe_histogram!(
            "piazza_order_handle_ms",
            Unit::Milliseconds,
            "Per-message order processing latency in milliseconds."
        );
    });
}
