// src/metrics.rs
#![cfg_attr(not(feature = "observability"), allow(unused_variables))]

#[cfg(feature = "observability")]
pub use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_histogram, histogram};

/// Initializes the descriptions for all the metrics in the SDK.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_histogram!(
        "multicall_batch_size",
        "Number of distinct sub-calls sent in one aggregated call."
    );
    describe_counter!(
        "multicall_batches_total",
        Unit::Count,
        "Aggregated calls that returned a usable response, labeled by network."
    );
    describe_counter!(
        "multicall_batch_failed_total",
        Unit::Count,
        "Aggregated calls that failed as a whole, labeled by network."
    );
    describe_counter!(
        "multicall_decode_failures_total",
        Unit::Count,
        "Sub-call results that reverted or could not be decoded, labeled by function."
    );
    describe_counter!(
        "positions_computed_total",
        Unit::Count,
        "Position instances produced by the valuation pipeline, labeled by app and group."
    );
    describe_counter!(
        "positions_omitted_total",
        Unit::Count,
        "Position instances omitted after a fetch or validation failure."
    );
    describe_counter!(
        "pipeline_retries_total",
        Unit::Count,
        "Group fetches re-run after a batch execution failure."
    );
    describe_counter!(
        "price_lookup_miss_total",
        Unit::Count,
        "Token price lookups that found no base or app-token price."
    );
}

pub fn record_multicall_batch_size(size: f64) {
    histogram!("multicall_batch_size", size);
}

pub fn increment_multicall_batches(network: &str) {
    counter!("multicall_batches_total", 1, "network" => network.to_string());
}

pub fn increment_multicall_batch_failed(network: &str) {
    counter!("multicall_batch_failed_total", 1, "network" => network.to_string());
}

pub fn increment_decode_failures(function: &str) {
    counter!("multicall_decode_failures_total", 1, "function" => function.to_string());
}

pub fn increment_positions_computed(app_id: &str, group_id: &str, count: u64) {
    counter!(
        "positions_computed_total",
        count,
        "app" => app_id.to_string(),
        "group" => group_id.to_string()
    );
}

pub fn increment_positions_omitted(app_id: &str, group_id: &str, count: u64) {
    counter!(
        "positions_omitted_total",
        count,
        "app" => app_id.to_string(),
        "group" => group_id.to_string()
    );
}

pub fn increment_pipeline_retries(app_id: &str) {
    counter!("pipeline_retries_total", 1, "app" => app_id.to_string());
}

pub fn increment_price_lookup_miss(network: &str) {
    counter!("price_lookup_miss_total", 1, "network" => network.to_string());
}

/// Installs the Prometheus exporter on `bind_address` and registers metric descriptions.
#[cfg(feature = "observability")]
pub fn install_prometheus_exporter(bind_address: std::net::SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(bind_address)
        .install()?;
    describe_metrics();
    log::info!("Prometheus metrics exporter listening on {}", bind_address);
    Ok(())
}
