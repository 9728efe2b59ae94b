//! Prometheus metrics for the service.
//!
//! Provides metrics for:
//! - HTTP request latency and counts
//! - Quota cache flushes (deltas written, failed, flush latency)
//! - Dashboard query latency by kind and granularity

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::{config::MetricsConfig, quota_cache::FlushReport};

/// Global Prometheus handle for the metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.latency_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let handle = builder.install_recorder().map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Convert millisecond buckets to seconds.
#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let status_class = format!("{}xx", status / 100);

        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string(), "status_class" => status_class.clone())
            .increment(1);

        histogram!("http_request_duration_seconds", "method" => method.to_string(), "path" => path.to_string(), "status_class" => status_class)
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (method, path, status, duration_secs);
    }
}

/// Record the outcome of a quota cache flush.
///
/// # Arguments
/// * `report` - Per-outcome delta counts for the flush
/// * `duration_secs` - Wall time spent writing the snapshot
pub fn record_quota_flush(report: &FlushReport, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        for (outcome, count) in [
            ("updated", report.updated),
            ("inserted", report.inserted),
            ("failed", report.failed),
        ] {
            if count > 0 {
                counter!("quota_cache_deltas_total", "outcome" => outcome)
                    .increment(count as u64);
            }
        }
        counter!("quota_cache_flushes_total").increment(1);
        histogram!("quota_cache_flush_duration_seconds").record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (report, duration_secs);
    }
}

/// Record a dashboard query.
///
/// `kind` names the query shape (`user`, `username`, `global`,
/// `global_ungrouped`); `result` is `success`, `invalid` or `error`.
pub fn record_quota_query(kind: &str, granularity: &str, result: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "quota_queries_total",
            "kind" => kind.to_string(),
            "granularity" => granularity.to_string(),
            "result" => result.to_string()
        )
        .increment(1);
        histogram!(
            "quota_query_duration_seconds",
            "kind" => kind.to_string(),
            "granularity" => granularity.to_string()
        )
        .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, granularity, result, duration_secs);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
