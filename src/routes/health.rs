//! Health check and metrics endpoints.

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;

use crate::AppState;
#[cfg(feature = "prometheus")]
use crate::observability::metrics::get_prometheus_handle;

/// Health status response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// "healthy" or "unhealthy"
    pub status: String,
    pub version: String,
    pub database: ComponentStatus,
    /// Usage keys recorded but not yet flushed.
    pub pending_deltas: usize,
}

/// Status of a single component.
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Latency of the health check in milliseconds
    pub latency_ms: u64,
}

/// Database connectivity check.
///
/// Returns 503 when the database cannot be reached.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = std::time::Instant::now();
    let db_result = state.db.health_check().await;
    let latency_ms = start.elapsed().as_millis() as u64;

    let healthy = db_result.is_ok();
    if let Err(e) = &db_result {
        tracing::warn!(error = %e, "Database health check failed");
    }

    let health = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: ComponentStatus {
            healthy,
            message: db_result
                .err()
                .map(|_| "Database connection failed".to_string()),
            latency_ms,
        },
        pending_deltas: state.cache.len(),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

/// Prometheus metrics endpoint.
///
/// Returns metrics in Prometheus text format.
#[tracing::instrument(name = "health.metrics")]
pub async fn metrics() -> impl IntoResponse {
    #[cfg(feature = "prometheus")]
    {
        return match get_prometheus_handle() {
            Some(handle) => (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            ),
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            ),
        };
    }
    #[cfg(not(feature = "prometheus"))]
    (
        StatusCode::NOT_FOUND,
        [("content-type", "text/plain")],
        "Prometheus metrics not enabled".to_string(),
    )
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use axum::{Router, body::Body};
    use http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::{MetricsConfig, ObservabilityConfig, QuotaboardConfig},
        db::{DbPool, tests::harness},
    };

    async fn test_app(config: QuotaboardConfig) -> (AppState, Router) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let pool = harness::create_sqlite_pool().await;
        harness::run_sqlite_migrations(&pool).await;
        let state = AppState::with_pool(config, DbPool::from_sqlite(pool));
        let app = crate::routes::build_app(state.clone());
        (state, app)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health_check_with_db_healthy() {
        let (state, app) = test_app(QuotaboardConfig::default()).await;
        state.cache.record(1, "alice", "gpt-4", 5, 1_704_067_200, 2);

        let (status, body) = get(&app, "/health").await;
        let body: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert!(body["version"].as_str().unwrap().contains('.'));
        assert_eq!(body["database"]["healthy"], true);
        assert!(body["database"]["latency_ms"].is_number());
        assert_eq!(body["pending_deltas"], 1);
    }

    #[tokio::test]
    async fn test_metrics_route_absent_when_disabled() {
        let (_, app) = test_app(QuotaboardConfig::default()).await;

        let (status, _) = get(&app, "/metrics").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_route_mounted_when_enabled() {
        let config = QuotaboardConfig {
            observability: ObservabilityConfig {
                metrics: MetricsConfig {
                    enabled: true,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let (_, app) = test_app(config).await;

        let (status, _) = get(&app, "/metrics").await;

        // The recorder is process-global and not installed in tests.
        #[cfg(feature = "prometheus")]
        assert!(matches!(
            status,
            StatusCode::OK | StatusCode::SERVICE_UNAVAILABLE
        ));
        #[cfg(not(feature = "prometheus"))]
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
