pub mod health;
pub mod quota_data;

use std::time::Instant;

use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware::{Next, from_fn},
    response::Response,
    routing::get,
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{AppState, observability::metrics};

/// Assemble the HTTP application.
pub fn build_app(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", quota_data::routes());

    if state.config.observability.metrics.enabled {
        app = app.route("/metrics", get(health::metrics));
    }

    let body_limit = state.config.server.body_limit_bytes;

    app.route_layer(from_fn(track_http_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

/// Record request count and latency per matched route.
async fn track_http_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
