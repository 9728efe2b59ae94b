//! Dashboard data endpoints.
//!
//! Responses always use HTTP 200 with a `{success, message, data}` envelope,
//! so dashboard clients can show validation errors inline.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use chrono::Utc;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    models::{AggregatedStat, Granularity, QuotaDataRows, UsageEvent},
    services::{QueryError, check_user_range},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/data", get(get_all_quota_data))
        .route("/users/{user_id}/data", get(get_user_quota_data))
        .route("/usage", post(record_usage))
}

/// Response envelope shared by the data endpoints.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: String::new(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

impl<T> From<Result<T, QueryError>> for ApiResponse<T> {
    fn from(result: Result<T, QueryError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

fn default_time() -> String {
    Granularity::Hour.as_str().to_string()
}

fn default_true() -> bool {
    true
}

/// Query parameters for `GET /api/data`.
#[derive(Debug, Deserialize)]
pub struct GlobalDataParams {
    #[serde(default)]
    pub start_timestamp: i64,
    #[serde(default)]
    pub end_timestamp: i64,
    /// Restrict to one username; empty means all users.
    #[serde(default)]
    pub username: String,
    /// Granularity token: `hour`, `day`, `week` or `month`.
    #[serde(default = "default_time")]
    pub default_time: String,
    #[serde(default = "default_true")]
    pub group_by_model: bool,
}

/// Query parameters for `GET /api/users/{user_id}/data`.
#[derive(Debug, Deserialize)]
pub struct UserDataParams {
    #[serde(default)]
    pub start_timestamp: i64,
    #[serde(default)]
    pub end_timestamp: i64,
    #[serde(default = "default_time")]
    pub default_time: String,
}

/// Bucketed usage across all users.
#[tracing::instrument(name = "quota_data.global", skip(state))]
pub async fn get_all_quota_data(
    State(state): State<AppState>,
    Query(params): Query<GlobalDataParams>,
) -> Json<ApiResponse<Vec<AggregatedStat>>> {
    Json(global_data(&state, &params).await.into())
}

async fn global_data(
    state: &AppState,
    params: &GlobalDataParams,
) -> Result<Vec<AggregatedStat>, QueryError> {
    let granularity: Granularity = params.default_time.parse()?;
    let (start, end) = (params.start_timestamp, params.end_timestamp);

    if params.group_by_model {
        state
            .quota_data
            .query_global(start, end, &params.username, granularity)
            .await
    } else {
        state
            .quota_data
            .query_global_ungrouped(start, end, &params.username, granularity)
            .await
    }
}

/// Usage for one user.
///
/// Hour granularity returns the stored rows; coarser granularities return
/// per-model sums.
#[tracing::instrument(name = "quota_data.user", skip(state))]
pub async fn get_user_quota_data(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<UserDataParams>,
) -> Json<ApiResponse<QuotaDataRows>> {
    Json(user_data(&state, user_id, &params).await.into())
}

async fn user_data(
    state: &AppState,
    user_id: i64,
    params: &UserDataParams,
) -> Result<QuotaDataRows, QueryError> {
    check_user_range(params.start_timestamp, params.end_timestamp)?;
    let granularity: Granularity = params.default_time.parse()?;
    state
        .quota_data
        .query_by_user_with_granularity(
            user_id,
            params.start_timestamp,
            params.end_timestamp,
            granularity,
        )
        .await
}

/// Record one usage event into the write cache.
///
/// Events with negative amounts are rejected with 422. Valid events are
/// dropped when data export is disabled.
#[tracing::instrument(
    name = "quota_data.record",
    skip(state, event),
    fields(user_id = event.user_id, model = %event.model_name)
)]
pub async fn record_usage(
    State(state): State<AppState>,
    Json(event): Json<UsageEvent>,
) -> Result<StatusCode, (StatusCode, Json<ApiResponse<()>>)> {
    if let Err(e) = event.validate() {
        tracing::debug!(error = %e, "Rejected usage event");
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::error(e.to_string())),
        ));
    }

    if !state.config.data_export.enabled {
        tracing::debug!("Data export disabled, usage event ignored");
        return Ok(StatusCode::NO_CONTENT);
    }

    let occurred_at = event.created_at.unwrap_or_else(|| Utc::now().timestamp());
    state.cache.record(
        event.user_id,
        &event.username,
        &event.model_name,
        event.quota,
        occurred_at,
        event.token_used,
    );
    Ok(StatusCode::NO_CONTENT)
}
