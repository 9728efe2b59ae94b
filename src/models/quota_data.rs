use serde::{Deserialize, Serialize};

/// Width of the native write bucket, in seconds.
pub const HOUR_SECS: i64 = 3600;

/// Synthetic model name used by ungrouped aggregations.
pub const ALL_MODELS: &str = "all";

/// Truncate a Unix timestamp to the start of its hour.
pub fn truncate_to_hour(ts: i64) -> i64 {
    ts - ts.rem_euclid(HOUR_SECS)
}

/// Durable usage row, one per user × username × model × hour bucket.
///
/// `created_at` is the bucket start (Unix seconds, truncated to the hour).
/// `username` is captured when the usage is recorded and never updated
/// afterwards, so it may lag behind account renames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaData {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub model_name: String,
    pub created_at: i64,
    pub token_used: i64,
    pub count: i64,
    pub quota: i64,
}

/// Composite identity of a durable row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaDataKey {
    pub user_id: i64,
    pub username: String,
    pub model_name: String,
    /// Hour-truncated bucket start.
    pub created_at: i64,
}

impl QuotaDataKey {
    /// Build a key, truncating `occurred_at` to its hour bucket.
    pub fn new(
        user_id: i64,
        username: impl Into<String>,
        model_name: impl Into<String>,
        occurred_at: i64,
    ) -> Self {
        Self {
            user_id,
            username: username.into(),
            model_name: model_name.into(),
            created_at: truncate_to_hour(occurred_at),
        }
    }
}

/// Unflushed deltas accumulated for one key since the last flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelta {
    pub key: QuotaDataKey,
    pub count: i64,
    pub quota: i64,
    pub token_used: i64,
}

impl PendingDelta {
    /// A delta for a single event.
    pub fn first(key: QuotaDataKey, quota: i64, token_used: i64) -> Self {
        Self {
            key,
            count: 1,
            quota,
            token_used,
        }
    }

    /// Fold another event into this delta. Sums saturate at `i64::MAX`.
    pub fn accumulate(&mut self, quota: i64, token_used: i64) {
        self.count = self.count.saturating_add(1);
        self.quota = self.quota.saturating_add(quota);
        self.token_used = self.token_used.saturating_add(token_used);
    }
}

/// Query-time projection: summed accumulators for one bucket, optionally per model.
///
/// Ungrouped aggregations carry [`ALL_MODELS`] as the model name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedStat {
    pub created_at: i64,
    pub model_name: String,
    pub token_used: i64,
    pub count: i64,
    pub quota: i64,
}

/// A single usage event as submitted by a producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub user_id: i64,
    pub username: String,
    pub model_name: String,
    #[serde(default)]
    pub quota: i64,
    #[serde(default)]
    pub token_used: i64,
    /// Unix seconds. Defaults to the time the event is received.
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl UsageEvent {
    /// Accumulators only ever grow, so negative amounts are rejected.
    pub fn validate(&self) -> Result<(), InvalidUsageEvent> {
        for (field, value) in [("quota", self.quota), ("token_used", self.token_used)] {
            if value < 0 {
                return Err(InvalidUsageEvent::Negative { field, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidUsageEvent {
    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: i64 },
}

/// Result rows of a per-user query: raw hourly rows, or re-bucketed sums.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QuotaDataRows {
    Raw(Vec<QuotaData>),
    Aggregated(Vec<AggregatedStat>),
}

impl QuotaDataRows {
    pub fn len(&self) -> usize {
        match self {
            QuotaDataRows::Raw(rows) => rows.len(),
            QuotaDataRows::Aggregated(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
