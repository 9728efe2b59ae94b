use async_trait::async_trait;

use super::TimeRange;
use crate::{
    db::{
        bucket::{BucketExpr, DatabaseBackend},
        error::{DbError, DbResult},
    },
    models::{ALL_MODELS, AggregatedStat, PendingDelta, QuotaData},
};

/// How a delta reached durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// An existing row was incremented.
    Updated,
    /// A new row was inserted.
    Inserted,
}

/// Parameters of a bucketed sum query.
#[derive(Debug, Clone)]
pub struct AggregateQuery {
    pub range: TimeRange,
    /// Restrict to one account.
    pub user_id: Option<i64>,
    /// Restrict to one recorded username.
    pub username: Option<String>,
    pub bucket: BucketExpr,
    /// One row per (model, bucket) when true; one `"all"` row per bucket otherwise.
    pub group_by_model: bool,
}

#[async_trait]
pub trait QuotaDataRepo: Send + Sync {
    /// Add a delta to the row with the same composite key.
    /// Returns `false` when no such row exists.
    async fn increment(&self, delta: &PendingDelta) -> DbResult<bool>;

    /// Insert a new row from a delta.
    /// Fails with [`DbError::Conflict`] when a row with the same key exists.
    async fn insert(&self, delta: &PendingDelta) -> DbResult<()>;

    /// Raw hourly rows for a user, ascending by bucket.
    async fn list_by_user(&self, user_id: i64, range: TimeRange) -> DbResult<Vec<QuotaData>>;

    /// Raw hourly rows recorded under a username, ascending by bucket.
    async fn list_by_username(&self, username: &str, range: TimeRange)
    -> DbResult<Vec<QuotaData>>;

    /// Bucketed sums, ascending by bucket then model name.
    async fn aggregate(&self, query: &AggregateQuery) -> DbResult<Vec<AggregatedStat>>;

    /// Increment the matching row, or insert one if none exists.
    ///
    /// The unique index on the composite key makes a lost insert race surface
    /// as a conflict, in which case the increment is retried once.
    async fn apply_delta(&self, delta: &PendingDelta) -> DbResult<ApplyOutcome> {
        if self.increment(delta).await? {
            return Ok(ApplyOutcome::Updated);
        }
        match self.insert(delta).await {
            Ok(()) => Ok(ApplyOutcome::Inserted),
            Err(DbError::Conflict(_)) => {
                if self.increment(delta).await? {
                    Ok(ApplyOutcome::Updated)
                } else {
                    Err(DbError::Internal(
                        "quota_data row conflicted on insert but was not found on update".into(),
                    ))
                }
            }
            Err(e) => Err(e),
        }
    }
}

pub(crate) const QUOTA_DATA_COLUMNS: &str =
    "id, user_id, username, model_name, created_at, token_used, count, quota";

/// Build the bucketed sum query for a backend.
///
/// Bind order: `range.start`, `range.end`, then `user_id` and `username` when set.
pub(crate) fn aggregate_sql(backend: DatabaseBackend, query: &AggregateQuery) -> String {
    let bucket = query.bucket.to_sql(backend, "created_at");

    let mut param = 0;
    let mut next_param = || {
        param += 1;
        match backend {
            DatabaseBackend::Postgres => format!("${param}"),
            DatabaseBackend::Sqlite | DatabaseBackend::Mysql => "?".to_string(),
        }
    };

    let mut conditions = vec![
        format!("created_at >= {}", next_param()),
        format!("created_at <= {}", next_param()),
    ];
    if query.user_id.is_some() {
        conditions.push(format!("user_id = {}", next_param()));
    }
    if query.username.is_some() {
        conditions.push(format!("username = {}", next_param()));
    }

    let (model_col, group_by) = if query.group_by_model {
        ("model_name".to_string(), "model_name, bucket_start")
    } else {
        (format!("'{ALL_MODELS}'"), "bucket_start")
    };

    format!(
        "SELECT {bucket} AS bucket_start, {model_col} AS model_name, \
         {token_used} AS token_used, {count} AS count, {quota} AS quota \
         FROM quota_data \
         WHERE {conditions} \
         GROUP BY {group_by} \
         ORDER BY bucket_start ASC, model_name ASC",
        token_used = sum(backend, "token_used"),
        count = sum(backend, "count"),
        quota = sum(backend, "quota"),
        conditions = conditions.join(" AND "),
    )
}

/// `SUM` widened back to a 64-bit integer where the backend returns NUMERIC/DECIMAL.
fn sum(backend: DatabaseBackend, column: &str) -> String {
    match backend {
        DatabaseBackend::Sqlite => format!("SUM({column})"),
        DatabaseBackend::Postgres => format!("CAST(SUM({column}) AS BIGINT)"),
        DatabaseBackend::Mysql => format!("CAST(SUM({column}) AS SIGNED)"),
    }
}
