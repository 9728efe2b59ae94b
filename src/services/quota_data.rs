use std::{future::Future, sync::Arc, time::Instant};

use crate::{
    db::{AggregateQuery, DbError, QuotaDataRepo, TimeRange, bucket::BucketExpr},
    models::{AggregatedStat, Granularity, InvalidGranularity, QuotaData, QuotaDataRows},
    observability::metrics,
};

/// Widest range a per-user or per-username query may span (30 days).
pub const MAX_USER_RANGE_SECS: i64 = 2_592_000;

/// Read side of the usage statistics: validated, bucketed queries over
/// the durable hourly rows. Pending cache deltas are not visible here.
#[derive(Clone)]
pub struct QuotaDataService {
    repo: Arc<dyn QuotaDataRepo>,
    timezone_offset: i64,
}

impl QuotaDataService {
    /// `timezone_offset` is seconds east of UTC used to align day, week and
    /// month buckets.
    pub fn new(repo: Arc<dyn QuotaDataRepo>, timezone_offset: i64) -> Self {
        Self {
            repo,
            timezone_offset,
        }
    }

    pub fn timezone_offset(&self) -> i64 {
        self.timezone_offset
    }

    /// Raw hourly rows for one user, across all models.
    pub async fn query_by_user(
        &self,
        user_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<QuotaData>, QueryError> {
        let range = TimeRange::new(start, end);
        observe("user", Granularity::Hour, async {
            check_range(range)?;
            Ok(self.repo.list_by_user(user_id, range).await?)
        })
        .await
    }

    /// Rows for one user at the requested granularity.
    ///
    /// Hour returns the stored rows unchanged; coarser granularities are
    /// summed per (model, bucket).
    pub async fn query_by_user_with_granularity(
        &self,
        user_id: i64,
        start: i64,
        end: i64,
        granularity: Granularity,
    ) -> Result<QuotaDataRows, QueryError> {
        let range = TimeRange::new(start, end);
        observe("user", granularity, async {
            check_range(range)?;
            if granularity.is_native() {
                let rows = self.repo.list_by_user(user_id, range).await?;
                return Ok(QuotaDataRows::Raw(rows));
            }
            let query = AggregateQuery {
                range,
                user_id: Some(user_id),
                username: None,
                bucket: BucketExpr::for_query(granularity, self.timezone_offset),
                group_by_model: true,
            };
            Ok(QuotaDataRows::Aggregated(self.repo.aggregate(&query).await?))
        })
        .await
    }

    /// Per-model sums across all users, optionally restricted to a username.
    ///
    /// An empty `username` means every user. There is no range limit.
    pub async fn query_global(
        &self,
        start: i64,
        end: i64,
        username: &str,
        granularity: Granularity,
    ) -> Result<Vec<AggregatedStat>, QueryError> {
        observe("global", granularity, async {
            let query = self.global_query(start, end, username, granularity, true);
            Ok(self.repo.aggregate(&query).await?)
        })
        .await
    }

    /// Like [`query_global`](Self::query_global), but one row per bucket with
    /// `model_name = "all"`.
    pub async fn query_global_ungrouped(
        &self,
        start: i64,
        end: i64,
        username: &str,
        granularity: Granularity,
    ) -> Result<Vec<AggregatedStat>, QueryError> {
        observe("global_ungrouped", granularity, async {
            let query = self.global_query(start, end, username, granularity, false);
            Ok(self.repo.aggregate(&query).await?)
        })
        .await
    }

    /// Raw hourly rows recorded under a username.
    pub async fn query_by_username(
        &self,
        username: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<QuotaData>, QueryError> {
        let range = TimeRange::new(start, end);
        observe("username", Granularity::Hour, async {
            check_range(range)?;
            Ok(self.repo.list_by_username(username, range).await?)
        })
        .await
    }

    fn global_query(
        &self,
        start: i64,
        end: i64,
        username: &str,
        granularity: Granularity,
        group_by_model: bool,
    ) -> AggregateQuery {
        AggregateQuery {
            range: TimeRange::new(start, end),
            user_id: None,
            username: (!username.is_empty()).then(|| username.to_string()),
            bucket: BucketExpr::for_query(granularity, self.timezone_offset),
            group_by_model,
        }
    }
}

/// Reject per-user ranges wider than [`MAX_USER_RANGE_SECS`].
pub fn check_user_range(start: i64, end: i64) -> Result<(), QueryError> {
    check_range(TimeRange::new(start, end))
}

fn check_range(range: TimeRange) -> Result<(), QueryError> {
    if range.width() > MAX_USER_RANGE_SECS {
        return Err(QueryError::RangeTooWide);
    }
    Ok(())
}

async fn observe<T>(
    kind: &'static str,
    granularity: Granularity,
    query: impl Future<Output = Result<T, QueryError>>,
) -> Result<T, QueryError> {
    let started = Instant::now();
    let result = query.await;
    let outcome = match &result {
        Ok(_) => "success",
        Err(QueryError::Database(e)) => {
            tracing::warn!(kind, granularity = %granularity, error = %e, "Quota query failed");
            "error"
        }
        Err(_) => "invalid",
    };
    metrics::record_quota_query(
        kind,
        granularity.as_str(),
        outcome,
        started.elapsed().as_secs_f64(),
    );
    result
}

/// Errors returned by quota queries.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    InvalidGranularity(#[from] InvalidGranularity),

    #[error("time range cannot exceed 30 days")]
    RangeTooWide,

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}
