//! In-memory [`QuotaDataRepo`] for service and cache tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{AggregateQuery, QuotaDataRepo, TimeRange};
use crate::{
    db::error::{DbError, DbResult},
    models::{ALL_MODELS, AggregatedStat, PendingDelta, QuotaData, QuotaDataKey},
};

#[derive(Default)]
pub struct MockQuotaDataRepo {
    rows: Mutex<HashMap<QuotaDataKey, QuotaData>>,
    next_id: AtomicUsize,
    calls: AtomicUsize,
    failing_models: HashSet<String>,
    unavailable: bool,
}

impl MockQuotaDataRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write for `model` fails with an internal error.
    pub fn failing_for(model: &str) -> Self {
        Self {
            failing_models: HashSet::from([model.to_string()]),
            ..Self::default()
        }
    }

    /// Every call fails, as if the database were unreachable.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Number of repository calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> Vec<QuotaData> {
        let mut rows: Vec<_> = self.rows.lock().values().cloned().collect();
        rows.sort_by(|a, b| {
            (a.created_at, &a.model_name, a.user_id).cmp(&(b.created_at, &b.model_name, b.user_id))
        });
        rows
    }

    fn touch(&self) -> DbResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(DbError::Internal("database unavailable".into()));
        }
        Ok(())
    }

    fn check_failure(&self, delta: &PendingDelta) -> DbResult<()> {
        if self.failing_models.contains(&delta.key.model_name) {
            return Err(DbError::Internal(format!(
                "write rejected for model '{}'",
                delta.key.model_name
            )));
        }
        Ok(())
    }

    fn list_where(&self, range: TimeRange, keep: impl Fn(&QuotaData) -> bool) -> Vec<QuotaData> {
        self.rows()
            .into_iter()
            .filter(|r| r.created_at >= range.start && r.created_at <= range.end && keep(r))
            .collect()
    }
}

#[async_trait]
impl QuotaDataRepo for MockQuotaDataRepo {
    async fn increment(&self, delta: &PendingDelta) -> DbResult<bool> {
        self.touch()?;
        self.check_failure(delta)?;
        let mut rows = self.rows.lock();
        match rows.get_mut(&delta.key) {
            Some(row) => {
                row.count += delta.count;
                row.quota += delta.quota;
                row.token_used += delta.token_used;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert(&self, delta: &PendingDelta) -> DbResult<()> {
        self.touch()?;
        self.check_failure(delta)?;
        let mut rows = self.rows.lock();
        if rows.contains_key(&delta.key) {
            return Err(DbError::Conflict("duplicate quota_data key".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        rows.insert(
            delta.key.clone(),
            QuotaData {
                id,
                user_id: delta.key.user_id,
                username: delta.key.username.clone(),
                model_name: delta.key.model_name.clone(),
                created_at: delta.key.created_at,
                token_used: delta.token_used,
                count: delta.count,
                quota: delta.quota,
            },
        );
        Ok(())
    }

    async fn list_by_user(&self, user_id: i64, range: TimeRange) -> DbResult<Vec<QuotaData>> {
        self.touch()?;
        Ok(self.list_where(range, |r| r.user_id == user_id))
    }

    async fn list_by_username(
        &self,
        username: &str,
        range: TimeRange,
    ) -> DbResult<Vec<QuotaData>> {
        self.touch()?;
        Ok(self.list_where(range, |r| r.username == username))
    }

    async fn aggregate(&self, query: &AggregateQuery) -> DbResult<Vec<AggregatedStat>> {
        self.touch()?;
        let rows = self.list_where(query.range, |r| {
            query.user_id.is_none_or(|id| r.user_id == id)
                && query.username.as_deref().is_none_or(|name| r.username == name)
        });

        let mut sums: BTreeMap<(i64, String), AggregatedStat> = BTreeMap::new();
        for row in rows {
            let bucket = query.bucket.bucket_start(row.created_at);
            let model = if query.group_by_model {
                row.model_name.clone()
            } else {
                ALL_MODELS.to_string()
            };
            let stat = sums
                .entry((bucket, model.clone()))
                .or_insert_with(|| AggregatedStat {
                    created_at: bucket,
                    model_name: model,
                    token_used: 0,
                    count: 0,
                    quota: 0,
                });
            stat.token_used += row.token_used;
            stat.count += row.count;
            stat.quota += row.quota;
        }
        Ok(sums.into_values().collect())
    }
}
