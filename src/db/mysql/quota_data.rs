use async_trait::async_trait;
use sqlx::{MySqlPool, Row};

use crate::{
    db::{
        bucket::DatabaseBackend,
        error::{DbError, DbResult},
        repos::{AggregateQuery, QUOTA_DATA_COLUMNS, QuotaDataRepo, TimeRange, aggregate_sql},
    },
    models::{AggregatedStat, PendingDelta, QuotaData},
};

pub struct MySqlQuotaDataRepo {
    pool: MySqlPool,
}

impl MySqlQuotaDataRepo {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::mysql::MySqlRow) -> QuotaData {
        QuotaData {
            id: row.get("id"),
            user_id: row.get("user_id"),
            username: row.get("username"),
            model_name: row.get("model_name"),
            created_at: row.get("created_at"),
            token_used: row.get("token_used"),
            count: row.get("count"),
            quota: row.get("quota"),
        }
    }
}

#[async_trait]
impl QuotaDataRepo for MySqlQuotaDataRepo {
    async fn increment(&self, delta: &PendingDelta) -> DbResult<bool> {
        // count >= 1 in every delta, so a matched row is always a changed row.
        let result = sqlx::query(
            r#"
            UPDATE quota_data
            SET count = count + ?, quota = quota + ?, token_used = token_used + ?
            WHERE user_id = ? AND username = ? AND model_name = ? AND created_at = ?
            "#,
        )
        .bind(delta.count)
        .bind(delta.quota)
        .bind(delta.token_used)
        .bind(delta.key.user_id)
        .bind(&delta.key.username)
        .bind(&delta.key.model_name)
        .bind(delta.key.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert(&self, delta: &PendingDelta) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO quota_data (user_id, username, model_name, created_at, token_used, count, quota)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(delta.key.user_id)
        .bind(&delta.key.username)
        .bind(&delta.key.model_name)
        .bind(delta.key.created_at)
        .bind(delta.token_used)
        .bind(delta.count)
        .bind(delta.quota)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => DbError::Conflict(
                format!(
                    "quota_data row for user {} model '{}' at {} already exists",
                    delta.key.user_id, delta.key.model_name, delta.key.created_at
                ),
            ),
            _ => DbError::from(e),
        })?;

        Ok(())
    }

    async fn list_by_user(&self, user_id: i64, range: TimeRange) -> DbResult<Vec<QuotaData>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {QUOTA_DATA_COLUMNS}
            FROM quota_data
            WHERE user_id = ? AND created_at >= ? AND created_at <= ?
            ORDER BY created_at ASC, model_name ASC
            "#,
        ))
        .bind(user_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn list_by_username(
        &self,
        username: &str,
        range: TimeRange,
    ) -> DbResult<Vec<QuotaData>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {QUOTA_DATA_COLUMNS}
            FROM quota_data
            WHERE username = ? AND created_at >= ? AND created_at <= ?
            ORDER BY created_at ASC, model_name ASC
            "#,
        ))
        .bind(username)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn aggregate(&self, query: &AggregateQuery) -> DbResult<Vec<AggregatedStat>> {
        let sql = aggregate_sql(DatabaseBackend::Mysql, query);

        let mut q = sqlx::query(&sql).bind(query.range.start).bind(query.range.end);
        if let Some(user_id) = query.user_id {
            q = q.bind(user_id);
        }
        if let Some(username) = &query.username {
            q = q.bind(username);
        }

        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|row| AggregatedStat {
                created_at: row.get("bucket_start"),
                model_name: row.get("model_name"),
                token_used: row.get("token_used"),
                count: row.get("count"),
                quota: row.get("quota"),
            })
            .collect())
    }
}
