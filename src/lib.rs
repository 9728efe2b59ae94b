//! Usage statistics for dashboards.
//!
//! Producers record per-request usage into [`quota_cache::QuotaDataCache`],
//! which coalesces events into hourly deltas and periodically writes them to
//! the `quota_data` table. [`services::QuotaDataService`] serves bucketed
//! reads (hour, day, week, month) over the stored rows.

pub mod config;
pub mod db;
pub mod models;
pub mod observability;
pub mod quota_cache;
pub mod routes;
pub mod services;

use std::sync::Arc;

use crate::{
    config::QuotaboardConfig, db::DbPool, quota_cache::QuotaDataCache,
    services::QuotaDataService,
};

/// Shared state for HTTP handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<QuotaboardConfig>,
    pub db: Arc<DbPool>,
    /// Pending usage deltas awaiting the next flush.
    pub cache: Arc<QuotaDataCache>,
    pub quota_data: QuotaDataService,
}

impl AppState {
    /// Connect to the configured database and run migrations if enabled.
    pub async fn new(config: QuotaboardConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let pool = DbPool::from_config(&config.database).await?;
        if config.database.run_migrations() {
            pool.run_migrations().await?;
        }
        tracing::info!(backend = %pool.backend(), "Database ready");

        Ok(Self::with_pool(config, pool))
    }

    /// Build state around an already connected pool.
    pub fn with_pool(config: QuotaboardConfig, pool: DbPool) -> Self {
        let db = Arc::new(pool);
        let quota_data =
            QuotaDataService::new(db.quota_data(), config.data_export.timezone_offset_secs);

        Self {
            config: Arc::new(config),
            db,
            cache: Arc::new(QuotaDataCache::new()),
            quota_data,
        }
    }
}
