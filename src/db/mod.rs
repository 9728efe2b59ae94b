pub mod bucket;
mod error;
#[cfg(feature = "database-mysql")]
pub mod mysql;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(
    test,
    any(
        feature = "database-sqlite",
        feature = "database-postgres",
        feature = "database-mysql"
    )
))]
pub mod tests;

use std::sync::Arc;
#[cfg(any(
    feature = "database-sqlite",
    feature = "database-postgres",
    feature = "database-mysql"
))]
use std::time::Duration;

pub use bucket::DatabaseBackend;
pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// PostgreSQL pool configuration with optional read replica.
#[cfg(feature = "database-postgres")]
pub struct PgPoolPair {
    /// Primary pool for writes.
    pub write: sqlx::PgPool,
    /// Optional read replica pool. If None, reads use the write pool.
    pub read: Option<sqlx::PgPool>,
}

#[cfg(feature = "database-postgres")]
impl PgPoolPair {
    pub fn read_pool(&self) -> &sqlx::PgPool {
        self.read.as_ref().unwrap_or(&self.write)
    }

    pub fn write_pool(&self) -> &sqlx::PgPool {
        &self.write
    }
}

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    quota_data: Arc<dyn QuotaDataRepo>,
}

enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(PgPoolPair),
    #[cfg(feature = "database-mysql")]
    Mysql(sqlx::MySqlPool),
    #[cfg(not(any(
        feature = "database-sqlite",
        feature = "database-postgres",
        feature = "database-mysql"
    )))]
    _None(std::convert::Infallible),
}

/// Database pool supporting SQLite, PostgreSQL and MySQL.
///
/// The backend chosen at construction also selects the SQL dialect used for
/// bucket arithmetic in aggregate queries.
pub struct DbPool {
    inner: PoolStorage,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos {
            quota_data: Arc::new(sqlite::SqliteQuotaDataRepo::new(pool.clone())),
        };
        DbPool {
            inner: PoolStorage::Sqlite(pool),
            repos,
        }
    }

    /// Create a DbPool from existing PostgreSQL pools.
    /// Primarily useful for testing.
    #[cfg(feature = "database-postgres")]
    pub fn from_postgres(write_pool: sqlx::PgPool, read_pool: Option<sqlx::PgPool>) -> Self {
        let repos = CachedRepos {
            quota_data: Arc::new(postgres::PostgresQuotaDataRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
        };
        DbPool {
            inner: PoolStorage::Postgres(PgPoolPair {
                write: write_pool,
                read: read_pool,
            }),
            repos,
        }
    }

    /// Create a DbPool from an existing MySQL pool.
    ///
    /// Month buckets are computed with `FROM_UNIXTIME`/`UNIX_TIMESTAMP`, so the
    /// pool's sessions must run with `time_zone = '+00:00'`. See
    /// [`mysql::connect_options`].
    #[cfg(feature = "database-mysql")]
    pub fn from_mysql(pool: sqlx::MySqlPool) -> Self {
        let repos = CachedRepos {
            quota_data: Arc::new(mysql::MySqlQuotaDataRepo::new(pool.clone())),
        };
        DbPool {
            inner: PoolStorage::Mysql(pool),
            repos,
        }
    }

    /// Create a database pool from configuration
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                tracing::info!(path = %cfg.path, "Connected to SQLite");
                Ok(Self::from_sqlite(pool))
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                let options = || {
                    sqlx::postgres::PgPoolOptions::new()
                        .min_connections(cfg.min_connections)
                        .max_connections(cfg.max_connections)
                        .acquire_timeout(Duration::from_secs(cfg.connect_timeout_secs))
                        .idle_timeout(Duration::from_secs(cfg.idle_timeout_secs))
                };

                let write_pool = options().connect(&cfg.url).await?;

                let read_pool = if let Some(read_url) = &cfg.read_url {
                    tracing::info!("Configuring read replica pool");
                    Some(options().connect(read_url).await?)
                } else {
                    None
                };

                tracing::info!("Connected to PostgreSQL");
                Ok(Self::from_postgres(write_pool, read_pool))
            }
            #[cfg(feature = "database-mysql")]
            DatabaseConfig::Mysql(cfg) => {
                let pool = sqlx::mysql::MySqlPoolOptions::new()
                    .min_connections(cfg.min_connections)
                    .max_connections(cfg.max_connections)
                    .acquire_timeout(Duration::from_secs(cfg.connect_timeout_secs))
                    .idle_timeout(Duration::from_secs(cfg.idle_timeout_secs))
                    .connect_with(mysql::connect_options(&cfg.url)?)
                    .await?;

                tracing::info!("Connected to MySQL");
                Ok(Self::from_mysql(pool))
            }
        }
    }

    /// Run database migrations using sqlx's migration runner
    /// This automatically creates and manages a _sqlx_migrations table
    /// Migrations always run on the primary (write) pool.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
                tracing::info!("SQLite migrations completed successfully");
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                tracing::info!("Running PostgreSQL migrations");
                sqlx::migrate!("./migrations_sqlx/postgres")
                    .run(pools.write_pool())
                    .await?;
                tracing::info!("PostgreSQL migrations completed successfully");
                Ok(())
            }
            #[cfg(feature = "database-mysql")]
            PoolStorage::Mysql(pool) => {
                tracing::info!("Running MySQL migrations");
                sqlx::migrate!("./migrations_sqlx/mysql").run(pool).await?;
                tracing::info!("MySQL migrations completed successfully");
                Ok(())
            }
            #[cfg(not(any(
                feature = "database-sqlite",
                feature = "database-postgres",
                feature = "database-mysql"
            )))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Get quota data repository
    pub fn quota_data(&self) -> Arc<dyn QuotaDataRepo> {
        Arc::clone(&self.repos.quota_data)
    }

    /// SQL dialect of the underlying pool.
    pub fn backend(&self) -> DatabaseBackend {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(_) => DatabaseBackend::Sqlite,
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(_) => DatabaseBackend::Postgres,
            #[cfg(feature = "database-mysql")]
            PoolStorage::Mysql(_) => DatabaseBackend::Mysql,
            #[cfg(not(any(
                feature = "database-sqlite",
                feature = "database-postgres",
                feature = "database-mysql"
            )))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Health check for database connectivity
    pub async fn health_check(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                // Check both write and read pools
                sqlx::query("SELECT 1").execute(pools.write_pool()).await?;
                if let Some(read) = &pools.read {
                    sqlx::query("SELECT 1").execute(read).await?;
                }
                Ok(())
            }
            #[cfg(feature = "database-mysql")]
            PoolStorage::Mysql(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
            #[cfg(not(any(
                feature = "database-sqlite",
                feature = "database-postgres",
                feature = "database-mysql"
            )))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }
}
