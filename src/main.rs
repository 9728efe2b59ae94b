use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use quotaboard::{
    AppState,
    config::QuotaboardConfig,
    db::DbPool,
    observability::{self, metrics},
    routes,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// CLI arguments for quotaboard
#[derive(Parser, Debug)]
#[command(version, about = "Usage statistics aggregator", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "quotaboard.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the HTTP server and flush worker (default)
    Serve,
    /// Run database migrations and exit
    ///
    /// Useful for init containers or CI/CD pipelines.
    Migrate,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Migrate) => run_migrate(&args.config).await,
        Some(Command::Serve) | None => run_server(&args.config).await,
    }
}

fn load_config(path: &Path) -> QuotaboardConfig {
    match QuotaboardConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn init_tracing_or_exit(config: &QuotaboardConfig) {
    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run_server(config_path: &Path) {
    let config = load_config(config_path);
    init_tracing_or_exit(&config);

    if let Err(e) = metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics: {e}");
    }

    tracing::info!(
        config_file = %config_path.display(),
        "Starting quotaboard"
    );

    if config.database.is_none() {
        tracing::error!("No [database] configured; usage statistics need durable storage");
        std::process::exit(1);
    }

    let state = match AppState::new(config.clone()).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize application state");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let worker = if config.data_export.enabled {
        Some(state.cache.start_worker(
            state.db.quota_data(),
            config.data_export.flush_interval(),
            shutdown.clone(),
        ))
    } else {
        tracing::info!("Data export disabled, usage events will not be recorded");
        None
    };

    let app = routes::build_app(state);
    let addr = config.server.socket_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind listener");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "Server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    // In-flight requests have drained; flush whatever they recorded.
    shutdown.cancel();
    if let Some(handle) = worker {
        let timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
        finish_worker(handle, timeout).await;
    }

    tracing::info!("Shutdown complete");
}

async fn finish_worker(handle: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(())) => tracing::info!("Quota data cache flushed"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Flush worker terminated abnormally"),
        Err(_) => tracing::warn!("Timeout waiting for the final quota data flush"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining in-flight requests...");
}

async fn run_migrate(config_path: &Path) {
    let config = load_config(config_path);
    init_tracing_or_exit(&config);

    tracing::info!(
        config_file = %config_path.display(),
        "Running database migrations"
    );

    if config.database.is_none() {
        eprintln!("Error: Database is not configured. Nothing to migrate.");
        std::process::exit(1);
    }

    match DbPool::from_config(&config.database).await {
        Ok(pool) => match pool.run_migrations().await {
            Ok(()) => {
                tracing::info!("Database migrations completed successfully");
            }
            Err(e) => {
                tracing::error!(error = %e, "Database migrations failed");
                eprintln!("Error: Database migrations failed: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    }
}
