//! clinicflow -- deferred flow execution for clinic patient journeys.
//!
//! A caller asks to run a flow for a patient after a delay. The request is
//! stored in SQLite, an in-process timer is armed, and when it fires the
//! flow's start node becomes a new active execution. Timers are rebuilt
//! from the database after a restart.

pub mod api;
pub mod config;
pub mod flows;
pub mod scheduler;
pub mod storage;

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::config::{AppConfig, LogFormat, LoggingConfig};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Start the clinicflow daemon: API server and scheduler engine.
pub async fn serve(config: AppConfig) -> Result<()> {
    // 1. Initialize Storage
    let db_path = &config.database.path;
    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(db_path)
        .with_context(|| format!("failed to open database {db_path}"))?;

    // 2. Initialize Scheduler
    let scheduler = scheduler::FlowScheduler::new(pool);

    // 3. Start Scheduler Engine (background task). Recovery runs once the lease is held.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let owner = config.scheduler.owner(&config.database);
    let engine = tokio::spawn(scheduler::run_scheduler_loop(
        scheduler.clone(),
        config.scheduler.clone(),
        owner,
        shutdown_rx,
    ));

    // 4. Start API Server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    let app = api::router(api::state::AppState::new(scheduler));

    tracing::info!(%addr, "clinicflow listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down scheduler engine");
    let _ = shutdown_tx.send(true);
    engine.await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
