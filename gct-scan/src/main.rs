//! gct-scan - Scan Service
//!
//! **Module Identity:**
//! - Name: gct-scan
//! - Port: 5810
//!
//! Matches scanned receipt codes to customers, records SHIP/RETURN scans,
//! recovers damaged barcodes and replays scans captured offline.

use anyhow::{Context, Result};
use clap::Parser;
use gct_common::config::{load_module_config, RootFolderInitializer, RootFolderResolver};
use gct_common::events::EventBus;
use gct_scan::services::offline::{HttpProbe, HttpScanSink, SyncService, SyncWorker};
use gct_scan::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MODULE_NAME: &str = "gct-scan";

/// Command-line arguments for gct-scan
#[derive(Parser, Debug)]
#[command(name = "gct-scan")]
#[command(about = "Scan service for gas cylinder tracking")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5810", env = "GCT_SCAN_PORT")]
    port: u16,

    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Config file (defaults to the standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_module_config(MODULE_NAME, args.config.as_deref());
    gct_common::logging::init_tracing(&config.logging)?;

    info!("Starting gct-scan (Scan Service)");
    info!("Port: {}", args.port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder)
        .with_toml(&config)
        .resolve();

    // Step 2: Create root folder directory if missing
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    // Step 3: Open or create database
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = gct_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let event_bus = EventBus::new(100);

    let mut state = AppState::new(db_pool.clone(), event_bus.clone(), config.matching.clone())
        .with_default_organization(config.organization_id.clone());

    // Without a backend the queue replays into the local database
    if let Some(backend_url) = &config.backend_url {
        let timeout = Duration::from_secs(config.offline.probe_timeout_secs);
        let sync = SyncService::new(
            db_pool.clone(),
            Arc::new(HttpScanSink::new(backend_url.clone(), timeout)?),
            Arc::new(HttpProbe::new(backend_url, timeout)?),
        )
        .with_event_bus(event_bus.clone());
        state = state.with_sync_service(Arc::new(sync));
        info!("Offline replay target: {}", backend_url);
    } else {
        warn!("No backend_url configured; offline scans replay into the local database");
    }

    let cancel = CancellationToken::new();
    let worker = SyncWorker::new(
        state.sync.clone(),
        Duration::from_secs(config.offline.probe_interval_secs.max(1)),
        cancel.clone(),
    )
    .spawn();

    let app = gct_scan::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Err(e) = worker.await {
        warn!("Offline sync worker ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
