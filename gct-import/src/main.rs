//! gct-import - Import Review Service
//!
//! **Module Identity:**
//! - Name: gct-import
//! - Port: 5811
//!
//! Stages exported invoices and sales receipts, reconciles them against
//! recorded scans and materializes approved documents.

use anyhow::{Context, Result};
use clap::Parser;
use gct_common::config::{load_module_config, RootFolderInitializer, RootFolderResolver};
use gct_common::events::EventBus;
use gct_import::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};

const MODULE_NAME: &str = "gct-import";

/// Command-line arguments for gct-import
#[derive(Parser, Debug)]
#[command(name = "gct-import")]
#[command(about = "Import review service for gas cylinder tracking")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5811", env = "GCT_IMPORT_PORT")]
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

    info!("Starting gct-import (Import Review Service)");
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

    // Step 3: Open or create database (shared with gct-scan)
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = gct_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let state = AppState::new(db_pool, EventBus::new(100))
        .with_default_organization(config.organization_id.clone());
    let app = gct_import::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down");
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}
