//! gct-scan library interface
//!
//! Barcode normalization and customer matching, scan recording, damaged-barcode
//! recovery and the offline scan queue, plus the HTTP surface served by the
//! `gct-scan` binary.

pub mod api;
pub mod error;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use gct_common::config::MatchingConfig;
use gct_common::events::EventBus;
use regex::Regex;
use services::matching::CustomerMatcher;
use services::offline::{AlwaysOnline, SqliteScanSink, SyncService};
use services::validation::{ScanDebouncer, PACKING_SLIP_RE};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub matcher: Arc<CustomerMatcher>,
    /// Replays the offline queue; local sink unless a backend is configured
    pub sync: Arc<SyncService>,
    /// Camera reads of the same code within the window are dropped
    pub debouncer: Arc<Mutex<ScanDebouncer>>,
    /// Accepted non-receipt camera codes
    pub packing_slip: Regex,
    /// Used when a request carries no `X-Organization-Id`
    pub default_organization: Option<String>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, matching: MatchingConfig) -> Self {
        let sync = SyncService::new(
            db.clone(),
            Arc::new(SqliteScanSink::new(db.clone())),
            Arc::new(AlwaysOnline),
        )
        .with_event_bus(event_bus.clone());

        Self {
            db,
            event_bus,
            matcher: Arc::new(CustomerMatcher::new(matching)),
            sync: Arc::new(sync),
            debouncer: Arc::new(Mutex::new(ScanDebouncer::default())),
            packing_slip: PACKING_SLIP_RE.clone(),
            default_organization: None,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Replace the local replay target (e.g. with an HTTP sink)
    pub fn with_sync_service(mut self, sync: Arc<SyncService>) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_default_organization(mut self, organization_id: Option<String>) -> Self {
        self.default_organization = organization_id.filter(|o| !o.trim().is_empty());
        self
    }

    /// Remember a failure for `/health`
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::event_routes())
        .merge(api::matching_routes())
        .merge(api::scan_routes())
        .merge(api::offline_routes())
        .merge(api::recovery_routes())
        .with_state(state)
        // Operator consoles are served from other origins
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
