//! Offline queue endpoints

use crate::api::Organization;
use crate::services::offline::{SyncResult, SyncStatus};
use crate::services::scans::NewScan;
use crate::services::validation::validate_scan_frame;
use crate::{ApiResult, AppState};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use gct_common::events::GctEvent;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where the scanned code came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanSource {
    /// Typed or read by a handheld scanner
    #[default]
    Manual,
    /// Read from a camera frame; format-checked and debounced
    Camera,
}

/// POST /offline/scans request
#[derive(Debug, Deserialize)]
pub struct QueueScanRequest {
    #[serde(flatten)]
    pub scan: NewScan,
    #[serde(default)]
    pub source: ScanSource,
}

#[derive(Debug, Serialize)]
pub struct QueueScanResponse {
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Same camera code seen again within the debounce window
    pub debounced: bool,
    pub queue_length: usize,
}

/// POST /offline/scans
pub async fn queue_scan(
    State(state): State<AppState>,
    org: Organization,
    Json(request): Json<QueueScanRequest>,
) -> ApiResult<Json<QueueScanResponse>> {
    let mut scan = request.scan;

    if request.source == ScanSource::Camera {
        let code = validate_scan_frame(&scan.bottle_barcode, &state.packing_slip)?.to_string();
        if !state.debouncer.lock().await.accept(&code) {
            debug!(barcode = %code, "Camera read debounced");
            return Ok(Json(QueueScanResponse {
                queued: false,
                id: None,
                debounced: true,
                queue_length: state.sync.queue().count().await?,
            }));
        }
        scan.bottle_barcode = code;
    }

    let queued = state.sync.queue().enqueue(org.as_str(), scan).await?;
    let queue_length = state.sync.queue().count().await?;

    state.event_bus.emit_lossy(GctEvent::OfflineScanQueued {
        queued: queue_length,
        timestamp: Utc::now(),
    });

    Ok(Json(QueueScanResponse {
        queued: true,
        id: Some(queued.id),
        debounced: false,
        queue_length,
    }))
}

/// POST /offline/sync
///
/// Always 200; the result's `success` flag carries the outcome.
pub async fn sync_now(State(state): State<AppState>) -> ApiResult<Json<SyncResult>> {
    let result = state.sync.sync().await?;
    if !result.success && result.failed_items > 0 {
        state.record_error(result.message.clone()).await;
    }
    Ok(Json(result))
}

/// GET /offline/status
pub async fn sync_status(State(state): State<AppState>) -> ApiResult<Json<SyncStatus>> {
    Ok(Json(state.sync.status().await?))
}

pub fn offline_routes() -> Router<AppState> {
    Router::new()
        .route("/offline/scans", post(queue_scan))
        .route("/offline/sync", post(sync_now))
        .route("/offline/status", get(sync_status))
}
