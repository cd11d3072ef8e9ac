//! Scan recording endpoints

use crate::api::Organization;
use crate::services::offline::ScanBatchRequest;
use crate::services::scans::{
    list_scans_for_order, mark_scan_read, record_scan, record_scan_session, record_scans_batch,
    BatchOutcome, NewScan, RecordedScan,
};
use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use gct_common::events::GctEvent;
use gct_common::models::{CylinderScanSession, ScanRecord};
use serde_json::{json, Value};

/// POST /scans
///
/// 201 for a new row, 200 when the same event was already stored.
pub async fn create_scan(
    State(state): State<AppState>,
    org: Organization,
    Json(scan): Json<NewScan>,
) -> ApiResult<(StatusCode, Json<RecordedScan>)> {
    let recorded = record_scan(&state.db, org.as_str(), &scan).await?;

    if recorded.duplicate {
        return Ok((StatusCode::OK, Json(recorded)));
    }

    state.event_bus.emit_lossy(GctEvent::ScanRecorded {
        organization_id: recorded.scan.organization_id.clone(),
        bottle_barcode: recorded.scan.bottle_barcode.clone(),
        order_number: recorded.scan.order_number.clone(),
        mode: recorded.scan.mode,
        timestamp: recorded.scan.timestamp,
    });

    Ok((StatusCode::CREATED, Json(recorded)))
}

/// POST /scans/batch
pub async fn create_scan_batch(
    State(state): State<AppState>,
    org: Organization,
    Json(request): Json<ScanBatchRequest>,
) -> ApiResult<Json<BatchOutcome>> {
    let outcome = record_scans_batch(&state.db, org.as_str(), &request.scans).await?;
    Ok(Json(outcome))
}

/// POST /scans/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    org: Organization,
    Path(scan_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    mark_scan_read(&state.db, org.as_str(), scan_id).await?;
    Ok(Json(json!({ "id": scan_id, "read": true })))
}

/// POST /scans/sessions
pub async fn create_scan_session(
    State(state): State<AppState>,
    org: Organization,
    Json(session): Json<CylinderScanSession>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = record_scan_session(&state.db, org.as_str(), &session).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// GET /scans/order/:order_number
pub async fn scans_for_order(
    State(state): State<AppState>,
    org: Organization,
    Path(order_number): Path<String>,
) -> ApiResult<Json<Vec<ScanRecord>>> {
    let scans = list_scans_for_order(&state.db, org.as_str(), &order_number).await?;
    Ok(Json(scans))
}

pub fn scan_routes() -> Router<AppState> {
    Router::new()
        .route("/scans", post(create_scan))
        .route("/scans/batch", post(create_scan_batch))
        .route("/scans/sessions", post(create_scan_session))
        .route("/scans/:id/read", post(mark_read))
        .route("/scans/order/:order_number", get(scans_for_order))
}
