//! Import review endpoints
//!
//! `:kind` is `invoice` or `receipt` (plural spellings accepted).

use crate::api::Organization;
use crate::services::{approval, reconcile, ApprovalOutcome, ReconcileReport};
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use gct_common::events::GctEvent;
use gct_common::models::{ImportKind, ImportedDocument};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

fn parse_kind(raw: &str) -> ApiResult<ImportKind> {
    ImportKind::parse(raw)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown import kind: {}", raw)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub search: Option<String>,
}

/// GET /imports/report?search=
pub async fn get_report(
    State(state): State<AppState>,
    org: Organization,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<ReconcileReport>> {
    let report = reconcile::load_report(&state.db, &org.0, query.search.as_deref()).await?;
    Ok(Json(report))
}

/// GET /imports/:kind
pub async fn list_pending(
    State(state): State<AppState>,
    org: Organization,
    Path(kind): Path<String>,
) -> ApiResult<Json<Vec<ImportedDocument>>> {
    let kind = parse_kind(&kind)?;
    Ok(Json(approval::list_pending(&state.db, &org.0, kind).await?))
}

#[derive(Debug, Serialize)]
pub struct StagedResponse {
    pub id: i64,
    pub kind: ImportKind,
}

/// POST /imports/:kind
///
/// Body is the raw document as exported (invoice_number, customer_name, line_items, ...).
pub async fn stage(
    State(state): State<AppState>,
    org: Organization,
    Path(kind): Path<String>,
    Json(data): Json<Value>,
) -> ApiResult<(StatusCode, Json<StagedResponse>)> {
    let kind = parse_kind(&kind)?;
    let id = approval::stage_import(&state.db, &org.0, kind, &data).await?;
    Ok((StatusCode::CREATED, Json(StagedResponse { id, kind })))
}

/// POST /imports/:kind/:id/approve
pub async fn approve(
    State(state): State<AppState>,
    org: Organization,
    Path((kind, id)): Path<(String, i64)>,
) -> ApiResult<Json<ApprovalOutcome>> {
    let kind = parse_kind(&kind)?;

    let outcome = match approval::approve(&state.db, &org.0, kind, id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if !matches!(
                e,
                gct_common::Error::NotFound(_) | gct_common::Error::Conflict(_) | gct_common::Error::InvalidInput(_)
            ) {
                warn!(import_id = id, kind = %kind, error = %e, "Approval failed");
                state.record_error(format!("Approval of {} {} failed: {}", kind, id, e)).await;
            }
            return Err(e.into());
        }
    };

    state.event_bus.emit_lossy(GctEvent::ImportApproved {
        kind,
        import_id: id,
        customer_id: outcome.customer_id.clone(),
        timestamp: Utc::now(),
    });

    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
pub struct RejectedResponse {
    pub id: i64,
    pub kind: ImportKind,
    pub status: &'static str,
}

/// POST /imports/:kind/:id/reject
pub async fn reject(
    State(state): State<AppState>,
    org: Organization,
    Path((kind, id)): Path<(String, i64)>,
) -> ApiResult<Json<RejectedResponse>> {
    let kind = parse_kind(&kind)?;
    approval::reject(&state.db, &org.0, kind, id).await?;

    state.event_bus.emit_lossy(GctEvent::ImportRejected {
        kind,
        import_id: id,
        timestamp: Utc::now(),
    });

    Ok(Json(RejectedResponse {
        id,
        kind,
        status: "rejected",
    }))
}

pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/imports/report", get(get_report))
        .route("/imports/:kind", get(list_pending).post(stage))
        .route("/imports/:kind/:id/approve", post(approve))
        .route("/imports/:kind/:id/reject", post(reject))
}
