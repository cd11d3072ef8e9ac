//! Damaged-barcode recovery endpoint

use crate::api::Organization;
use crate::services::recovery::{BarcodeFormat, DamageRecovery, RecoveryResult};
use crate::services::scans::known_cylinder_barcodes;
use crate::{ApiError, ApiResult, AppState};
use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct RecoverRequest {
    pub barcode: String,
    /// Expected symbology; detected from the value when absent
    #[serde(default)]
    pub format: Option<BarcodeFormat>,
}

/// POST /recover
///
/// Fuzzy and prefix steps run against the organization's cylinder barcodes.
pub async fn recover_barcode(
    State(state): State<AppState>,
    org: Organization,
    Json(request): Json<RecoverRequest>,
) -> ApiResult<Json<RecoveryResult>> {
    if request.barcode.trim().is_empty() {
        return Err(ApiError::BadRequest("barcode is empty".to_string()));
    }

    let mut recovery = DamageRecovery::new();
    recovery.add_known_barcodes(known_cylinder_barcodes(&state.db, org.as_str()).await?);

    let result = recovery.attempt(&request.barcode, request.format);
    info!(
        organization_id = %org.as_str(),
        original = %result.original,
        reconstructed = %result.reconstructed,
        method = ?result.method,
        confidence = result.confidence,
        "Barcode recovery attempted"
    );

    Ok(Json(result))
}

pub fn recovery_routes() -> Router<AppState> {
    Router::new().route("/recover", post(recover_barcode))
}
