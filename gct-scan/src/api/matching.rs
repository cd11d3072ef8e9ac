//! Customer matching endpoints

use crate::api::Organization;
use crate::services::matching::{extract_possible_names, extract_receipt_barcode, MatchOutcome};
use crate::{ApiResult, AppState};
use axum::{extract::State, routing::post, Json, Router};
use gct_common::db::customers::list_customers;
use gct_common::models::Customer;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// POST /match/customer request
#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    /// Raw scanned value
    pub scanned: String,
    /// Candidates to match against; the organization's customers when absent
    #[serde(default)]
    pub customers: Option<Vec<Customer>>,
}

/// POST /match/ocr request
#[derive(Debug, Deserialize)]
pub struct OcrMatchRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct OcrMatchResponse {
    pub receipt_barcode: Option<String>,
    pub possible_names: Vec<String>,
    /// Present when a receipt code was found in the text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MatchOutcome>,
}

async fn candidates(state: &AppState, org: &Organization, given: Option<Vec<Customer>>) -> ApiResult<Vec<Customer>> {
    match given {
        Some(customers) => Ok(customers),
        None => Ok(list_customers(&state.db, org.as_str()).await?),
    }
}

/// POST /match/customer
pub async fn match_customer(
    State(state): State<AppState>,
    org: Organization,
    Json(request): Json<MatchRequest>,
) -> ApiResult<Json<MatchOutcome>> {
    let customers = candidates(&state, &org, request.customers).await?;
    let outcome = state.matcher.find(&request.scanned, &customers)?;

    debug!(
        organization_id = %org.as_str(),
        scanned = %request.scanned,
        candidates = customers.len(),
        matched = matches!(outcome, MatchOutcome::Matched(_)),
        "Customer match"
    );

    Ok(Json(outcome))
}

/// POST /match/ocr
///
/// Extracts a receipt code and candidate names from camera OCR text and, when
/// a code is present, matches it against the organization's customers.
pub async fn match_ocr(
    State(state): State<AppState>,
    org: Organization,
    Json(request): Json<OcrMatchRequest>,
) -> ApiResult<Json<OcrMatchResponse>> {
    let receipt_barcode = extract_receipt_barcode(&request.text);
    let possible_names = extract_possible_names(&request.text);

    let outcome = match &receipt_barcode {
        Some(code) => {
            let customers = candidates(&state, &org, None).await?;
            Some(state.matcher.find(code, &customers)?)
        }
        None => None,
    };

    Ok(Json(OcrMatchResponse {
        receipt_barcode,
        possible_names,
        outcome,
    }))
}

pub fn matching_routes() -> Router<AppState> {
    Router::new()
        .route("/match/customer", post(match_customer))
        .route("/match/ocr", post(match_ocr))
}
