//! Tenant extraction for import requests

use crate::{ApiError, AppState};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Organization from `X-Organization-Id`, else the configured default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization(pub String);

#[async_trait]
impl FromRequestParts<AppState> for Organization {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-organization-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or(state.default_organization.as_deref())
            .map(|org| Organization(org.to_string()))
            .ok_or_else(|| ApiError::BadRequest("Missing X-Organization-Id header".to_string()))
    }
}
