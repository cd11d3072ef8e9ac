//! Tenant extraction
//!
//! Every query is scoped to one organization taken from the
//! `X-Organization-Id` header. Device installs may configure a default.

use crate::{ApiError, AppState};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Organization the request acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization(pub String);

impl Organization {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Organization {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(ORGANIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match header.or(state.default_organization.as_deref()) {
            Some(org) => Ok(Organization(org.to_string())),
            None => Err(ApiError::BadRequest(
                "Missing X-Organization-Id header".to_string(),
            )),
        }
    }
}
