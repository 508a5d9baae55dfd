/**
 * Routes Module
 * API route handlers plus the helpers they all share: caller resolution,
 * identifier validation and pagination arithmetic.
 */
use axum::http::HeaderMap;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;

pub mod auth;
pub mod blogs;
pub mod health;
pub mod projects;
pub mod skills;
pub mod upload;

/// Validate a path parameter as a native entity id. A string that is not
/// id-shaped is indistinguishable from a missing entity, so the failure is
/// NotFound rather than a validation error.
pub fn parse_entity_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound)
}

/// Resolve the caller identity from the Authorization header. Handlers take
/// the returned claims as an explicit value; there is no ambient
/// request-scoped user.
pub fn require_auth(headers: &HeaderMap) -> Result<auth::Claims, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::MissingToken)?;

    auth::verify_access_token(token).map_err(|_| ApiError::InvalidToken)
}

pub(crate) fn default_page() -> i64 {
    1
}

pub(crate) fn default_page_size() -> i64 {
    10
}

/// Clamp raw query values into the supported range (page >= 1, 1..=100 items).
pub fn clamp_paging(page: i64, page_size: i64) -> (i64, i64) {
    (page.max(1), page_size.clamp(1, 100))
}

/// `ceil(total_items / page_size)` without going through floats.
pub fn total_pages(total_items: i64, page_size: i64) -> i64 {
    if total_items <= 0 {
        0
    } else {
        (total_items + page_size - 1) / page_size
    }
}

/// One page of a newest-first listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, page: i64, page_size: i64, total_items: i64) -> Self {
        Self {
            items,
            page,
            page_size,
            total_items,
            total_pages: total_pages(total_items, page_size),
        }
    }
}
