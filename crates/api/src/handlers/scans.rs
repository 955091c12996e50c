//! Handlers for the `/v1/scans` resource.
//!
//! All endpoints require authentication via [`AuthUser`]. Scans are scoped
//! to the authenticated user; another user's scan is indistinguishable
//! from an absent one.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use lookout_core::{Error, Kind, Scan, ScanId, ScanStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// Page size applied when the `limit` query parameter is unset.
pub const DEFAULT_LIMIT: u32 = 20;

/// Maximum page size.
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct CreateScanRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ListScansQuery {
    /// Maximum number of results. Defaults to 20, capped at 100. Zero is
    /// rejected.
    pub limit: Option<u32>,
    /// RFC 3339 exclusive upper bound on creation time.
    pub cursor: Option<String>,
    /// Filter by scan status.
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanListResponse {
    pub items: Vec<Scan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// POST /v1/scans
///
/// Schedule a scan for the submitted URL. Returns 201 with the stored
/// scan, which may already be `COMPLETED` when a recent cached result
/// exists for the same canonical URL.
pub async fn create_scan(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateScanRequest>,
) -> ApiResult<impl IntoResponse> {
    let scan = state.scanner.enqueue(auth.user_id, &req.url).await?;

    tracing::info!(
        scan_id = %scan.id,
        user_id = %auth.user_id,
        status = %scan.status,
        "scan enqueued",
    );

    Ok((StatusCode::CREATED, Json(scan)))
}

/// GET /v1/scans
///
/// Page through the caller's scans, newest first. `nextCursor` is present
/// iff more rows exist.
pub async fn list_scans(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListScansQuery>,
) -> ApiResult<Json<ScanListResponse>> {
    let limit = match query.limit {
        None => DEFAULT_LIMIT,
        Some(0) => {
            return Err(Error::new(Kind::BadRequest, "limit must be positive").into());
        }
        Some(n) => n.min(MAX_LIMIT),
    };

    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            ScanStatus::parse(raw)
                .ok_or_else(|| Error::new(Kind::BadRequest, "invalid status"))?,
        ),
        None => None,
    };

    let (items, next_cursor) = state
        .scanner
        .user_scans(auth.user_id, status, query.cursor.as_deref(), limit)
        .await?;

    Ok(Json(ScanListResponse { items, next_cursor }))
}

/// GET /v1/scans/{id}
pub async fn get_scan(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Scan>> {
    let scan = state.scanner.result(auth.user_id, parse_scan_id(&id)?).await?;
    Ok(Json(scan))
}

/// DELETE /v1/scans/{id}
///
/// Soft-deletes the scan; 204 on success. The underlying queue job is left
/// alone because sibling scans may still depend on it.
pub async fn delete_scan(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.scanner.delete(auth.user_id, parse_scan_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_scan_id(raw: &str) -> Result<ScanId, Error> {
    Uuid::parse_str(raw).map_err(|_| Error::new(Kind::BadRequest, "invalid scan id"))
}
