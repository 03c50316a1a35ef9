//! HTTP handlers for the discovery catalog and its review workflow.
//! Input validation happens here; persistence and transition rules live in
//! the services.

use crate::{
    errors::AppError,
    models::discovery::{DiscoveryRecord, DiscoveryStats, ListFilter},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 100;

/// Query params for `GET /api/discovery`. Numbers arrive as strings so that
/// malformed values produce our own validation error.
#[derive(Debug, Default, Deserialize)]
pub struct ListDiscoveryQuery {
    pub page: Option<String>,
    pub size: Option<String>,
    pub status: Option<String>,
    pub environment: Option<String>,
    pub data_source_type: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub size: u32,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryPage {
    pub discoveries: Vec<DiscoveryRecord>,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub rejected_by: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
}

/// GET `/api/discovery`: filtered, paginated listing, newest first.
pub async fn list_discoveries(
    State(state): State<AppState>,
    Query(q): Query<ListDiscoveryQuery>,
) -> Result<Json<DiscoveryPage>, AppError> {
    let page = parse_page(q.page.as_deref())?;
    let size = parse_size(q.size.as_deref())?;
    let filter = ListFilter {
        status: q.status,
        environment: q.environment,
        data_source_type: q.data_source_type,
        search: q.search,
    };

    let (discoveries, total) = state.store.list(&filter, page, size).await?;
    let size_i64 = i64::from(size);
    Ok(Json(DiscoveryPage {
        discoveries,
        pagination: Pagination {
            page,
            size,
            total,
            total_pages: (total + size_i64 - 1) / size_i64,
        },
    }))
}

/// GET `/api/discovery/{id}`
pub async fn get_discovery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DiscoveryRecord>, AppError> {
    let id = parse_id(&id)?;
    match state.store.get(id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(AppError::not_found(format!("discovery `{id}` not found"))),
    }
}

/// PUT `/api/discovery/{id}/approve`
pub async fn approve_discovery(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ApproveRequest>, JsonRejection>,
) -> Result<Json<DiscoveryRecord>, AppError> {
    let id = parse_id(&id)?;
    let Json(req) = payload.map_err(|rej| AppError::validation(rej.body_text()))?;
    let record = state
        .approvals
        .approve(
            id,
            req.approved_by.as_deref().unwrap_or_default(),
            req.role,
            req.comments,
        )
        .await?;
    Ok(Json(record))
}

/// PUT `/api/discovery/{id}/reject`
pub async fn reject_discovery(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RejectRequest>, JsonRejection>,
) -> Result<Json<DiscoveryRecord>, AppError> {
    let id = parse_id(&id)?;
    let Json(req) = payload.map_err(|rej| AppError::validation(rej.body_text()))?;
    let record = state
        .approvals
        .reject(
            id,
            req.rejected_by.as_deref().unwrap_or_default(),
            req.rejection_reason,
            req.role,
            req.comments,
        )
        .await?;
    Ok(Json(record))
}

/// GET `/api/discovery/stats`
pub async fn discovery_stats(
    State(state): State<AppState>,
) -> Result<Json<DiscoveryStats>, AppError> {
    Ok(Json(state.store.summary_stats().await?))
}

/// POST `/api/discovery/trigger`: starts a scan in the background.
pub async fn trigger_discovery(State(state): State<AppState>) -> impl IntoResponse {
    let run_id = state.scheduler.trigger();
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Discovery scan started",
            "status": "running",
            "run_id": run_id,
        })),
    )
}

fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AppError::validation(format!("invalid discovery id `{raw}`")))
}

fn parse_page(raw: Option<&str>) -> Result<u32, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(0);
    };
    raw.parse::<u32>()
        .map_err(|_| AppError::validation("page must be a non-negative integer"))
}

/// Oversized pages are clamped, non-positive sizes fall back to the default.
fn parse_size(raw: Option<&str>) -> Result<u32, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(DEFAULT_PAGE_SIZE);
    };
    let size = raw
        .parse::<i64>()
        .map_err(|_| AppError::validation("size must be an integer"))?;
    Ok(match size {
        s if s < 1 => DEFAULT_PAGE_SIZE,
        s if s > i64::from(MAX_PAGE_SIZE) => MAX_PAGE_SIZE,
        s => s as u32,
    })
}
