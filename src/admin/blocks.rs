// Address block admin API

use super::{AdminError, not_found, storage_error, validation_error};
use crate::block::BlockEntry;
use crate::pagination::{Page, PageRequest};
use crate::state::GateState;
use crate::storage::StorageError;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info};

/// Turn a duration and unit into an absolute expiry; `permanent` yields none
pub fn parse_expiry(
    duration: i64,
    unit: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, String> {
    let span = match unit {
        "permanent" => return Ok(None),
        "minutes" => Duration::try_minutes(duration),
        "hours" => Duration::try_hours(duration),
        other => return Err(format!("Unknown duration unit '{}'", other)),
    };
    if duration <= 0 {
        return Err("duration must be positive".to_string());
    }
    let span = span.ok_or_else(|| "duration is too large".to_string())?;
    now.checked_add_signed(span)
        .map(Some)
        .ok_or_else(|| "duration is too large".to_string())
}

/// List blocks, newest first
/// GET /api/admin/dav/blocks
pub async fn list_blocks(
    State(state): State<GateState>,
    Query(page): Query<PageRequest>,
) -> Result<Json<Page<BlockEntry>>, AdminError> {
    debug!("Admin API: List blocks");
    let page = state.blocks.list_blocks(page).await.map_err(storage_error)?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct AddBlockRequest {
    pub ip: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub duration: i64,
    pub unit: String,
}

/// Block an address; re-adding an address refreshes its block
/// POST /api/admin/dav/blocks/add
pub async fn add_block(
    State(state): State<GateState>,
    Json(request): Json<AddBlockRequest>,
) -> Result<Json<BlockEntry>, AdminError> {
    let ip = request.ip.trim();
    if ip.is_empty() {
        return Err(validation_error("ip is required"));
    }
    let expires_at = parse_expiry(request.duration, &request.unit, state.clock.now())
        .map_err(|e| validation_error(&e))?;

    let block = state
        .blocks
        .add_block(ip, &request.remark, expires_at)
        .await
        .map_err(storage_error)?;

    info!("Admin API: Added block {} for {}", block.id, block.address);
    Ok(Json(block))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBlockRequest {
    pub id: i64,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub duration: i64,
    pub unit: String,
}

/// Replace remark and expiry of a block; the address is immutable
/// POST /api/admin/dav/blocks/update
pub async fn update_block(
    State(state): State<GateState>,
    Json(request): Json<UpdateBlockRequest>,
) -> Result<Json<BlockEntry>, AdminError> {
    let expires_at = parse_expiry(request.duration, &request.unit, state.clock.now())
        .map_err(|e| validation_error(&e))?;

    match state
        .blocks
        .update_block(request.id, &request.remark, expires_at)
        .await
    {
        Ok(block) => Ok(Json(block)),
        Err(StorageError::NotFound) => Err(not_found("Block", &request.id.to_string())),
        Err(e) => Err(storage_error(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteBlockRequest {
    pub id: i64,
}

/// POST /api/admin/dav/blocks/delete
pub async fn delete_block(
    State(state): State<GateState>,
    Json(request): Json<DeleteBlockRequest>,
) -> Result<StatusCode, AdminError> {
    let deleted = state
        .blocks
        .delete_block(request.id)
        .await
        .map_err(storage_error)?;

    if !deleted {
        return Err(not_found("Block", &request.id.to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}
