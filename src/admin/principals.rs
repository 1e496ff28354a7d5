// Principal limit and address binding admin API

use super::{AdminError, error_response, not_found, validation_error};
use crate::auth::{AuthError, PrincipalDirectory};
use crate::models::{Principal, PrincipalUpdate};
use crate::state::GateState;
use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use std::net::IpAddr;
use tracing::info;

fn directory_error(e: AuthError, principal: &str) -> AdminError {
    match e {
        AuthError::PrincipalNotFound => not_found("Principal", principal),
        e => error_response(e.to_status_code(), "directory_error", &e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetSessionLimitRequest {
    pub username: String,
    /// 0 means unlimited
    pub max_sessions: u32,
}

/// Change how many distinct addresses a principal may hold at once
/// POST /api/admin/dav/principals/session_limit
pub async fn set_session_limit(
    State(state): State<GateState>,
    Json(request): Json<SetSessionLimitRequest>,
) -> Result<Json<Principal>, AdminError> {
    let update = PrincipalUpdate {
        max_sessions: Some(request.max_sessions),
        disabled: None,
        ..Default::default()
    };

    match state.directory.update(&request.username, &update).await {
        Ok(principal) => {
            info!(
                "Admin API: Session limit of '{}' set to {}",
                principal.username, principal.max_sessions
            );
            Ok(Json(principal))
        }
        Err(e) => Err(directory_error(e, &request.username)),
    }
}

#[derive(Debug, Deserialize)]
pub struct BindAddressRequest {
    pub username: String,
    pub address: String,
}

/// Restrict a principal to signing in from one address
/// POST /api/admin/dav/principals/bind
pub async fn bind_address(
    State(state): State<GateState>,
    Json(request): Json<BindAddressRequest>,
) -> Result<Json<Principal>, AdminError> {
    let address: IpAddr = request
        .address
        .trim()
        .parse()
        .map_err(|_| validation_error("address must be an IP address"))?;

    let update = PrincipalUpdate {
        bind_address: Some(Some(address.to_string())),
        ..Default::default()
    };
    let principal = state
        .directory
        .update(&request.username, &update)
        .await
        .map_err(|e| directory_error(e, &request.username))?;

    info!("Admin API: Bound '{}' to {}", principal.username, address);
    Ok(Json(principal))
}

#[derive(Debug, Deserialize)]
pub struct ClearBindRequest {
    pub principal_id: i64,
}

/// Lift the address binding of a principal
/// POST /api/admin/dav/principals/clear_bind
pub async fn clear_bind(
    State(state): State<GateState>,
    Json(request): Json<ClearBindRequest>,
) -> Result<Json<Principal>, AdminError> {
    let id = request.principal_id.to_string();
    let principal = state
        .directory
        .find_by_id(request.principal_id)
        .await
        .map_err(|e| directory_error(e, &id))?
        .ok_or_else(|| not_found("Principal", &id))?;

    let update = PrincipalUpdate {
        bind_address: Some(None),
        ..Default::default()
    };
    let principal = state
        .directory
        .update(&principal.username, &update)
        .await
        .map_err(|e| directory_error(e, &id))?;

    info!("Admin API: Cleared address binding of '{}'", principal.username);
    Ok(Json(principal))
}
