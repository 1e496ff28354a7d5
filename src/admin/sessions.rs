// Connected session admin API

use super::{AdminError, error_response, not_found, storage_error};
use crate::auth::PrincipalDirectory;
use crate::pagination::{Page, PageRequest};
use crate::session::Session;
use crate::state::GateState;
use crate::storage::StorageError;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Default, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
}

/// List connected sessions, most recently active first
/// GET /api/admin/dav/sessions
pub async fn list_sessions(
    State(state): State<GateState>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Page<Session>>, AdminError> {
    debug!("Admin API: List sessions (username: {:?})", query.username);

    let page = state
        .sessions
        .list_sessions(
            query.username.as_deref(),
            PageRequest::new(query.page, query.per_page),
        )
        .await
        .map_err(storage_error)?;

    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct DisconnectSessionRequest {
    pub id: i64,
}

/// Force-close one session; its next request is denied
/// POST /api/admin/dav/sessions/disconnect
pub async fn disconnect_session(
    State(state): State<GateState>,
    Json(request): Json<DisconnectSessionRequest>,
) -> Result<StatusCode, AdminError> {
    match state.sessions.force_close_session(request.id).await {
        Ok(()) => {
            info!("Admin API: Disconnected session {}", request.id);
            Ok(StatusCode::NO_CONTENT)
        }
        Err(StorageError::NotFound) => Err(not_found("Session", &request.id.to_string())),
        Err(e) => Err(storage_error(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct DisconnectPrincipalRequest {
    pub principal_id: i64,
}

#[derive(Debug, Serialize)]
pub struct DisconnectPrincipalResponse {
    pub closed: u64,
}

/// Force-close every session of one principal
/// POST /api/admin/dav/sessions/disconnect_all
pub async fn disconnect_principal(
    State(state): State<GateState>,
    Json(request): Json<DisconnectPrincipalRequest>,
) -> Result<Json<DisconnectPrincipalResponse>, AdminError> {
    let known = state
        .directory
        .find_by_id(request.principal_id)
        .await
        .map_err(|e| error_response(e.to_status_code(), "directory_error", &e.to_string()))?;
    if known.is_none() {
        return Err(not_found("Principal", &request.principal_id.to_string()));
    }

    let closed = state
        .sessions
        .force_close_principal_sessions(request.principal_id)
        .await
        .map_err(storage_error)?;

    info!(
        "Admin API: Disconnected {} session(s) of principal {}",
        closed, request.principal_id
    );
    Ok(Json(DisconnectPrincipalResponse { closed }))
}
