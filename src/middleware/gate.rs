// Admission gate in front of the file endpoint

use crate::auth::AuthError;
use crate::models::Principal;
use crate::session::{Admission, Session};
use crate::state::GateState;
use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::json;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

const AUTH_REALM: &str = "Basic realm=\"dav\"";

/// Principal and session admitted for the current request
#[derive(Debug, Clone)]
pub struct AdmittedSession {
    pub principal: Principal,
    pub session: Session,
}

/// Decode `Authorization: Basic` credentials
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, secret) = decoded.split_once(':')?;
    Some((username.to_string(), secret.to_string()))
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn gate_error(status: StatusCode, error: &str, description: &str) -> Response {
    let body = Json(json!({
        "error": error,
        "error_description": description
    }));
    (status, body).into_response()
}

fn challenge(description: &str) -> Response {
    let mut response = gate_error(StatusCode::UNAUTHORIZED, "unauthorized", description);
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(AUTH_REALM));
    response
}

/// Block check, sign-in and session admission for every gated request
pub async fn dav_gate(State(state): State<GateState>, mut request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let address = state.proxies.client_address(request.headers(), peer);

    if state.blocks.check(&address).await {
        info!("Rejected blocked address {}", address);
        return gate_error(StatusCode::FORBIDDEN, "blocked", "Address is blocked");
    }

    if state.login_guard.is_locked(&address).await {
        warn!("Rejected locked-out address {}", address);
        return gate_error(
            StatusCode::TOO_MANY_REQUESTS,
            "too_many_attempts",
            "Too many failed sign-ins. Please try again later.",
        );
    }

    let Some((username, secret)) = basic_credentials(request.headers()) else {
        return challenge("Credentials required");
    };

    let principal = match state.authenticator.authenticate(&username, &secret).await {
        Ok(principal) => principal,
        Err(AuthError::InvalidCredentials) => {
            state.login_guard.record_failure(&address).await;
            debug!("Failed sign-in for '{}' from {}", username, address);
            return challenge("Invalid credentials");
        }
        Err(e) => {
            warn!("Sign-in for '{}' from {} refused: {}", username, address, e);
            return gate_error(e.to_status_code(), "access_denied", &e.to_string());
        }
    };
    state.login_guard.clear(&address).await;

    if !principal.accepts_address(&address) {
        info!(
            "Rejected '{}' from {}: account is bound to another address",
            principal.username, address
        );
        return gate_error(
            StatusCode::FORBIDDEN,
            "address_not_bound",
            "Account may not sign in from this address",
        );
    }

    let agent = user_agent(request.headers());
    let session = match state.sessions.ensure_session(&principal, &address, &agent).await {
        Ok(Admission::Admitted(session)) => session,
        Ok(Admission::Denied(reason)) => {
            info!(
                "Session denied for '{}' from {}: {}",
                principal.username, address, reason
            );
            let body = Json(json!({
                "error": "session_denied",
                "error_description": reason.to_string(),
                "denial": reason
            }));
            return (StatusCode::FORBIDDEN, body).into_response();
        }
        Err(e) => {
            error!("Session admission failed for '{}': {}", principal.username, e);
            return gate_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "Session store unavailable",
            );
        }
    };

    request
        .extensions_mut()
        .insert(AdmittedSession { principal, session });

    next.run(request).await
}
