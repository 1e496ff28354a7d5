// Admin API for connected sessions, address blocks and principal settings

pub mod blocks;
pub mod principals;
pub mod sessions;

pub use blocks::{add_block, delete_block, list_blocks, update_block};
pub use principals::{bind_address, clear_bind, set_session_limit};
pub use sessions::{disconnect_principal, disconnect_session, list_sessions};

use crate::storage::StorageError;
use axum::Json;
use axum::http::StatusCode;
use serde_json::Value;
use tracing::error;

/// Standard error response for admin API
pub type AdminError = (StatusCode, Json<Value>);

/// Create a standard error response
pub fn error_response(status: StatusCode, error: &str, description: &str) -> AdminError {
    (
        status,
        Json(serde_json::json!({
            "error": error,
            "error_description": description
        })),
    )
}

/// Create a not found error response
pub fn not_found(resource: &str, id: &str) -> AdminError {
    error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        &format!("{} '{}' not found", resource, id),
    )
}

/// Create a validation error response
pub fn validation_error(message: &str) -> AdminError {
    error_response(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// Map a store failure that is not a plain miss
pub fn storage_error(e: StorageError) -> AdminError {
    match e {
        StorageError::NotFound => error_response(StatusCode::NOT_FOUND, "not_found", "Entry not found"),
        StorageError::InvalidData(msg) => validation_error(&msg),
        StorageError::AlreadyExists => {
            error_response(StatusCode::CONFLICT, "conflict", "Entry already exists")
        }
        other => {
            error!("Admin API storage failure: {}", other);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                &other.to_string(),
            )
        }
    }
}
