// Endpoints served behind the admission gate

use crate::middleware::AdmittedSession;
use axum::{Extension, Json};
use serde_json::{Value, json};

/// Who the gate admitted for this request
/// GET /api/dav/me
pub async fn me(Extension(admitted): Extension<AdmittedSession>) -> Json<Value> {
    Json(json!({
        "principal": admitted.principal,
        "session": {
            "id": admitted.session.id,
            "address": admitted.session.address,
            "user_agent": admitted.session.user_agent,
            "last_seen": admitted.session.last_seen,
            "created_at": admitted.session.created_at
        }
    }))
}
