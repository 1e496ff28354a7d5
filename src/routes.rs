use crate::admin;
use crate::handlers;
use crate::middleware::{dav_gate, require_admin_token};
use crate::state::GateState;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the full HTTP surface over `state`
pub fn router(state: GateState) -> Router {
    let dav = Router::new()
        .route("/api/dav/me", get(handlers::dav::me))
        .route_layer(middleware::from_fn_with_state(state.clone(), dav_gate));

    let admin = Router::new()
        .route("/api/admin/dav/sessions", get(admin::list_sessions))
        .route(
            "/api/admin/dav/sessions/disconnect",
            post(admin::disconnect_session),
        )
        .route(
            "/api/admin/dav/sessions/disconnect_all",
            post(admin::disconnect_principal),
        )
        .route("/api/admin/dav/blocks", get(admin::list_blocks))
        .route("/api/admin/dav/blocks/add", post(admin::add_block))
        .route("/api/admin/dav/blocks/update", post(admin::update_block))
        .route("/api/admin/dav/blocks/delete", post(admin::delete_block))
        .route(
            "/api/admin/dav/principals/session_limit",
            post(admin::set_session_limit),
        )
        .route("/api/admin/dav/principals/bind", post(admin::bind_address))
        .route(
            "/api/admin/dav/principals/clear_bind",
            post(admin::clear_bind),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .merge(dav)
        .merge(admin)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
