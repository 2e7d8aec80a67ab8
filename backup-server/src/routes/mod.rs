pub mod backups;
pub mod health;
pub mod restore;
pub mod teams;

use crate::state::AppState;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .nest("/api/backups", backups::router(state.clone()))
        .nest("/api/restore", restore::router(state.clone()))
        .nest("/api/teams", teams::router(state.clone()))
        .route("/ws", get(crate::ws::events::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
