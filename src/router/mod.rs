//! HTTP router: session lifecycle endpoints plus health/environment
//! listing.

mod handlers;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::batch::BatchCoordinator;
use crate::config::ServerConfig;
use crate::hooks::Hooks;
use crate::session::SessionManager;

/// Shared application state, cloned cheaply into every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub batch: Arc<BatchCoordinator>,
    pub hooks: Hooks,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::banner))
        .route("/health", get(handlers::health))
        .route("/environments", get(handlers::list_environments))
        .route("/sessions", post(handlers::create_session))
        .route("/sessions", delete(handlers::delete_all_sessions))
        .route("/sessions/:id", get(handlers::get_session))
        .route("/sessions/:id", delete(handlers::delete_session))
        .route("/sessions/:id/step", post(handlers::step_session))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
