//! HTTP route handlers for Muster.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use muster_common::constants::routes;

use crate::state::AppState;

mod bootstrap;
mod health;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route(routes::HEALTH, get(health::health_check))
        .route(routes::READY, get(health::ready_check))

        // Bootstrap (probed by peers)
        .route(routes::SEED_NODES, get(bootstrap::seed_nodes))
        .route(routes::STATUS, get(bootstrap::status))
        .route(routes::SESSION, post(bootstrap::new_session))

        .layer(TraceLayer::new_for_http())

        // Add shared state
        .with_state(state)
}
