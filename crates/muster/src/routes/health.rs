//! Health check endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Serialize;

use muster_common::BootstrapPhase;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

/// Basic health check (is the server running?)
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    self_address: String,
    session: u64,
    phase: BootstrapPhase,
}

/// Readiness check (has this node decided how to join?)
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    let status = state.status();

    if status.phase.is_terminal() {
        Ok(Json(ReadyResponse {
            status: "ready",
            self_address: state.config.self_address(),
            session: status.session,
            phase: status.phase,
        }))
    } else {
        // Return 503 until the session is decided
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
