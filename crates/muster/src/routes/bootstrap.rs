//! Bootstrap endpoints: the seed-node route peers probe, plus status and
//! session control for the owning process.

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};

use muster_common::{BootstrapStatus, SeedNodesResponse};

use crate::state::AppState;

/// Seed nodes this node currently knows (empty until it has decided)
pub async fn seed_nodes(State(state): State<AppState>) -> Json<SeedNodesResponse> {
    Json(state.seed_nodes())
}

/// Current coordinator snapshot
pub async fn status(State(state): State<AppState>) -> Json<BootstrapStatus> {
    Json(state.status())
}

/// Begin a fresh bootstrap session
///
/// Returns:
/// - 202: Session requested
/// - 503: Coordinator no longer running
pub async fn new_session(State(state): State<AppState>) -> StatusCode {
    match state.bootstrap.new_session().await {
        Ok(()) => {
            tracing::info!("New bootstrap session requested");
            StatusCode::ACCEPTED
        }
        Err(e) => {
            tracing::warn!(error = %e, "Bootstrap session request rejected");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
