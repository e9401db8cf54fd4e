//! Application state and shared resources.

use std::time::Instant;

use muster_common::{BootstrapStatus, SeedNodesResponse};

use crate::bootstrap::BootstrapHandle;
use crate::config::AppConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Handle to the bootstrap coordinator task
    pub bootstrap: BootstrapHandle,

    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, bootstrap: BootstrapHandle) -> Self {
        Self {
            config,
            bootstrap,
            started_at: Instant::now(),
        }
    }

    /// Latest coordinator snapshot
    pub fn status(&self) -> BootstrapStatus {
        self.bootstrap.status()
    }

    /// Seed-node view served to probing peers
    pub fn seed_nodes(&self) -> SeedNodesResponse {
        self.bootstrap.seed_nodes()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
