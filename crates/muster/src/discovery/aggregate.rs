//! Ordered fallback over several discovery backends.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use muster_common::{ContactPoint, MusterError};

use super::{Lookup, ServiceDiscovery};

/// Tries each backend in order; the first non-empty successful result wins.
///
/// An empty success from every backend is an empty result. If every
/// backend fails, the last error is returned.
pub struct AggregateDiscovery {
    chain: Vec<Arc<dyn ServiceDiscovery>>,
}

impl AggregateDiscovery {
    pub fn new(chain: Vec<Arc<dyn ServiceDiscovery>>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl ServiceDiscovery for AggregateDiscovery {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    async fn lookup(
        &self,
        lookup: &Lookup,
        timeout: Duration,
    ) -> Result<BTreeSet<ContactPoint>, MusterError> {
        let mut last_error = None;
        let mut any_success = false;

        for backend in &self.chain {
            match backend.lookup(lookup, timeout).await {
                Ok(points) if !points.is_empty() => return Ok(points),
                Ok(_) => {
                    any_success = true;
                    tracing::debug!(backend = backend.name(), "No contact points, trying next");
                }
                Err(e) => {
                    tracing::debug!(backend = backend.name(), error = %e, "Lookup failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !any_success => Err(e),
            _ => Ok(BTreeSet::new()),
        }
    }
}
