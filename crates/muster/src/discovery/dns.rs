//! A/AAAA resolution through the system resolver.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;

use muster_common::{ContactPoint, MusterError};

use super::{Lookup, ServiceDiscovery};

/// Resolves the service name as a hostname.
///
/// Contact points carry no port; the prober falls back to `fallback-port`.
#[derive(Debug, Default)]
pub struct DnsDiscovery;

impl DnsDiscovery {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServiceDiscovery for DnsDiscovery {
    fn name(&self) -> &'static str {
        "dns"
    }

    async fn lookup(
        &self,
        lookup: &Lookup,
        timeout: Duration,
    ) -> Result<BTreeSet<ContactPoint>, MusterError> {
        if lookup.port_name.is_some() || lookup.protocol.is_some() {
            tracing::debug!(
                service = %lookup.service_name,
                port_name = ?lookup.port_name,
                protocol = ?lookup.protocol,
                "Port names need SRV records; resolving addresses only"
            );
        }

        let addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((lookup.service_name.as_str(), 0)))
            .await
            .map_err(|_| MusterError::DiscoveryTimeout {
                service: lookup.service_name.clone(),
                timeout,
            })?
            .map_err(|e| {
                MusterError::Discovery(format!("DNS lookup of '{}' failed: {e}", lookup.service_name))
            })?;

        Ok(addrs
            .map(|addr| ContactPoint::new(addr.ip().to_string(), None))
            .collect())
    }
}
