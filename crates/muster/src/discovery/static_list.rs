//! Static endpoint lists from configuration.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use muster_common::{ContactPoint, MusterError};

use super::{Lookup, ServiceDiscovery};
use crate::config::StaticDiscoveryConfig;

/// Resolves service names against endpoint lists fixed at startup
pub struct StaticDiscovery {
    services: HashMap<String, BTreeSet<ContactPoint>>,
}

impl StaticDiscovery {
    pub fn from_config(config: &StaticDiscoveryConfig) -> Self {
        let services = config
            .services
            .iter()
            .map(|(name, service)| (name.clone(), service.endpoints.iter().cloned().collect()))
            .collect();
        Self { services }
    }
}

#[async_trait]
impl ServiceDiscovery for StaticDiscovery {
    fn name(&self) -> &'static str {
        "config"
    }

    async fn lookup(
        &self,
        lookup: &Lookup,
        _timeout: Duration,
    ) -> Result<BTreeSet<ContactPoint>, MusterError> {
        // Unknown services resolve to nothing rather than failing
        Ok(self
            .services
            .get(&lookup.service_name)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticService;

    #[tokio::test]
    async fn test_unknown_service_is_empty() {
        let mut config = StaticDiscoveryConfig::default();
        config.services.insert(
            "orders".to_string(),
            StaticService {
                endpoints: vec![
                    ContactPoint::new("10.0.0.2", None),
                    ContactPoint::new("10.0.0.1", None),
                    ContactPoint::new("10.0.0.1", None),
                ],
            },
        );
        let discovery = StaticDiscovery::from_config(&config);

        let orders = discovery
            .lookup(&Lookup::new("orders"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders.iter().next().unwrap().host, "10.0.0.1");

        let missing = discovery
            .lookup(&Lookup::new("billing"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(missing.is_empty());
    }
}
