//! Service discovery backends.
//!
//! The bootstrap coordinator only needs "list the contact points for a
//! service name". Each backend implements [`ServiceDiscovery`]; the
//! configured `discovery-method` selects one through [`from_config`].

mod aggregate;
mod dns;
mod registry;
mod static_list;

pub use aggregate::AggregateDiscovery;
pub use dns::DnsDiscovery;
pub use registry::{RedisRegistry, registration_worker};
pub use static_list::StaticDiscovery;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use muster_common::{ContactPoint, MusterError};

use crate::config::AppConfig;

/// What to look up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub service_name: String,
    pub port_name: Option<String>,
    pub protocol: Option<String>,
}

impl Lookup {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            port_name: None,
            protocol: None,
        }
    }

    /// Lookup for the configured effective name
    pub fn from_config(config: &AppConfig) -> Self {
        let discovery = &config.bootstrap.contact_point_discovery;
        Self {
            port_name: discovery.port_name.clone(),
            protocol: discovery.protocol.clone(),
            ..Self::new(discovery.effective_name(&config.cluster_name))
        }
    }
}

/// Lists candidate contact points for a service
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Resolve the current contact points of `lookup.service_name`.
    ///
    /// Backends doing network I/O bound it by `timeout`; the caller
    /// enforces the same budget around the whole call.
    async fn lookup(
        &self,
        lookup: &Lookup,
        timeout: Duration,
    ) -> Result<BTreeSet<ContactPoint>, MusterError>;
}

/// Discovery methods selectable through `discovery-method`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMethod {
    Config,
    Dns,
    Redis,
    Aggregate,
}

impl FromStr for DiscoveryMethod {
    type Err = MusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "config" => Ok(Self::Config),
            "dns" => Ok(Self::Dns),
            "redis" => Ok(Self::Redis),
            "aggregate" => Ok(Self::Aggregate),
            other => Err(MusterError::Config(format!(
                "no discovery method named '{other}' (expected config, dns, redis or aggregate)"
            ))),
        }
    }
}

/// Discovery built from configuration, plus the Redis registry when one is
/// in use so the caller can run self-registration against it
pub struct DiscoveryBackend {
    pub discovery: Arc<dyn ServiceDiscovery>,
    pub registry: Option<Arc<RedisRegistry>>,
}

/// Build the configured discovery backend
pub fn from_config(config: &AppConfig) -> Result<DiscoveryBackend, MusterError> {
    let method: DiscoveryMethod = config
        .bootstrap
        .contact_point_discovery
        .discovery_method
        .parse()?;

    let mut registry = None;
    let discovery = match method {
        DiscoveryMethod::Aggregate => {
            let methods = &config.discovery.aggregate.methods;
            if methods.is_empty() {
                return Err(MusterError::Config(
                    "discovery.aggregate.methods must list at least one method".to_string(),
                ));
            }
            let mut chain = Vec::with_capacity(methods.len());
            for name in methods {
                let method: DiscoveryMethod = name.parse()?;
                chain.push(build_single(config, method, &mut registry)?);
            }
            Arc::new(AggregateDiscovery::new(chain)) as Arc<dyn ServiceDiscovery>
        }
        method => build_single(config, method, &mut registry)?,
    };

    tracing::info!(method = discovery.name(), "Discovery backend configured");

    Ok(DiscoveryBackend {
        discovery,
        registry,
    })
}

fn build_single(
    config: &AppConfig,
    method: DiscoveryMethod,
    registry: &mut Option<Arc<RedisRegistry>>,
) -> Result<Arc<dyn ServiceDiscovery>, MusterError> {
    match method {
        DiscoveryMethod::Config => Ok(Arc::new(StaticDiscovery::from_config(&config.discovery.config))),
        DiscoveryMethod::Dns => Ok(Arc::new(DnsDiscovery::new())),
        DiscoveryMethod::Redis => {
            let settings = config.discovery.redis.as_ref().ok_or_else(|| {
                MusterError::Config("discovery.redis section is required".to_string())
            })?;
            let redis = match registry {
                Some(existing) => existing.clone(),
                None => {
                    let created = Arc::new(RedisRegistry::new(settings)?);
                    *registry = Some(created.clone());
                    created
                }
            };
            Ok(redis)
        }
        DiscoveryMethod::Aggregate => Err(MusterError::Config(
            "aggregate discovery cannot nest another aggregate".to_string(),
        )),
    }
}
