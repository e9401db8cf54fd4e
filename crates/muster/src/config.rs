//! Configuration management for Muster.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use muster_common::constants::{
    DEFAULT_BACKOFF_MAX, DEFAULT_BACKOFF_RANDOM_FACTOR, DEFAULT_CLUSTER_NAME,
    DEFAULT_DISCOVERY_INTERVAL, DEFAULT_DISCOVERY_METHOD, DEFAULT_FALLBACK_PORT,
    DEFAULT_LISTEN_ADDR, DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_INTERVAL_JITTER,
    DEFAULT_PROBING_FAILURE_TIMEOUT, DEFAULT_REDIS_ENTRY_TTL, DEFAULT_REDIS_KEY_PREFIX,
    DEFAULT_REQUIRED_CONTACT_POINT_NR, DEFAULT_RESOLVE_TIMEOUT, DEFAULT_STABLE_MARGIN,
};
use muster_common::{ContactPoint, MusterError};

use crate::bootstrap::decider_from_config;
use crate::discovery::DiscoveryMethod;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    /// Management HTTP listen address (serves the seed-node route)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Cluster address this node reports to peers; defaults to `listen_addr`
    #[serde(default)]
    pub self_address: Option<String>,

    /// Management `host:port` peers probe, as published to a registry;
    /// defaults to the self-address host with the `listen_addr` port
    #[serde(default)]
    pub advertise_address: Option<String>,

    /// Cluster name, used as the lookup name when no service name is set
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Bootstrap coordinator settings
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Discovery backend settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Where join/initiate decisions are delivered
    #[serde(default)]
    pub membership: MembershipConfig,
}

/// Bootstrap coordinator configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BootstrapConfig {
    /// Allow this node to originate a new cluster
    #[serde(default = "default_true")]
    pub new_cluster_enabled: bool,

    /// Join decision strategy
    #[serde(default = "default_join_decider")]
    pub join_decider: String,

    #[serde(default)]
    pub contact_point_discovery: ContactPointDiscoveryConfig,

    #[serde(default)]
    pub contact_point: ContactPointConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            new_cluster_enabled: true,
            join_decider: default_join_decider(),
            contact_point_discovery: ContactPointDiscoveryConfig::default(),
            contact_point: ContactPointConfig::default(),
        }
    }
}

/// Discovery polling and stability configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContactPointDiscoveryConfig {
    #[serde(default)]
    pub service_name: Option<String>,

    #[serde(default)]
    pub port_name: Option<String>,

    #[serde(default)]
    pub protocol: Option<String>,

    #[serde(default)]
    pub service_namespace: Option<String>,

    /// Overrides the computed lookup name entirely
    #[serde(default)]
    pub effective_name: Option<String>,

    #[serde(default = "default_discovery_method")]
    pub discovery_method: String,

    #[serde(default = "default_stable_margin", with = "humantime_serde")]
    pub stable_margin: Duration,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_backoff_random_factor")]
    pub exponential_backoff_random_factor: f64,

    #[serde(default = "default_backoff_max", with = "humantime_serde")]
    pub exponential_backoff_max: Duration,

    #[serde(default = "default_required_contact_point_nr")]
    pub required_contact_point_nr: usize,

    #[serde(default = "default_resolve_timeout", with = "humantime_serde")]
    pub resolve_timeout: Duration,
}

impl ContactPointDiscoveryConfig {
    /// Name passed to the discovery backend.
    ///
    /// `effective-name` wins; otherwise the service name (or the sanitised
    /// cluster name) with `.namespace` appended when a namespace is set.
    pub fn effective_name(&self, cluster_name: &str) -> String {
        if let Some(name) = &self.effective_name {
            return name.clone();
        }

        let service = self.service_name.clone().unwrap_or_else(|| {
            cluster_name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
                .collect()
        });

        match &self.service_namespace {
            Some(ns) => format!("{service}.{ns}"),
            None => service,
        }
    }
}

impl Default for ContactPointDiscoveryConfig {
    fn default() -> Self {
        Self {
            service_name: None,
            port_name: None,
            protocol: None,
            service_namespace: None,
            effective_name: None,
            discovery_method: default_discovery_method(),
            stable_margin: default_stable_margin(),
            interval: default_interval(),
            exponential_backoff_random_factor: default_backoff_random_factor(),
            exponential_backoff_max: default_backoff_max(),
            required_contact_point_nr: default_required_contact_point_nr(),
            resolve_timeout: default_resolve_timeout(),
        }
    }
}

/// Contact point probing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContactPointConfig {
    /// Port probed when discovery reports none
    #[serde(default = "default_fallback_port")]
    pub fallback_port: u16,

    #[serde(default = "default_probing_failure_timeout", with = "humantime_serde")]
    pub probing_failure_timeout: Duration,

    #[serde(default = "default_probe_interval", with = "humantime_serde")]
    pub probe_interval: Duration,

    #[serde(default = "default_probe_interval_jitter")]
    pub probe_interval_jitter: f64,
}

impl ContactPointConfig {
    /// Upper bound for a single probe request
    pub fn probe_timeout(&self) -> Duration {
        self.probing_failure_timeout
    }
}

impl Default for ContactPointConfig {
    fn default() -> Self {
        Self {
            fallback_port: default_fallback_port(),
            probing_failure_timeout: default_probing_failure_timeout(),
            probe_interval: default_probe_interval(),
            probe_interval_jitter: default_probe_interval_jitter(),
        }
    }
}

/// Settings for each discovery backend
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiscoveryConfig {
    /// Static endpoint lists (`config` method)
    #[serde(default)]
    pub config: StaticDiscoveryConfig,

    /// Redis registry (`redis` method)
    #[serde(default)]
    pub redis: Option<RedisDiscoveryConfig>,

    /// Method chain (`aggregate` method)
    #[serde(default)]
    pub aggregate: AggregateDiscoveryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticDiscoveryConfig {
    #[serde(default)]
    pub services: HashMap<String, StaticService>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticService {
    #[serde(default)]
    pub endpoints: Vec<ContactPoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RedisDiscoveryConfig {
    pub url: String,

    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,

    /// Entries not refreshed within this window are ignored
    #[serde(default = "default_redis_entry_ttl", with = "humantime_serde")]
    pub entry_ttl: Duration,

    /// Heartbeat this node's own entry into the registry
    #[serde(default)]
    pub register_self: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregateDiscoveryConfig {
    #[serde(default)]
    pub methods: Vec<String>,
}

/// Membership collaborator selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipKind {
    /// Record decisions as log events
    #[default]
    Log,
    /// POST decisions to the owning process
    Webhook,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MembershipConfig {
    #[serde(default)]
    pub kind: MembershipKind,

    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_webhook_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            kind: MembershipKind::Log,
            webhook_url: None,
            request_timeout: default_webhook_timeout(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_cluster_name() -> String { DEFAULT_CLUSTER_NAME.to_string() }
fn default_true() -> bool { true }
fn default_join_decider() -> String { "lowest-address".to_string() }
fn default_discovery_method() -> String { DEFAULT_DISCOVERY_METHOD.to_string() }
fn default_stable_margin() -> Duration { DEFAULT_STABLE_MARGIN }
fn default_interval() -> Duration { DEFAULT_DISCOVERY_INTERVAL }
fn default_backoff_random_factor() -> f64 { DEFAULT_BACKOFF_RANDOM_FACTOR }
fn default_backoff_max() -> Duration { DEFAULT_BACKOFF_MAX }
fn default_required_contact_point_nr() -> usize { DEFAULT_REQUIRED_CONTACT_POINT_NR }
fn default_resolve_timeout() -> Duration { DEFAULT_RESOLVE_TIMEOUT }
fn default_fallback_port() -> u16 { DEFAULT_FALLBACK_PORT }
fn default_probing_failure_timeout() -> Duration { DEFAULT_PROBING_FAILURE_TIMEOUT }
fn default_probe_interval() -> Duration { DEFAULT_PROBE_INTERVAL }
fn default_probe_interval_jitter() -> f64 { DEFAULT_PROBE_INTERVAL_JITTER }
fn default_redis_key_prefix() -> String { DEFAULT_REDIS_KEY_PREFIX.to_string() }
fn default_redis_entry_ttl() -> Duration { DEFAULT_REDIS_ENTRY_TTL }
fn default_webhook_timeout() -> Duration { Duration::from_secs(5) }

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(ref self_address) = args.self_address {
            config.self_address = Some(self_address.clone());
        }
        if let Some(ref advertise) = args.advertise_address {
            config.advertise_address = Some(advertise.clone());
        }
        if let Some(ref method) = args.discovery_method {
            config.bootstrap.contact_point_discovery.discovery_method = method.clone();
        }

        Ok(config)
    }

    /// Address reported to peers in the seed-node route
    pub fn self_address(&self) -> String {
        self.self_address
            .clone()
            .unwrap_or_else(|| self.listen_addr.clone())
    }

    /// Where peers reach this node's seed-node route
    pub fn management_address(&self) -> Result<ContactPoint, MusterError> {
        if let Some(advertise) = &self.advertise_address {
            return advertise
                .parse()
                .map_err(|e| MusterError::Config(format!("advertise-address: {e}")));
        }

        let host = self
            .self_address()
            .parse::<ContactPoint>()
            .map_err(|e| MusterError::Config(format!("self-address: {e}")))?
            .host;
        let port = self
            .listen_addr
            .parse::<ContactPoint>()
            .map_err(|e| MusterError::Config(format!("listen-addr: {e}")))?
            .port
            .unwrap_or(self.bootstrap.contact_point.fallback_port);

        Ok(ContactPoint::new(host, Some(port)))
    }

    /// Reject configurations the coordinator cannot run with
    pub fn validate(&self) -> Result<(), MusterError> {
        let self_address = self.self_address();
        if self_address.trim().is_empty()
            || self_address.starts_with("0.0.0.0")
            || self_address.starts_with("[::]")
        {
            return Err(MusterError::Config(
                "self-address must be set to a routable address".to_string(),
            ));
        }

        let discovery = &self.bootstrap.contact_point_discovery;
        if discovery.required_contact_point_nr < 1 {
            return Err(MusterError::Config(
                "required-contact-point-nr must be at least 1".to_string(),
            ));
        }
        if discovery.interval.is_zero() {
            return Err(MusterError::Config("interval must be positive".to_string()));
        }
        if discovery.exponential_backoff_max < discovery.interval {
            return Err(MusterError::Config(
                "exponential-backoff-max must not be below interval".to_string(),
            ));
        }
        if discovery.resolve_timeout.is_zero() {
            return Err(MusterError::Config("resolve-timeout must be positive".to_string()));
        }
        check_factor(
            "exponential-backoff-random-factor",
            discovery.exponential_backoff_random_factor,
        )?;

        let probing = &self.bootstrap.contact_point;
        if probing.probe_interval.is_zero() || probing.probing_failure_timeout.is_zero() {
            return Err(MusterError::Config(
                "probe-interval and probing-failure-timeout must be positive".to_string(),
            ));
        }
        check_factor("probe-interval-jitter", probing.probe_interval_jitter)?;

        decider_from_config(&self.bootstrap.join_decider)?;

        let method: DiscoveryMethod = discovery.discovery_method.parse()?;
        self.check_discovery_method(method, true)?;

        if self.membership.kind == MembershipKind::Webhook && self.membership.webhook_url.is_none() {
            return Err(MusterError::Config(
                "membership.webhook-url is required for the webhook kind".to_string(),
            ));
        }

        Ok(())
    }

    fn check_discovery_method(&self, method: DiscoveryMethod, top_level: bool) -> Result<(), MusterError> {
        match method {
            DiscoveryMethod::Config | DiscoveryMethod::Dns => Ok(()),
            DiscoveryMethod::Redis => match &self.discovery.redis {
                Some(redis) if !redis.url.is_empty() && !redis.entry_ttl.is_zero() => {
                    if redis.register_self {
                        self.management_address()?;
                    }
                    Ok(())
                }
                _ => Err(MusterError::Config(
                    "discovery.redis.url and a positive entry-ttl are required for the redis method"
                        .to_string(),
                )),
            },
            DiscoveryMethod::Aggregate if !top_level => Err(MusterError::Config(
                "aggregate discovery cannot nest another aggregate".to_string(),
            )),
            DiscoveryMethod::Aggregate => {
                let methods = &self.discovery.aggregate.methods;
                if methods.is_empty() {
                    return Err(MusterError::Config(
                        "discovery.aggregate.methods must list at least one method".to_string(),
                    ));
                }
                for name in methods {
                    self.check_discovery_method(name.parse()?, false)?;
                }
                Ok(())
            }
        }
    }
}

fn check_factor(name: &str, value: f64) -> Result<(), MusterError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(MusterError::Config(format!("{name} must be within [0, 1), got {value}")))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            self_address: None,
            advertise_address: None,
            cluster_name: default_cluster_name(),
            bootstrap: BootstrapConfig::default(),
            discovery: DiscoveryConfig::default(),
            membership: MembershipConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routable() -> AppConfig {
        AppConfig {
            self_address: Some("10.0.0.1:8558".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        let discovery = &config.bootstrap.contact_point_discovery;
        assert_eq!(discovery.stable_margin, Duration::from_secs(5));
        assert_eq!(discovery.interval, Duration::from_secs(1));
        assert_eq!(discovery.exponential_backoff_max, Duration::from_secs(15));
        assert_eq!(discovery.required_contact_point_nr, 2);
        assert_eq!(discovery.resolve_timeout, Duration::from_secs(3));
        assert_eq!(config.bootstrap.contact_point.fallback_port, 8558);
        assert_eq!(config.bootstrap.contact_point.probing_failure_timeout, Duration::from_secs(3));
        assert!(config.bootstrap.new_cluster_enabled);
    }

    #[test]
    fn test_parse_kebab_case_toml() {
        let toml = r#"
            self-address = "10.0.0.7:8558"

            [bootstrap]
            new-cluster-enabled = false

            [bootstrap.contact-point-discovery]
            service-name = "orders"
            service-namespace = "prod"
            discovery-method = "config"
            stable-margin = "750ms"
            required-contact-point-nr = 3

            [bootstrap.contact-point]
            probe-interval = "2s"

            [discovery.config.services.orders]
            endpoints = [{ host = "10.0.0.1", port = 8558 }, { host = "10.0.0.2" }]
        "#;

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let discovery = &config.bootstrap.contact_point_discovery;
        assert!(!config.bootstrap.new_cluster_enabled);
        assert_eq!(discovery.stable_margin, Duration::from_millis(750));
        assert_eq!(discovery.required_contact_point_nr, 3);
        assert_eq!(discovery.effective_name(&config.cluster_name), "orders.prod");
        assert_eq!(config.bootstrap.contact_point.probe_interval, Duration::from_secs(2));
        assert_eq!(config.discovery.config.services["orders"].endpoints.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_name_falls_back_to_sanitised_cluster_name() {
        let discovery = ContactPointDiscoveryConfig::default();
        assert_eq!(discovery.effective_name("billing_v2"), "billing-v2");

        let explicit = ContactPointDiscoveryConfig {
            effective_name: Some("custom.lookup".to_string()),
            service_name: Some("ignored".to_string()),
            ..Default::default()
        };
        assert_eq!(explicit.effective_name("muster"), "custom.lookup");
    }

    #[test]
    fn test_management_address_uses_listen_port() {
        let config = AppConfig {
            listen_addr: "0.0.0.0:8558".to_string(),
            self_address: Some("10.0.0.5:2552".to_string()),
            ..Default::default()
        };
        let member = config.management_address().unwrap().to_string();
        assert_eq!(member, "10.0.0.5:8558");

        // peers read the member back as the point they probe
        let point: ContactPoint = member.parse().unwrap();
        assert_eq!(point.authority(9999), "10.0.0.5:8558");

        let v6 = AppConfig {
            listen_addr: "[::]:9000".to_string(),
            self_address: Some("[fd00::5]:2552".to_string()),
            ..Default::default()
        };
        assert_eq!(v6.management_address().unwrap().to_string(), "[fd00::5]:9000");

        let advertised = AppConfig {
            advertise_address: Some("mgmt.node-5:8600".to_string()),
            ..config
        };
        assert_eq!(
            advertised.management_address().unwrap(),
            ContactPoint::new("mgmt.node-5", Some(8600))
        );
    }

    #[test]
    fn test_validate_rejects_unusable_settings() {
        let unspecified = AppConfig::default();
        assert!(matches!(unspecified.validate(), Err(MusterError::Config(_))));

        let mut zero_required = routable();
        zero_required.bootstrap.contact_point_discovery.required_contact_point_nr = 0;
        assert!(zero_required.validate().is_err());

        let mut unknown_method = routable();
        unknown_method.bootstrap.contact_point_discovery.discovery_method = "kubernetes".into();
        assert!(unknown_method.validate().is_err());

        let mut redis_without_url = routable();
        redis_without_url.bootstrap.contact_point_discovery.discovery_method = "redis".into();
        assert!(redis_without_url.validate().is_err());

        let mut nested = routable();
        nested.bootstrap.contact_point_discovery.discovery_method = "aggregate".into();
        nested.discovery.aggregate.methods = vec!["aggregate".into()];
        assert!(nested.validate().is_err());

        let mut bad_advertise = routable();
        bad_advertise.bootstrap.contact_point_discovery.discovery_method = "redis".into();
        bad_advertise.advertise_address = Some("host:port".into());
        bad_advertise.discovery.redis = Some(RedisDiscoveryConfig {
            url: "redis://127.0.0.1:6379".into(),
            key_prefix: "muster:service".into(),
            entry_ttl: Duration::from_secs(15),
            register_self: true,
        });
        assert!(bad_advertise.validate().is_err());

        let mut webhook = routable();
        webhook.membership.kind = MembershipKind::Webhook;
        assert!(webhook.validate().is_err());

        assert!(routable().validate().is_ok());
    }
}
