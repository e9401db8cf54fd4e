//! Shared constants for Muster components.

use std::time::Duration;

/// Default management HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8558";

/// Default cluster name, used for the lookup name when no service name is set
pub const DEFAULT_CLUSTER_NAME: &str = "muster";

/// Default discovery method
pub const DEFAULT_DISCOVERY_METHOD: &str = "config";

/// Candidate set must stay unchanged this long before it is acted on
pub const DEFAULT_STABLE_MARGIN: Duration = Duration::from_secs(5);

/// Base discovery poll interval
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);

/// Jitter applied to the discovery backoff (±20%)
pub const DEFAULT_BACKOFF_RANDOM_FACTOR: f64 = 0.2;

/// Upper bound for the discovery backoff
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(15);

/// Growth factor of the discovery backoff per consecutive failure
pub const BACKOFF_GROWTH_FACTOR: f64 = 2.0;

/// Minimum number of contact points before the set may be considered stable
pub const DEFAULT_REQUIRED_CONTACT_POINT_NR: usize = 2;

/// Upper bound for one discovery lookup
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(3);

/// Management port used for contact points discovered without a port
pub const DEFAULT_FALLBACK_PORT: u16 = 8558;

/// A contact point failing probes this long is dropped
pub const DEFAULT_PROBING_FAILURE_TIMEOUT: Duration = Duration::from_secs(3);

/// Base delay between probes of the same contact point
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Extra random delay added to each probe, as a fraction of the interval
pub const DEFAULT_PROBE_INTERVAL_JITTER: f64 = 0.2;

/// Default TTL of a self-registration entry in the Redis registry
pub const DEFAULT_REDIS_ENTRY_TTL: Duration = Duration::from_secs(15);

/// Default key prefix of the Redis registry
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "muster:service";

/// HTTP route paths
pub mod routes {
    /// Self-reported seed nodes, probed by peers
    pub const SEED_NODES: &str = "/bootstrap/seed-nodes";

    /// Coordinator status snapshot
    pub const STATUS: &str = "/bootstrap/status";

    /// Request a fresh bootstrap session
    pub const SESSION: &str = "/bootstrap/session";

    /// Liveness
    pub const HEALTH: &str = "/health";

    /// Readiness (decided)
    pub const READY: &str = "/ready";
}
