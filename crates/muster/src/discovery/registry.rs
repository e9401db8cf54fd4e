//! Redis-backed service registry.
//!
//! Each service is a sorted set `<key-prefix>:<service>` whose members are
//! `host:port` strings scored by their last heartbeat (unix millis).
//! Lookups return members refreshed within `entry-ttl`; a node running
//! with `register-self` keeps its own member fresh via
//! [`registration_worker`].

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use muster_common::{ContactPoint, MusterError};

use super::{Lookup, ServiceDiscovery};
use crate::config::RedisDiscoveryConfig;

/// Sorted-set registry in Redis
pub struct RedisRegistry {
    client: redis::Client,
    /// Connected lazily so an unreachable Redis is a retryable discovery
    /// failure rather than a startup error
    conn: Mutex<Option<ConnectionManager>>,
    key_prefix: String,
    entry_ttl: Duration,
}

impl RedisRegistry {
    pub fn new(config: &RedisDiscoveryConfig) -> Result<Self, MusterError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| MusterError::Config(format!("invalid discovery.redis.url: {e}")))?;

        Ok(Self {
            client,
            conn: Mutex::new(None),
            key_prefix: config.key_prefix.clone(),
            entry_ttl: config.entry_ttl,
        })
    }

    /// Registry key for a service
    pub fn key(&self, service: &str) -> String {
        format!("{}:{}", self.key_prefix, service)
    }

    /// How often a registered node should refresh its entry
    pub fn heartbeat_interval(&self) -> Duration {
        (self.entry_ttl / 3).max(Duration::from_millis(100))
    }

    async fn connection(&self, timeout: Duration) -> Result<ConnectionManager, MusterError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = tokio::time::timeout(timeout, ConnectionManager::new(self.client.clone()))
            .await
            .map_err(|_| MusterError::Discovery(format!("Redis connection timed out after {timeout:?}")))?
            .map_err(|e| MusterError::Discovery(format!("Redis connection failed: {e}")))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    fn cutoff_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.entry_ttl.as_millis() as i64
    }

    /// Refresh `member` under `service` and prune expired members
    pub async fn heartbeat(&self, service: &str, member: &str) -> Result<(), MusterError> {
        let key = self.key(service);
        let now = chrono::Utc::now().timestamp_millis();
        let mut conn = self.connection(self.heartbeat_interval()).await?;

        let _: () = conn
            .zadd(&key, member, now)
            .await
            .map_err(|e| MusterError::Discovery(format!("Redis ZADD failed: {e}")))?;
        let _: () = conn
            .zrembyscore(&key, "-inf", self.cutoff_millis())
            .await
            .map_err(|e| MusterError::Discovery(format!("Redis ZREMRANGEBYSCORE failed: {e}")))?;

        Ok(())
    }

    /// Remove `member` from `service`
    pub async fn deregister(&self, service: &str, member: &str) -> Result<(), MusterError> {
        let mut conn = self.connection(self.heartbeat_interval()).await?;
        let _: () = conn
            .zrem(self.key(service), member)
            .await
            .map_err(|e| MusterError::Discovery(format!("Redis ZREM failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl ServiceDiscovery for RedisRegistry {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn lookup(
        &self,
        lookup: &Lookup,
        timeout: Duration,
    ) -> Result<BTreeSet<ContactPoint>, MusterError> {
        let key = self.key(&lookup.service_name);
        let mut conn = self.connection(timeout).await?;

        let members: Vec<String> = conn
            .zrangebyscore(&key, self.cutoff_millis(), "+inf")
            .await
            .map_err(|e| MusterError::Discovery(format!("Redis ZRANGEBYSCORE failed: {e}")))?;

        Ok(parse_members(&key, members))
    }
}

fn parse_members(key: &str, members: Vec<String>) -> BTreeSet<ContactPoint> {
    members
        .into_iter()
        .filter_map(|member| match member.parse::<ContactPoint>() {
            Ok(point) => Some(point),
            Err(e) => {
                tracing::warn!(key = %key, member = %member, error = %e, "Skipping malformed registry entry");
                None
            }
        })
        .collect()
}

/// Background worker that keeps this node registered under `service`
pub async fn registration_worker(
    registry: Arc<RedisRegistry>,
    service: String,
    member: String,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let interval = registry.heartbeat_interval();
    tracing::info!(
        service = %service,
        member = %member,
        interval = ?interval,
        "Registry heartbeat started"
    );

    loop {
        if let Err(e) = registry.heartbeat(&service, &member).await {
            tracing::warn!(service = %service, error = %e, "Registry heartbeat failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.recv() => {
                tracing::info!(service = %service, "Registry heartbeat shutting down");
                if let Err(e) = registry.deregister(&service, &member).await {
                    tracing::warn!(error = %e, "Failed to deregister on shutdown");
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RedisRegistry {
        RedisRegistry::new(&RedisDiscoveryConfig {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "muster:service".to_string(),
            entry_ttl: Duration::from_secs(15),
            register_self: true,
        })
        .unwrap()
    }

    #[test]
    fn test_key_and_heartbeat_interval() {
        let registry = registry();
        assert_eq!(registry.key("orders.prod"), "muster:service:orders.prod");
        assert_eq!(registry.heartbeat_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_members_skips_malformed() {
        let points = parse_members(
            "k",
            vec![
                "10.0.0.1:8558".to_string(),
                "10.0.0.2:not-a-port".to_string(),
                "node-c".to_string(),
            ],
        );
        assert_eq!(points.len(), 2);
        assert!(points.contains(&ContactPoint::new("node-c", None)));
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails_within_lookup_timeout() {
        let registry = RedisRegistry::new(&RedisDiscoveryConfig {
            url: "redis://127.0.0.1:1".to_string(),
            key_prefix: "muster:service".to_string(),
            entry_ttl: Duration::from_secs(15),
            register_self: false,
        })
        .unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            registry.lookup(&Lookup::new("orders"), Duration::from_millis(200)),
        )
        .await
        .expect("lookup ignored its timeout");
        assert!(matches!(result, Err(MusterError::Discovery(_))));
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let result = RedisRegistry::new(&RedisDiscoveryConfig {
            url: "not a url".to_string(),
            key_prefix: "p".to_string(),
            entry_ttl: Duration::from_secs(15),
            register_self: false,
        });
        assert!(matches!(result, Err(MusterError::Config(_))));
    }
}
