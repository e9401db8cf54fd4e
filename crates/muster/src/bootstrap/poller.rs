//! Discovery polling with exponential backoff.
//!
//! Polls are chained: the next one is scheduled after the previous one
//! completes, so a slow backend never sees overlapping lookups.

use rand::Rng;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use muster_common::constants::BACKOFF_GROWTH_FACTOR;
use muster_common::{ContactPoint, MusterError};

use crate::config::ContactPointDiscoveryConfig;
use crate::discovery::{Lookup, ServiceDiscovery};

/// One poll result. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryObservation {
    pub points: BTreeSet<ContactPoint>,
    pub observed_at: Instant,
}

/// Jittered exponential backoff: `min(base * 2^n * (1 ± random_factor), max)`
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    random_factor: f64,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, random_factor: f64) -> Self {
        Self {
            base,
            max,
            random_factor,
            failures: 0,
        }
    }

    /// Consecutive failures since the last reset
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Delay after `failures` consecutive failures for a jitter sample in `[-1, 1]`
    pub fn delay(&self, failures: u32, jitter: f64) -> Duration {
        let growth = BACKOFF_GROWTH_FACTOR.powi(failures.min(32) as i32);
        let spread = 1.0 + self.random_factor * jitter.clamp(-1.0, 1.0);
        let secs = (self.base.as_secs_f64() * growth * spread).min(self.max.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Count a failure and return the jittered delay for it
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let jitter = rand::rng().random_range(-1.0..=1.0);
        self.delay(self.failures, jitter)
    }
}

/// Polls the discovery backend for the configured lookup
pub struct DiscoveryPoller {
    discovery: Arc<dyn ServiceDiscovery>,
    lookup: Lookup,
    interval: Duration,
    resolve_timeout: Duration,
    backoff: Backoff,
}

impl DiscoveryPoller {
    pub fn new(
        discovery: Arc<dyn ServiceDiscovery>,
        lookup: Lookup,
        config: &ContactPointDiscoveryConfig,
    ) -> Self {
        Self {
            discovery,
            lookup,
            interval: config.interval,
            resolve_timeout: config.resolve_timeout,
            backoff: Backoff::new(
                config.interval,
                config.exponential_backoff_max,
                config.exponential_backoff_random_factor,
            ),
        }
    }

    /// One lookup bounded by the resolve timeout
    pub fn poll(&self) -> impl Future<Output = Result<DiscoveryObservation, MusterError>> + Send + 'static {
        let discovery = self.discovery.clone();
        let lookup = self.lookup.clone();
        let timeout = self.resolve_timeout;

        async move {
            match tokio::time::timeout(timeout, discovery.lookup(&lookup, timeout)).await {
                Ok(Ok(points)) => Ok(DiscoveryObservation {
                    points,
                    observed_at: Instant::now(),
                }),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(MusterError::DiscoveryTimeout {
                    service: lookup.service_name,
                    timeout,
                }),
            }
        }
    }

    /// Delay until the next poll, counted from the completion of this one.
    ///
    /// Success waits `interval`; failure waits `resolve_timeout` plus the
    /// backed-off interval.
    pub fn schedule_after(&mut self, outcome: &Result<DiscoveryObservation, MusterError>) -> Duration {
        match outcome {
            Ok(observation) => {
                if self.backoff.failures() > 0 {
                    tracing::info!(
                        service = %self.lookup.service_name,
                        failures = self.backoff.failures(),
                        points = observation.points.len(),
                        "Discovery recovered"
                    );
                }
                self.backoff.reset();
                self.interval
            }
            Err(e) => {
                let delay = self.resolve_timeout + self.backoff.record_failure();
                tracing::warn!(
                    service = %self.lookup.service_name,
                    method = self.discovery.name(),
                    failures = self.backoff.failures(),
                    next_poll_in = ?delay,
                    error = %e,
                    "Discovery lookup failed"
                );
                delay
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.backoff.failures()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Hanging;

    #[async_trait]
    impl ServiceDiscovery for Hanging {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn lookup(
            &self,
            _lookup: &Lookup,
            _timeout: Duration,
        ) -> Result<BTreeSet<ContactPoint>, MusterError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_backoff_grows_monotonically_and_caps() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(15), 0.2);

        for n in 0..6 {
            // worst case for growth: current at +20%, next at -20%
            let current = backoff.delay(n, 1.0);
            let next = backoff.delay(n + 1, -1.0);
            assert!(next >= current || next == Duration::from_secs(15), "n={n}");
        }

        assert_eq!(backoff.delay(3, 0.0), Duration::from_secs(8));
        assert!((backoff.delay(3, 1.0).as_secs_f64() - 9.6).abs() < 1e-9);
        assert_eq!(backoff.delay(10, -1.0), Duration::from_secs(15));
        assert_eq!(backoff.delay(u32::MAX, 1.0), Duration::from_secs(15));
    }

    #[test]
    fn test_record_failure_stays_within_jitter_band() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 0.2);
        for n in 1..=4u32 {
            let delay = backoff.record_failure().as_secs_f64();
            let nominal = 2f64.powi(n as i32);
            assert!(delay >= nominal * 0.8 - 1e-9 && delay <= nominal * 1.2 + 1e-9);
        }
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_and_failure_pays_resolve_timeout() {
        let config = ContactPointDiscoveryConfig {
            exponential_backoff_random_factor: 0.0,
            ..Default::default()
        };
        let mut poller = DiscoveryPoller::new(Arc::new(Hanging), Lookup::new("orders"), &config);

        let started = Instant::now();
        let outcome = poller.poll().await;
        assert!(started.elapsed() >= config.resolve_timeout);
        assert!(matches!(outcome, Err(MusterError::DiscoveryTimeout { .. })));

        // 3s resolve timeout + 1s * 2^1
        assert_eq!(poller.schedule_after(&outcome), Duration::from_secs(5));
        assert_eq!(poller.consecutive_failures(), 1);

        let ok = Ok(DiscoveryObservation {
            points: BTreeSet::new(),
            observed_at: Instant::now(),
        });
        assert_eq!(poller.schedule_after(&ok), config.interval);
        assert_eq!(poller.consecutive_failures(), 0);
    }
}
