//! Contact point probing.
//!
//! Every stabilized contact point is asked for its seed nodes over HTTP.
//! Results are kept per point for the current round; a point that keeps
//! failing for longer than `probing-failure-timeout` is dropped and the
//! caller falls back to discovery.

use async_trait::async_trait;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use muster_common::constants::routes;
use muster_common::{ContactPoint, MusterError, SeedNodesResponse};

use crate::config::ContactPointConfig;

/// Asks one contact point for its seed nodes
#[async_trait]
pub trait SeedNodeProbe: Send + Sync {
    async fn probe(
        &self,
        point: &ContactPoint,
        fallback_port: u16,
        timeout: Duration,
    ) -> Result<SeedNodesResponse, MusterError>;
}

/// Probe over the seed-nodes HTTP route
#[derive(Debug, Clone, Default)]
pub struct HttpProbeClient {
    client: reqwest::Client,
}

impl HttpProbeClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SeedNodeProbe for HttpProbeClient {
    async fn probe(
        &self,
        point: &ContactPoint,
        fallback_port: u16,
        timeout: Duration,
    ) -> Result<SeedNodesResponse, MusterError> {
        let url = format!("http://{}{}", point.authority(fallback_port), routes::SEED_NODES);

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(&url, e))?
            .error_for_status()
            .map_err(|e| classify(&url, e))?;

        response
            .json::<SeedNodesResponse>()
            .await
            .map_err(|e| MusterError::Probe(format!("{url}: malformed seed-nodes body: {e}")))
    }
}

fn classify(url: &str, e: reqwest::Error) -> MusterError {
    if e.is_timeout() {
        MusterError::ProbeTimeout(url.to_string())
    } else {
        MusterError::Probe(format!("{url}: {e}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success {
        seed_nodes: Vec<String>,
        self_address: String,
    },
    Failure {
        reason: String,
    },
}

/// Latest probe result for one contact point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub point: ContactPoint,
    pub outcome: ProbeOutcome,
    /// When the probe was issued
    pub at: Instant,
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureStreak {
    count: u32,
    first_failure_at: Instant,
}

/// What [`ContactPointProber::record`] did with a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// Stored as the point's latest result; probe it again later
    Recorded { point: ContactPoint },
    /// From an abandoned round or a point no longer probed
    Stale,
    /// The point failed for longer than the failure timeout and was removed
    Dropped { point: ContactPoint, failures: u32 },
}

/// Probe bookkeeping for one session
pub struct ContactPointProber {
    probe: Arc<dyn SeedNodeProbe>,
    config: ContactPointConfig,
    round: u64,
    points: BTreeSet<ContactPoint>,
    results: BTreeMap<ContactPoint, ProbeResult>,
    streaks: HashMap<ContactPoint, FailureStreak>,
}

impl ContactPointProber {
    pub fn new(probe: Arc<dyn SeedNodeProbe>, config: ContactPointConfig) -> Self {
        Self {
            probe,
            config,
            round: 0,
            points: BTreeSet::new(),
            results: BTreeMap::new(),
            streaks: HashMap::new(),
        }
    }

    /// Start probing `points`, discarding everything from earlier rounds
    pub fn begin_round(&mut self, points: &BTreeSet<ContactPoint>) -> u64 {
        self.abandon();
        self.points = points.clone();
        tracing::info!(round = self.round, points = self.points.len(), "Probing contact points");
        self.round
    }

    /// Stop the current round; late results for it become stale
    pub fn abandon(&mut self) {
        self.round += 1;
        self.points.clear();
        self.results.clear();
        self.streaks.clear();
    }

    /// One probe of `point`, bounded by the probe timeout
    pub fn probe(&self, point: ContactPoint) -> impl Future<Output = ProbeResult> + Send + 'static {
        let probe = self.probe.clone();
        let fallback_port = self.config.fallback_port;
        let timeout = self.config.probe_timeout();

        async move {
            let at = Instant::now();
            let outcome = match tokio::time::timeout(timeout, probe.probe(&point, fallback_port, timeout)).await {
                Ok(Ok(response)) => ProbeOutcome::Success {
                    seed_nodes: response.seed_nodes,
                    self_address: response.self_node,
                },
                Ok(Err(e)) => ProbeOutcome::Failure { reason: e.to_string() },
                Err(_) => ProbeOutcome::Failure {
                    reason: MusterError::ProbeTimeout(point.to_string()).to_string(),
                },
            };
            ProbeResult { point, outcome, at }
        }
    }

    pub fn record(&mut self, round: u64, result: ProbeResult) -> ProbeVerdict {
        if round != self.round || !self.points.contains(&result.point) {
            return ProbeVerdict::Stale;
        }

        let point = result.point.clone();
        match &result.outcome {
            ProbeOutcome::Success { seed_nodes, .. } => {
                self.streaks.remove(&point);
                tracing::debug!(point = %point, seed_nodes = seed_nodes.len(), "Probe succeeded");
            }
            ProbeOutcome::Failure { reason } => {
                let streak = self.streaks.entry(point.clone()).or_insert(FailureStreak {
                    count: 0,
                    first_failure_at: result.at,
                });
                streak.count += 1;
                let failing_for = result.at.saturating_duration_since(streak.first_failure_at);

                if failing_for > self.config.probing_failure_timeout {
                    let failures = streak.count;
                    tracing::warn!(
                        point = %point,
                        failures,
                        failing_for = ?failing_for,
                        reason = %reason,
                        "Contact point unreachable, dropping it"
                    );
                    self.points.remove(&point);
                    self.results.remove(&point);
                    self.streaks.remove(&point);
                    return ProbeVerdict::Dropped { point, failures };
                }

                tracing::debug!(point = %point, failures = streak.count, reason = %reason, "Probe failed");
            }
        }

        self.results.insert(point.clone(), result);
        ProbeVerdict::Recorded { point }
    }

    /// Delay before re-probing a point: `probe-interval * (1 + rand * jitter)`
    pub fn next_probe_delay(&self) -> Duration {
        let jitter = rand::rng().random_range(0.0..1.0_f64) * self.config.probe_interval_jitter;
        self.config.probe_interval.mul_f64(1.0 + jitter)
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn points(&self) -> &BTreeSet<ContactPoint> {
        &self.points
    }

    pub fn results(&self) -> &BTreeMap<ContactPoint, ProbeResult> {
        &self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get};

    struct Unreachable;

    #[async_trait]
    impl SeedNodeProbe for Unreachable {
        async fn probe(
            &self,
            point: &ContactPoint,
            _fallback_port: u16,
            _timeout: Duration,
        ) -> Result<SeedNodesResponse, MusterError> {
            Err(MusterError::Probe(format!("{point}: connection refused")))
        }
    }

    fn prober() -> ContactPointProber {
        ContactPointProber::new(
            Arc::new(Unreachable),
            ContactPointConfig {
                probing_failure_timeout: Duration::from_secs(3),
                ..Default::default()
            },
        )
    }

    fn failure(point: &ContactPoint, at: Instant) -> ProbeResult {
        ProbeResult {
            point: point.clone(),
            outcome: ProbeOutcome::Failure {
                reason: "refused".to_string(),
            },
            at,
        }
    }

    #[test]
    fn test_stale_rounds_are_ignored() {
        let mut prober = prober();
        let a = ContactPoint::new("a", None);
        let first = prober.begin_round(&BTreeSet::from([a.clone()]));
        let second = prober.begin_round(&BTreeSet::from([a.clone()]));
        assert_ne!(first, second);

        assert_eq!(prober.record(first, failure(&a, Instant::now())), ProbeVerdict::Stale);
        assert!(prober.results().is_empty());

        let outsider = ContactPoint::new("z", None);
        assert_eq!(prober.record(second, failure(&outsider, Instant::now())), ProbeVerdict::Stale);
    }

    #[test]
    fn test_point_dropped_after_failure_timeout() {
        let mut prober = prober();
        let a = ContactPoint::new("a", None);
        let round = prober.begin_round(&BTreeSet::from([a.clone()]));
        let base = Instant::now();

        for secs in [0, 1, 3] {
            let verdict = prober.record(round, failure(&a, base + Duration::from_secs(secs)));
            assert_eq!(verdict, ProbeVerdict::Recorded { point: a.clone() });
        }

        let verdict = prober.record(round, failure(&a, base + Duration::from_secs(4)));
        assert_eq!(verdict, ProbeVerdict::Dropped { point: a.clone(), failures: 4 });
        assert!(!prober.points().contains(&a));
        assert!(prober.results().is_empty());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let mut prober = prober();
        let a = ContactPoint::new("a", None);
        let round = prober.begin_round(&BTreeSet::from([a.clone()]));
        let base = Instant::now();

        prober.record(round, failure(&a, base));
        prober.record(
            round,
            ProbeResult {
                point: a.clone(),
                outcome: ProbeOutcome::Success {
                    seed_nodes: vec![],
                    self_address: "a:2552".to_string(),
                },
                at: base + Duration::from_secs(2),
            },
        );

        // a new streak starts at 5s, so 7s is still within the timeout
        prober.record(round, failure(&a, base + Duration::from_secs(5)));
        let verdict = prober.record(round, failure(&a, base + Duration::from_secs(7)));
        assert_eq!(verdict, ProbeVerdict::Recorded { point: a.clone() });
        assert!(!prober.results()[&a].is_success());
    }

    #[test]
    fn test_probe_delay_within_jitter() {
        let prober = ContactPointProber::new(
            Arc::new(Unreachable),
            ContactPointConfig {
                probe_interval: Duration::from_secs(1),
                probe_interval_jitter: 0.2,
                ..Default::default()
            },
        );
        for _ in 0..50 {
            let delay = prober.next_probe_delay();
            assert!(delay >= Duration::from_secs(1) && delay < Duration::from_millis(1200));
        }
    }

    #[tokio::test]
    async fn test_unreachable_point_yields_failure() {
        let prober = prober();
        let result = prober.probe(ContactPoint::new("a", None)).await;
        assert!(matches!(result.outcome, ProbeOutcome::Failure { ref reason } if reason.contains("refused")));
    }

    #[tokio::test]
    async fn test_http_probe_against_live_route() {
        let app = Router::new().route(
            routes::SEED_NODES,
            get(|| async {
                Json(SeedNodesResponse {
                    self_node: "10.0.0.9:2552".to_string(),
                    seed_nodes: vec!["10.0.0.1:2552".to_string()],
                })
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = HttpProbeClient::new();
        let response = client
            .probe(&ContactPoint::new("127.0.0.1", None), port, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(response.self_node, "10.0.0.9:2552");
        assert_eq!(response.seed_nodes, vec!["10.0.0.1:2552".to_string()]);

        // an explicit port wins over the fallback
        let explicit = client
            .probe(&ContactPoint::new("127.0.0.1", Some(port)), 1, Duration::from_secs(2))
            .await;
        assert!(explicit.is_ok());

        let refused = client
            .probe(&ContactPoint::new("127.0.0.1", Some(1)), port, Duration::from_secs(2))
            .await;
        assert!(matches!(refused, Err(MusterError::Probe(_))));
    }
}
