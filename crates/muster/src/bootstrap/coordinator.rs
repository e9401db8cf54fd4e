//! The bootstrap state machine.
//!
//! One task owns the session. Commands arrive over an mpsc channel; timers,
//! discovery lookups and probes run as children in a single [`JoinSet`]
//! and come back as [`Event`]s, so session state is only ever touched
//! from the owning loop. Snapshots go out through `watch` channels.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;

use muster_common::{
    BootstrapPhase, BootstrapStatus, ContactPoint, Decision, MusterError, SeedNodesResponse,
};

use super::decider::{DecisionContext, JoinDecider};
use super::poller::{DiscoveryObservation, DiscoveryPoller};
use super::prober::{ContactPointProber, ProbeResult, ProbeVerdict, SeedNodeProbe};
use super::stability::{Stability, StabilityDetector};
use crate::cluster::Membership;
use crate::config::{AppConfig, BootstrapConfig};
use crate::discovery::{Lookup, ServiceDiscovery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    NewSession,
}

/// Completion of a child task, tagged with the session that spawned it
#[derive(Debug)]
enum Event {
    Discovered {
        session: u64,
        result: Result<DiscoveryObservation, MusterError>,
    },
    Probed {
        session: u64,
        round: u64,
        result: ProbeResult,
    },
}

impl Event {
    fn session(&self) -> u64 {
        match self {
            Self::Discovered { session, .. } | Self::Probed { session, .. } => *session,
        }
    }
}

/// Cloneable handle to a running coordinator
#[derive(Clone)]
pub struct BootstrapHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<BootstrapStatus>,
    seed_nodes: watch::Receiver<SeedNodesResponse>,
}

impl BootstrapHandle {
    /// Begin a session unless one is already running
    pub async fn start(&self) -> Result<(), MusterError> {
        self.send(Command::Start).await
    }

    /// Cancel all outstanding work and go idle
    pub async fn stop(&self) -> Result<(), MusterError> {
        self.send(Command::Stop).await
    }

    /// Retire the current session, decided or not, and begin a fresh one
    pub async fn new_session(&self) -> Result<(), MusterError> {
        self.send(Command::NewSession).await
    }

    async fn send(&self, command: Command) -> Result<(), MusterError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| MusterError::Internal("bootstrap coordinator stopped".to_string()))
    }

    pub fn status(&self) -> BootstrapStatus {
        self.status.borrow().clone()
    }

    /// What this node reports to probing peers
    pub fn seed_nodes(&self) -> SeedNodesResponse {
        self.seed_nodes.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BootstrapStatus> {
        self.status.clone()
    }
}

struct BootstrapSession {
    id: u64,
    phase: BootstrapPhase,
    poller: DiscoveryPoller,
    stability: StabilityDetector,
    prober: ContactPointProber,
    observation: Option<DiscoveryObservation>,
    last_observed_at: Option<DateTime<Utc>>,
    decision: Option<Decision>,
    rediscoveries: u32,
}

impl BootstrapSession {
    fn transition(&mut self, phase: BootstrapPhase) {
        if self.phase != phase {
            tracing::info!(session = self.id, from = %self.phase, to = %phase, "Bootstrap phase changed");
            self.phase = phase;
        }
    }

    /// Leave probing and wait for a fresh stable set
    fn rediscover(&mut self) {
        self.prober.abandon();
        self.rediscoveries += 1;
        self.transition(BootstrapPhase::Discovering);
    }
}

pub struct BootstrapCoordinator {
    bootstrap: BootstrapConfig,
    self_address: String,
    lookup: Lookup,
    discovery: Arc<dyn ServiceDiscovery>,
    probe: Arc<dyn SeedNodeProbe>,
    decider: Box<dyn JoinDecider>,
    membership: Arc<dyn Membership>,
    status_tx: watch::Sender<BootstrapStatus>,
    seed_nodes_tx: watch::Sender<SeedNodesResponse>,
    session: Option<BootstrapSession>,
    sessions: u64,
    tasks: JoinSet<Event>,
}

impl BootstrapCoordinator {
    pub fn new(
        config: &AppConfig,
        discovery: Arc<dyn ServiceDiscovery>,
        probe: Arc<dyn SeedNodeProbe>,
        decider: Box<dyn JoinDecider>,
        membership: Arc<dyn Membership>,
    ) -> Self {
        let self_address = config.self_address();
        let (status_tx, _) = watch::channel(BootstrapStatus::default());
        let (seed_nodes_tx, _) = watch::channel(SeedNodesResponse::unjoined(self_address.clone()));

        Self {
            bootstrap: config.bootstrap.clone(),
            self_address,
            lookup: Lookup::from_config(config),
            discovery,
            probe,
            decider,
            membership,
            status_tx,
            seed_nodes_tx,
            session: None,
            sessions: 0,
            tasks: JoinSet::new(),
        }
    }

    /// Move the coordinator into its own task. It runs until `shutdown`
    /// fires or every handle is dropped.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> BootstrapHandle {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let handle = BootstrapHandle {
            commands: commands_tx,
            status: self.status_tx.subscribe(),
            seed_nodes: self.seed_nodes_tx.subscribe(),
        };

        tokio::spawn(self.run(commands_rx, shutdown));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            service = %self.lookup.service_name,
            self_address = %self.self_address,
            "Bootstrap coordinator running"
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => match joined {
                    Ok(event) => self.handle_event(event).await,
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => tracing::error!(error = %e, "Bootstrap task failed"),
                },
                _ = shutdown.recv() => {
                    tracing::info!("Bootstrap coordinator shutting down");
                    break;
                }
            }
        }

        self.tasks.abort_all();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start if self.session.is_some() => {
                tracing::debug!("Bootstrap already started");
            }
            Command::Start | Command::NewSession => self.begin_session(),
            Command::Stop => self.stop(),
        }
        self.publish_status();
    }

    fn begin_session(&mut self) {
        self.tasks.abort_all();
        self.sessions += 1;

        let discovery_config = &self.bootstrap.contact_point_discovery;
        let mut session = BootstrapSession {
            id: self.sessions,
            phase: BootstrapPhase::Idle,
            poller: DiscoveryPoller::new(self.discovery.clone(), self.lookup.clone(), discovery_config),
            stability: StabilityDetector::new(
                discovery_config.stable_margin,
                discovery_config.required_contact_point_nr,
            ),
            prober: ContactPointProber::new(self.probe.clone(), self.bootstrap.contact_point.clone()),
            observation: None,
            last_observed_at: None,
            decision: None,
            rediscoveries: 0,
        };

        spawn_poll(&mut self.tasks, session.id, &session.poller, Duration::ZERO);
        session.transition(BootstrapPhase::Discovering);

        self.seed_nodes_tx
            .send_replace(SeedNodesResponse::unjoined(self.self_address.clone()));
        self.session = Some(session);
    }

    fn stop(&mut self) {
        self.tasks.abort_all();
        if let Some(session) = self.session.take() {
            tracing::info!(session = session.id, phase = %session.phase, "Bootstrap stopped");
        }
    }

    async fn handle_event(&mut self, event: Event) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if event.session() != session.id || session.phase.is_terminal() {
            return;
        }

        match event {
            Event::Discovered { result, .. } => self.on_discovered(result),
            Event::Probed { round, result, .. } => self.on_probed(round, result).await,
        }
        self.publish_status();
    }

    fn on_discovered(&mut self, result: Result<DiscoveryObservation, MusterError>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        // Chained after completion so lookups never overlap
        let delay = session.poller.schedule_after(&result);
        spawn_poll(&mut self.tasks, session.id, &session.poller, delay);

        let Ok(observation) = result else {
            return;
        };
        session.last_observed_at = Some(Utc::now());
        let stability = session.stability.observe(&observation);
        let points = observation.points.clone();
        session.observation = Some(observation);

        match stability {
            Stability::Unstable { changed: true } => {
                if session.phase == BootstrapPhase::Probing {
                    tracing::info!(
                        session = session.id,
                        points = points.len(),
                        "Contact points changed while probing"
                    );
                    session.rediscover();
                }
                session.transition(BootstrapPhase::Discovering);
            }
            Stability::Unstable { changed: false } if session.phase != BootstrapPhase::Probing => {
                let enough = points.len() >= self.bootstrap.contact_point_discovery.required_contact_point_nr;
                session.transition(if enough {
                    BootstrapPhase::Stabilizing
                } else {
                    BootstrapPhase::Discovering
                });
            }
            Stability::Stable if session.phase != BootstrapPhase::Probing => {
                let round = session.prober.begin_round(&points);
                for point in points {
                    spawn_probe(&mut self.tasks, session.id, round, &session.prober, point, Duration::ZERO);
                }
                session.transition(BootstrapPhase::Probing);
            }
            _ => {}
        }
    }

    async fn on_probed(&mut self, round: u64, result: ProbeResult) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.phase != BootstrapPhase::Probing {
            return;
        }

        let decision = match session.prober.record(round, result) {
            ProbeVerdict::Stale => return,
            ProbeVerdict::Dropped { point, failures } => {
                tracing::info!(session = session.id, point = %point, failures, "Rediscovering after dropped contact point");
                session.stability.reset();
                session.rediscover();
                return;
            }
            ProbeVerdict::Recorded { point } => {
                let decision = self.decider.decide(&DecisionContext {
                    points: session.prober.points(),
                    results: session.prober.results(),
                    new_cluster_enabled: self.bootstrap.new_cluster_enabled,
                    self_address: &self.self_address,
                    required_contact_point_nr: self.bootstrap.contact_point_discovery.required_contact_point_nr,
                });

                if !decision.is_final() {
                    let delay = session.prober.next_probe_delay();
                    spawn_probe(&mut self.tasks, session.id, round, &session.prober, point, delay);
                    return;
                }
                decision
            }
        };

        self.conclude(decision).await;
    }

    /// Act on a final decision exactly once for the current session
    async fn conclude(&mut self, decision: Decision) {
        let phase = match decision {
            Decision::Join { .. } => BootstrapPhase::Joining,
            Decision::Initiate => BootstrapPhase::Initiating,
            Decision::Wait => return,
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };

        self.tasks.abort_all();
        session.decision = Some(decision.clone());
        session.transition(phase);
        tracing::info!(session = session.id, decision = ?decision, "Bootstrap decision made");
        self.publish_status();

        let (outcome, seed_nodes) = match decision {
            Decision::Join { seed_nodes } => {
                let outcome = self.membership.join_seed_nodes(&seed_nodes).await;
                let mut published: BTreeSet<String> = seed_nodes.into_iter().collect();
                published.insert(self.self_address.clone());
                (outcome, published.into_iter().collect())
            }
            _ => {
                let outcome = self.membership.initiate_new_cluster(&self.self_address).await;
                (outcome, vec![self.self_address.clone()])
            }
        };
        if let Err(e) = outcome {
            tracing::error!(error = %e, "Membership subsystem rejected the bootstrap decision");
        }

        self.seed_nodes_tx.send_replace(SeedNodesResponse {
            self_node: self.self_address.clone(),
            seed_nodes,
        });
        if let Some(session) = self.session.as_mut() {
            session.transition(BootstrapPhase::Decided);
        }
    }

    fn publish_status(&self) {
        let status = match &self.session {
            Some(session) => BootstrapStatus {
                session: session.id,
                phase: session.phase,
                contact_points: session
                    .observation
                    .as_ref()
                    .map(|o| o.points.iter().cloned().collect())
                    .unwrap_or_default(),
                probe_round: session.prober.round(),
                decision: session.decision.clone(),
                rediscoveries: session.rediscoveries,
                discovery_failures: session.poller.consecutive_failures(),
                last_observed_at: session.last_observed_at,
            },
            None => BootstrapStatus {
                session: self.sessions,
                ..Default::default()
            },
        };
        self.status_tx.send_replace(status);
    }
}

fn spawn_poll(tasks: &mut JoinSet<Event>, session: u64, poller: &DiscoveryPoller, delay: Duration) {
    let poll = poller.poll();
    tasks.spawn(async move {
        tokio::time::sleep(delay).await;
        Event::Discovered {
            session,
            result: poll.await,
        }
    });
}

fn spawn_probe(
    tasks: &mut JoinSet<Event>,
    session: u64,
    round: u64,
    prober: &ContactPointProber,
    point: ContactPoint,
    delay: Duration,
) {
    let probe = prober.probe(point);
    tasks.spawn(async move {
        tokio::time::sleep(delay).await;
        Event::Probed {
            session,
            round,
            result: probe.await,
        }
    });
}
