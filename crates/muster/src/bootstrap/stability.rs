//! Decides when a discovered candidate set is safe to act on.

use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;

use muster_common::ContactPoint;

use super::poller::DiscoveryObservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Stable,
    /// `changed` is true when this observation differs from the previous one
    Unstable { changed: bool },
}

/// Tracks consecutive observations and the time the current set first appeared
#[derive(Debug, Clone)]
pub struct StabilityDetector {
    stable_margin: Duration,
    required_contact_point_nr: usize,
    last_points: Option<BTreeSet<ContactPoint>>,
    last_changed_at: Option<Instant>,
}

impl StabilityDetector {
    pub fn new(stable_margin: Duration, required_contact_point_nr: usize) -> Self {
        Self {
            stable_margin,
            // An empty set is never stable
            required_contact_point_nr: required_contact_point_nr.max(1),
            last_points: None,
            last_changed_at: None,
        }
    }

    pub fn observe(&mut self, observation: &DiscoveryObservation) -> Stability {
        let last_changed_at = match (&self.last_points, self.last_changed_at) {
            (Some(points), Some(at)) if *points == observation.points => at,
            _ => {
                self.last_points = Some(observation.points.clone());
                self.last_changed_at = Some(observation.observed_at);
                return Stability::Unstable { changed: true };
            }
        };

        let unchanged_for = observation.observed_at.saturating_duration_since(last_changed_at);
        if unchanged_for >= self.stable_margin
            && observation.points.len() >= self.required_contact_point_nr
        {
            Stability::Stable
        } else {
            Stability::Unstable { changed: false }
        }
    }

    /// Forget history; the next observation starts a new window
    pub fn reset(&mut self) {
        self.last_points = None;
        self.last_changed_at = None;
    }
}
