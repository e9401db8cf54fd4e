//! Join decisions from a complete round of probe results.

use std::collections::{BTreeMap, BTreeSet};

use muster_common::{ContactPoint, Decision, MusterError};

use super::prober::{ProbeOutcome, ProbeResult};

/// Everything a decider may look at
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub points: &'a BTreeSet<ContactPoint>,
    pub results: &'a BTreeMap<ContactPoint, ProbeResult>,
    pub new_cluster_enabled: bool,
    pub self_address: &'a str,
    pub required_contact_point_nr: usize,
}

pub trait JoinDecider: Send + Sync {
    fn decide(&self, ctx: &DecisionContext<'_>) -> Decision;
}

/// Joins any reachable cluster; otherwise the node with the lowest
/// address among all probed nodes initiates a new one.
///
/// Every node that sees the same probe results picks the same initiator,
/// so at most one node forms a cluster.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowestAddressJoinDecider;

impl JoinDecider for LowestAddressJoinDecider {
    fn decide(&self, ctx: &DecisionContext<'_>) -> Decision {
        let mut seed_nodes = BTreeSet::new();
        let mut addresses = BTreeSet::from([ctx.self_address]);

        for result in ctx.results.values() {
            if let ProbeOutcome::Success {
                seed_nodes: reported,
                self_address,
            } = &result.outcome
            {
                seed_nodes.extend(reported.iter().cloned());
                addresses.insert(self_address.as_str());
            }
        }

        if !seed_nodes.is_empty() {
            return Decision::Join {
                seed_nodes: seed_nodes.into_iter().collect(),
            };
        }

        if ctx.points.is_empty() || ctx.points.len() < ctx.required_contact_point_nr {
            return Decision::Wait;
        }

        // Every point must have answered once; a failed answer marks the
        // point unreachable and leaves it out of the candidate set
        let pending = ctx.points.iter().any(|point| !ctx.results.contains_key(point));
        let reachable = ctx
            .points
            .iter()
            .filter(|point| ctx.results.get(*point).is_some_and(ProbeResult::is_success))
            .count();
        if pending || reachable < ctx.required_contact_point_nr || !ctx.new_cluster_enabled {
            return Decision::Wait;
        }

        if addresses.first() == Some(&ctx.self_address) {
            Decision::Initiate
        } else {
            Decision::Wait
        }
    }
}

/// Decider registered under `name`
pub fn decider_from_config(name: &str) -> Result<Box<dyn JoinDecider>, MusterError> {
    match name {
        "lowest-address" => Ok(Box::new(LowestAddressJoinDecider)),
        other => Err(MusterError::Config(format!("unknown join-decider '{other}'"))),
    }
}
