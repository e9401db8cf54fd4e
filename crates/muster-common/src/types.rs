//! Core types shared across Muster components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MusterError;

/// A discovered candidate peer, identified by host and optional management port.
///
/// Ordering is by host, then port, which gives every node the same
/// iteration order over a set of contact points.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactPoint {
    /// Hostname or IP address (IPv6 without brackets)
    pub host: String,

    /// Management port, if the discovery backend reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ContactPoint {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` authority for outbound requests, using `fallback_port`
    /// when discovery reported no port
    pub fn authority(&self, fallback_port: u16) -> String {
        let port = self.port.unwrap_or(fallback_port);
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, port)
        } else {
            format!("{}:{}", self.host, port)
        }
    }
}

impl fmt::Display for ContactPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.host.contains(':'), self.port) {
            (true, Some(port)) => write!(f, "[{}]:{}", self.host, port),
            (true, None) => write!(f, "[{}]", self.host),
            (false, Some(port)) => write!(f, "{}:{}", self.host, port),
            (false, None) => f.write_str(&self.host),
        }
    }
}

impl FromStr for ContactPoint {
    type Err = MusterError;

    /// Parses `host`, `host:port`, `[v6]`, `[v6]:port` and bare IPv6 literals
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MusterError::Discovery("empty contact point".to_string()));
        }

        let parse_port = |p: &str| {
            p.parse::<u16>()
                .map_err(|_| MusterError::Discovery(format!("invalid port in contact point '{s}'")))
        };

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| MusterError::Discovery(format!("unterminated '[' in '{s}'")))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => Some(parse_port(p)?),
                None if tail.is_empty() => None,
                None => {
                    return Err(MusterError::Discovery(format!(
                        "unexpected trailing text in '{s}'"
                    )));
                }
            };
            return Ok(Self::new(host, port));
        }

        match s.matches(':').count() {
            0 => Ok(Self::new(s, None)),
            1 => {
                let (host, port) = s.split_once(':').unwrap_or((s, ""));
                if host.is_empty() {
                    return Err(MusterError::Discovery(format!("missing host in '{s}'")));
                }
                Ok(Self::new(host, Some(parse_port(port)?)))
            }
            // Bare IPv6 literal
            _ => Ok(Self::new(s, None)),
        }
    }
}

/// Body of the seed-node probe route.
///
/// `seed_nodes` is empty while the reporting node has not joined or
/// formed a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedNodesResponse {
    /// The reporting node's own cluster address
    #[serde(rename = "self")]
    pub self_node: String,

    /// Addresses of known cluster members usable as join targets
    #[serde(default)]
    pub seed_nodes: Vec<String>,
}

impl SeedNodesResponse {
    pub fn unjoined(self_node: impl Into<String>) -> Self {
        Self {
            self_node: self_node.into(),
            seed_nodes: Vec::new(),
        }
    }
}

/// Outcome of one join decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Decision {
    /// Join an existing cluster through these seed nodes
    Join {
        #[serde(rename = "seedNodes")]
        seed_nodes: Vec<String>,
    },
    /// Originate a new cluster with this node as its first member
    Initiate,
    /// Keep discovering / probing
    Wait,
}

impl Decision {
    /// Returns true for verdicts that end a session
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Wait)
    }
}

/// Phase of a bootstrap session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootstrapPhase {
    /// Session created, not yet polling
    #[default]
    Idle,
    /// Polling discovery; the candidate set changed recently
    Discovering,
    /// Candidate set unchanged but not yet stable
    Stabilizing,
    /// Probing the stabilized contact points
    Probing,
    /// Handing seed nodes to the membership subsystem
    Joining,
    /// Asking the membership subsystem to originate a cluster
    Initiating,
    /// Terminal; the session's decision is final
    Decided,
}

impl BootstrapPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Decided)
    }
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Stabilizing => "stabilizing",
            Self::Probing => "probing",
            Self::Joining => "joining",
            Self::Initiating => "initiating",
            Self::Decided => "decided",
        };
        f.write_str(name)
    }
}

/// Snapshot of the coordinator, published on every state change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapStatus {
    /// Session counter, bumped for every fresh session
    pub session: u64,

    /// Current phase
    pub phase: BootstrapPhase,

    /// Contact points of the latest observation
    pub contact_points: Vec<ContactPoint>,

    /// Probe round counter within the session
    pub probe_round: u64,

    /// The session's decision, once made
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,

    /// Times probing fell back to discovery in this session
    pub rediscoveries: u32,

    /// Consecutive failed discovery lookups
    pub discovery_failures: u32,

    /// Wall-clock time of the latest successful observation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_observed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_point_parse_forms() {
        assert_eq!("10.0.0.1".parse::<ContactPoint>().unwrap(), ContactPoint::new("10.0.0.1", None));
        assert_eq!(
            "node-a:8558".parse::<ContactPoint>().unwrap(),
            ContactPoint::new("node-a", Some(8558))
        );
        assert_eq!(
            "[fd00::1]:9000".parse::<ContactPoint>().unwrap(),
            ContactPoint::new("fd00::1", Some(9000))
        );
        assert_eq!("fd00::1".parse::<ContactPoint>().unwrap(), ContactPoint::new("fd00::1", None));

        assert!("node-a:http".parse::<ContactPoint>().is_err());
        assert!(":8558".parse::<ContactPoint>().is_err());
        assert!("[fd00::1".parse::<ContactPoint>().is_err());
    }

    #[test]
    fn test_contact_point_authority_uses_fallback() {
        let bare = ContactPoint::new("node-a", None);
        assert_eq!(bare.authority(8558), "node-a:8558");

        let v6 = ContactPoint::new("fd00::1", Some(9000));
        assert_eq!(v6.authority(8558), "[fd00::1]:9000");
        assert_eq!(v6.to_string(), "[fd00::1]:9000");
    }

    #[test]
    fn test_seed_nodes_wire_format() {
        let body = r#"{"self":"10.0.0.2:2552","seedNodes":["10.0.0.1:2552"]}"#;
        let parsed: SeedNodesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.self_node, "10.0.0.2:2552");
        assert_eq!(parsed.seed_nodes, vec!["10.0.0.1:2552".to_string()]);

        let json = serde_json::to_value(SeedNodesResponse::unjoined("a")).unwrap();
        assert_eq!(json, serde_json::json!({"self": "a", "seedNodes": []}));
    }

    #[test]
    fn test_decision_serialization() {
        let join = Decision::Join {
            seed_nodes: vec!["a".to_string()],
        };
        let json = serde_json::to_value(&join).unwrap();
        assert_eq!(json, serde_json::json!({"action": "join", "seedNodes": ["a"]}));
        assert!(join.is_final());
        assert!(!Decision::Wait.is_final());
    }
}
