//! Cluster membership collaborators.
//!
//! Bootstrap ends in exactly one join or initiate call per session; the
//! implementations here deliver it to whatever owns cluster membership.

mod membership;

pub use membership::{Membership, from_config};
