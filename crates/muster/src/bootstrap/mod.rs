//! Cluster bootstrap: discovery polling, stability detection, probing and
//! the join decision, driven by a single-owner coordinator task.

mod coordinator;
mod decider;
mod poller;
mod prober;
mod stability;

pub use coordinator::{BootstrapCoordinator, BootstrapHandle};
pub use decider::decider_from_config;
pub use prober::HttpProbeClient;
