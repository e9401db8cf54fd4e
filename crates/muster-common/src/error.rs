//! Common error types for Muster components.

use std::time::Duration;
use thiserror::Error;

/// Common errors across Muster components
#[derive(Debug, Clone, Error)]
pub enum MusterError {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Discovery lookup did not complete within the resolve timeout
    #[error("Discovery of '{service}' timed out after {timeout:?}")]
    DiscoveryTimeout { service: String, timeout: Duration },

    /// Discovery backend failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Probe did not complete in time
    #[error("Probe of {0} timed out")]
    ProbeTimeout(String),

    /// Probe failed (connection error, non-success response, bad body)
    #[error("Probe error: {0}")]
    Probe(String),

    /// Membership subsystem rejected or failed a join/initiate request
    #[error("Membership error: {0}")]
    Membership(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MusterError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::DiscoveryTimeout { .. } => 504,
            Self::Discovery(_) => 503,
            Self::ProbeTimeout(_) => 504,
            Self::Probe(_) => 502,
            Self::Membership(_) => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryTimeout { .. }
                | Self::Discovery(_)
                | Self::ProbeTimeout(_)
                | Self::Probe(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_failures_are_retryable() {
        let timeout = MusterError::DiscoveryTimeout {
            service: "orders".to_string(),
            timeout: Duration::from_secs(3),
        };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.status_code(), 504);
        assert!(timeout.to_string().contains("orders"));

        assert!(!MusterError::Config("bad".into()).is_retryable());
    }
}
