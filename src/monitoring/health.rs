//! Health check implementation
//!
//! The service is healthy once it holds an ownership snapshot, degraded
//! while the synchronizer keeps failing or the gate is closed, and
//! unhealthy before the first successful synchronization.

use crate::provisioner::ServiceStatus;
use serde::Serialize;
use tracing::debug;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Service is healthy
    Healthy,
    /// Service is degraded
    Degraded,
    /// Service is unhealthy
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Overall health status
    pub status: HealthStatus,
    /// Managed interfaces present on the host
    pub interfaces: usize,
    /// Peers with a recent handshake
    pub online_peers: usize,
    /// Additional details
    pub details: String,
}

impl HealthCheck {
    /// Whether the service can serve requests
    pub fn is_serving(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

/// Derive health from a status report
pub fn check_health(status: &ServiceStatus) -> HealthCheck {
    debug!("Performing health check");

    let mut details = Vec::new();
    let mut health = HealthStatus::Healthy;

    if status.sync.last_success.is_none() {
        health = HealthStatus::Unhealthy;
        details.push("no resource snapshot loaded".to_string());
    } else if status.sync.consecutive_failures > 0 {
        health = HealthStatus::Degraded;
        details.push(format!(
            "{} consecutive sync failures",
            status.sync.consecutive_failures
        ));
    }
    if !status.accepting {
        if health == HealthStatus::Healthy {
            health = HealthStatus::Degraded;
        }
        details.push("shutting down".to_string());
    }

    HealthCheck {
        status: health,
        interfaces: status.interfaces.len(),
        online_peers: status
            .interfaces
            .iter()
            .flat_map(|i| &i.peers)
            .filter(|p| p.online)
            .count(),
        details: if details.is_empty() {
            "All systems operational".to_string()
        } else {
            details.join("; ")
        },
    }
}
