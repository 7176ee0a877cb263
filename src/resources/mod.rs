//! Owned-resource cache
//!
//! Holds the snapshot of networks and routers the directory assigned to
//! this instance. The snapshot is replaced wholesale; readers clone an
//! `Arc` and never observe a half-updated view.

mod sync;

pub use sync::{ResourceSynchronizer, SyncReport, SyncStatus};

use crate::directory::ResourceSnapshot;
use crate::error::{ProvisionError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Network owned by this instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagedNetwork {
    /// Network id
    pub id: String,
    /// Display name
    pub name: Option<String>,
    /// Network CIDR, when the directory includes it in the snapshot
    pub cidr: Option<String>,
    /// Public host routers connect to
    pub server_endpoint: Option<String>,
    /// Owning tenant
    pub tenant_id: Option<String>,
}

/// Router owned by this instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagedRouter {
    /// Router id
    pub id: String,
    /// Display name
    pub name: Option<String>,
    /// Owning network id
    pub network_id: String,
    /// Directory-side status
    pub status: Option<String>,
}

/// Immutable ownership view
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    /// Networks by id
    pub networks: HashMap<String, ManagedNetwork>,
    /// Routers by id
    pub routers: HashMap<String, ManagedRouter>,
    /// Timestamp reported by the directory
    pub directory_timestamp: Option<String>,
    /// When this snapshot was installed; `None` before the first successful sync
    pub synced_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Build a snapshot from a directory response, stamped with `synced_at`
    pub fn from_directory(snapshot: ResourceSnapshot, synced_at: DateTime<Utc>) -> Self {
        let networks = snapshot
            .networks
            .into_iter()
            .map(|n| {
                (
                    n.id.clone(),
                    ManagedNetwork {
                        id: n.id,
                        name: n.name,
                        cidr: n.cidr,
                        server_endpoint: n.server_endpoint,
                        tenant_id: n.tenant_id,
                    },
                )
            })
            .collect();

        let routers = snapshot
            .routers
            .into_iter()
            .map(|r| {
                (
                    r.id.clone(),
                    ManagedRouter {
                        id: r.id,
                        name: r.name,
                        network_id: r.network_id,
                        status: r.status,
                    },
                )
            })
            .collect();

        Self {
            networks,
            routers,
            directory_timestamp: snapshot.timestamp,
            synced_at: Some(synced_at),
        }
    }
}

/// Lock-guarded holder of the current snapshot
#[derive(Debug, Default)]
pub struct ResourceCache {
    current: RwLock<Arc<Snapshot>>,
}

impl ResourceCache {
    /// Create an empty cache; nothing is managed until the first sync
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically install a new snapshot
    pub fn replace(&self, snapshot: Snapshot) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(snapshot);
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether `resource_id` is a network or router owned by this instance
    pub fn is_managed(&self, resource_id: &str) -> bool {
        let snapshot = self.snapshot();
        snapshot.networks.contains_key(resource_id) || snapshot.routers.contains_key(resource_id)
    }

    /// Whether the network is owned by this instance
    pub fn is_network_managed(&self, network_id: &str) -> bool {
        self.snapshot().networks.contains_key(network_id)
    }

    /// Whether the router is owned by this instance
    pub fn is_router_managed(&self, router_id: &str) -> bool {
        self.snapshot().routers.contains_key(router_id)
    }

    /// Owned network, or `NotManaged`
    pub fn network(&self, network_id: &str) -> Result<ManagedNetwork> {
        self.snapshot()
            .networks
            .get(network_id)
            .cloned()
            .ok_or_else(|| ProvisionError::NotManaged(format!("network {}", network_id)))
    }

    /// Owned router, or `NotManaged`
    pub fn router(&self, router_id: &str) -> Result<ManagedRouter> {
        self.snapshot()
            .routers
            .get(router_id)
            .cloned()
            .ok_or_else(|| ProvisionError::NotManaged(format!("router {}", router_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{NetworkSummary, RouterSummary};

    fn directory_snapshot() -> ResourceSnapshot {
        ResourceSnapshot {
            networks: vec![NetworkSummary {
                id: "net-1".to_string(),
                name: Some("office".to_string()),
                cidr: Some("10.8.0.0/24".to_string()),
                server_endpoint: Some("vpn.example.com".to_string()),
                tenant_id: None,
            }],
            routers: vec![RouterSummary {
                id: "router-1".to_string(),
                name: None,
                network_id: "net-1".to_string(),
                status: None,
            }],
            timestamp: Some("2026-01-01T00:00:00Z".to_string()),
        }
    }

    #[test]
    fn test_empty_cache_manages_nothing() {
        let cache = ResourceCache::new();
        assert!(!cache.is_managed("net-1"));
        assert!(cache.snapshot().synced_at.is_none());
        assert!(matches!(
            cache.router("router-1"),
            Err(ProvisionError::NotManaged(_))
        ));
    }

    #[test]
    fn test_replace_and_query() {
        let cache = ResourceCache::new();
        cache.replace(Snapshot::from_directory(directory_snapshot(), Utc::now()));

        assert!(cache.is_managed("net-1"));
        assert!(cache.is_managed("router-1"));
        assert!(cache.is_network_managed("net-1"));
        assert!(!cache.is_network_managed("router-1"));
        assert!(cache.is_router_managed("router-1"));
        assert_eq!(cache.router("router-1").unwrap().network_id, "net-1");
    }

    #[test]
    fn test_old_snapshot_survives_replace_for_existing_readers() {
        let cache = ResourceCache::new();
        cache.replace(Snapshot::from_directory(directory_snapshot(), Utc::now()));
        let held = cache.snapshot();

        cache.replace(Snapshot::default());

        assert!(held.networks.contains_key("net-1"));
        assert!(!cache.is_managed("net-1"));
    }
}
