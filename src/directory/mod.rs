//! Directory service contract
//!
//! The directory owns the inventory of networks and routers and decides
//! which instance manages each of them. This module defines the narrow read
//! contract the service consumes, plus an HTTP client and an in-memory
//! implementation.

mod http;
mod memory;

pub use http::HttpDirectory;
pub use memory::StaticDirectory;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Full ownership snapshot for one instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Networks assigned to the instance
    #[serde(default, alias = "vpn_networks")]
    pub networks: Vec<NetworkSummary>,

    /// Routers assigned to the instance
    #[serde(default)]
    pub routers: Vec<RouterSummary>,

    /// Directory-side timestamp of the snapshot
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Network entry of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    /// Network id
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Network CIDR
    #[serde(default)]
    pub cidr: Option<String>,

    /// Public host routers connect to
    #[serde(default)]
    pub server_endpoint: Option<String>,

    /// Owning tenant
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// Router entry of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterSummary {
    /// Router id
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Network the router belongs to
    #[serde(alias = "vpn_network_id")]
    pub network_id: String,

    /// Directory-side status
    #[serde(default)]
    pub status: Option<String>,
}

/// Complete network record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDetail {
    /// Network id
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Network CIDR (IPv4)
    pub cidr: String,

    /// Public host routers connect to
    #[serde(default)]
    pub server_endpoint: Option<String>,

    /// Owning tenant
    #[serde(default)]
    pub tenant_id: Option<String>,

    /// Listen port assigned by the directory, if any
    #[serde(default)]
    pub listen_port: Option<u16>,

    /// DNS servers pushed to peers of this network
    #[serde(default)]
    pub dns_servers: Vec<String>,

    /// Addresses the directory already considers in use
    #[serde(default)]
    pub allocated_addresses: Vec<Ipv4Addr>,
}

/// Complete router record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterDetail {
    /// Router id
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Network the router belongs to
    #[serde(alias = "vpn_network_id")]
    pub network_id: String,

    /// Directory-side status
    #[serde(default)]
    pub status: Option<String>,

    /// Networks behind the router reachable through its tunnel
    #[serde(default)]
    pub allowed_networks: Vec<String>,
}

/// Read contract with the directory service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Fetch the full snapshot of resources owned by `instance_id`
    async fn resource_snapshot(&self, instance_id: &str) -> Result<ResourceSnapshot>;

    /// Fetch one network
    async fn network(&self, id: &str) -> Result<NetworkDetail>;

    /// Fetch one router
    async fn router(&self, id: &str) -> Result<RouterDetail>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_accepts_directory_field_names() {
        let json = r#"{
            "vpn_networks": [{"id": "net-1", "cidr": "10.8.0.0/24", "server_endpoint": "vpn.example.com"}],
            "routers": [{"id": "r-1", "vpn_network_id": "net-1", "status": "online"}]
        }"#;

        let snapshot: ResourceSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.networks.len(), 1);
        assert_eq!(snapshot.routers[0].network_id, "net-1");
        assert!(snapshot.timestamp.is_none());
    }

    #[test]
    fn test_network_detail_defaults() {
        let json = r#"{"id": "net-1", "cidr": "10.8.0.0/24"}"#;
        let detail: NetworkDetail = serde_json::from_str(json).unwrap();
        assert!(detail.allocated_addresses.is_empty());
        assert!(detail.listen_port.is_none());
        assert!(detail.dns_servers.is_empty());
    }
}
