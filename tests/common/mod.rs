//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use tempfile::TempDir;
use wg_provisioner::config::Config;
use wg_provisioner::directory::{
    NetworkDetail, NetworkSummary, ResourceSnapshot, RouterDetail, RouterSummary, StaticDirectory,
};
use wg_provisioner::system::memory::{InMemoryFirewall, InMemoryWireGuard};
use wg_provisioner::system::Capabilities;
use wg_provisioner::wireguard::NativeKeyGenerator;
use wg_provisioner::Provisioner;

/// Network detail as the directory would return it
pub fn network(id: &str, cidr: &str) -> NetworkDetail {
    NetworkDetail {
        id: id.to_string(),
        name: Some(format!("{} network", id)),
        cidr: cidr.to_string(),
        server_endpoint: Some("vpn.example.com".to_string()),
        tenant_id: None,
        listen_port: None,
        dns_servers: vec![],
        allocated_addresses: vec![],
    }
}

/// Router detail as the directory would return it
pub fn router(id: &str, network_id: &str) -> RouterDetail {
    RouterDetail {
        id: id.to_string(),
        name: Some(format!("{}-name", id)),
        network_id: network_id.to_string(),
        status: Some("active".to_string()),
        allowed_networks: vec![],
    }
}

/// Load networks and routers into the directory, snapshot and details alike
pub fn seed(directory: &StaticDirectory, networks: &[NetworkDetail], routers: &[RouterDetail]) {
    directory.set_snapshot(ResourceSnapshot {
        networks: networks
            .iter()
            .map(|n| NetworkSummary {
                id: n.id.clone(),
                name: n.name.clone(),
                cidr: Some(n.cidr.clone()),
                server_endpoint: n.server_endpoint.clone(),
                tenant_id: n.tenant_id.clone(),
            })
            .collect(),
        routers: routers
            .iter()
            .map(|r| RouterSummary {
                id: r.id.clone(),
                name: r.name.clone(),
                network_id: r.network_id.clone(),
                status: r.status.clone(),
            })
            .collect(),
        timestamp: None,
    });
    for n in networks {
        directory.insert_network(n.clone());
    }
    for r in routers {
        directory.insert_router(r.clone());
    }
}

/// A provisioner over in-memory capabilities and a temporary state dir
pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub directory: Arc<StaticDirectory>,
    pub wireguard: Arc<InMemoryWireGuard>,
    pub firewall: Arc<InMemoryFirewall>,
    pub provisioner: Arc<Provisioner>,
}

impl Harness {
    /// `net-1` = 10.8.0.0/24 with routers `router-a`, `router-b`, `router-c`
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Same inventory with configuration tweaks
    pub async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.instance_id = "vpn-1".to_string();
        config.wireguard.state_dir = dir.path().join("state");
        config.firewall.masquerade_interface = Some("eth0".to_string());
        tweak(&mut config);

        let directory = Arc::new(StaticDirectory::new());
        seed(
            &directory,
            &[network("net-1", "10.8.0.0/24")],
            &[
                router("router-a", "net-1"),
                router("router-b", "net-1"),
                router("router-c", "net-1"),
            ],
        );

        let wireguard = Arc::new(InMemoryWireGuard::new());
        let firewall = Arc::new(InMemoryFirewall::new());
        let provisioner = Arc::new(build(&config, &directory, &wireguard, &firewall));
        provisioner.sync_now().await.unwrap();

        Self {
            dir,
            config,
            directory,
            wireguard,
            firewall,
            provisioner,
        }
    }

    /// A fresh provisioner over the same state dir and host, as after a restart
    pub async fn restart(&self) -> Provisioner {
        let provisioner = build(&self.config, &self.directory, &self.wireguard, &self.firewall);
        provisioner.sync_now().await.unwrap();
        provisioner
    }
}

fn build(
    config: &Config,
    directory: &Arc<StaticDirectory>,
    wireguard: &Arc<InMemoryWireGuard>,
    firewall: &Arc<InMemoryFirewall>,
) -> Provisioner {
    Provisioner::new(
        config,
        directory.clone(),
        Capabilities {
            wireguard: wireguard.clone(),
            firewall: firewall.clone(),
            keys: Arc::new(NativeKeyGenerator),
        },
    )
    .unwrap()
}
