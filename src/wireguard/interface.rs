//! Interface lifecycle
//!
//! One WireGuard interface per managed network. `ensure` is idempotent and
//! creates the interface lazily; `remove` succeeds when nothing is there.

use super::keys::PublicKey;
use super::state::{server_address, InterfaceRecord, PeerRecord, StateStore};
use crate::error::Result;
use crate::system::{DeviceSettings, KeyGenerator, PeerSpec, WireGuardControl};
use ipnet::Ipv4Net;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Interface name for a network: `wg-` plus the first eight characters of
/// the network id with dashes removed
pub fn interface_name(network_id: &str) -> String {
    let stem: String = network_id.chars().filter(|c| *c != '-').take(8).collect();
    format!("wg-{}", stem)
}

/// What the directory says about a network
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkParams {
    /// Network id
    pub network_id: String,
    /// Network CIDR
    pub cidr: Ipv4Net,
    /// Directory-assigned listen port
    pub listen_port: Option<u16>,
    /// Public host routers connect to
    pub server_endpoint: Option<String>,
    /// DNS servers pushed to peers
    pub dns: Vec<String>,
}

/// Result of `ensure`
#[derive(Debug, Clone)]
pub struct EnsuredInterface {
    /// Persisted record, already saved
    pub record: InterfaceRecord,
    /// Server public key
    pub server_public_key: PublicKey,
    /// Whether the link was created by this call
    pub created: bool,
}

/// Creates, checks and removes local WireGuard interfaces
pub struct InterfaceManager {
    wireguard: Arc<dyn WireGuardControl>,
    keys: Arc<dyn KeyGenerator>,
    store: StateStore,
    base_port: u16,
}

impl InterfaceManager {
    /// Create a manager; `base_port` is the first port tried when neither a
    /// record nor the directory supplies one
    pub fn new(
        wireguard: Arc<dyn WireGuardControl>,
        keys: Arc<dyn KeyGenerator>,
        store: StateStore,
        base_port: u16,
    ) -> Self {
        Self {
            wireguard,
            keys,
            store,
            base_port,
        }
    }

    /// State store shared with the provisioner
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// WireGuard control plane
    pub fn wireguard(&self) -> &Arc<dyn WireGuardControl> {
        &self.wireguard
    }

    fn next_free_port(&self, name: &str) -> Result<u16> {
        let used: HashSet<u16> = self
            .store
            .load_all()?
            .into_iter()
            .filter(|r| r.name != name)
            .map(|r| r.listen_port)
            .collect();
        let mut port = self.base_port;
        while used.contains(&port) {
            port = port.saturating_add(1);
        }
        Ok(port)
    }

    fn build_record(&self, name: &str, params: &NetworkParams) -> Result<InterfaceRecord> {
        let existing = self.store.load(name)?;
        let record = match existing {
            Some(mut record) => {
                if record.cidr != params.cidr {
                    warn!(
                        interface = name,
                        old = %record.cidr,
                        new = %params.cidr,
                        "Network CIDR changed in directory; keeping existing peers"
                    );
                    record.cidr = params.cidr;
                }
                if params.server_endpoint.is_some() {
                    record.server_endpoint = params.server_endpoint.clone();
                }
                if !params.dns.is_empty() {
                    record.dns = params.dns.clone();
                }
                record
            }
            None => {
                let listen_port = match params.listen_port {
                    Some(port) => port,
                    None => self.next_free_port(name)?,
                };
                InterfaceRecord {
                    name: name.to_string(),
                    network_id: params.network_id.clone(),
                    cidr: params.cidr,
                    listen_port,
                    server_endpoint: params.server_endpoint.clone(),
                    dns: params.dns.clone(),
                    peers: BTreeMap::new(),
                }
            }
        };
        Ok(record)
    }

    /// Make sure the network's interface exists and is configured.
    ///
    /// An existing link only gets a consistency check: peers present in the
    /// record but missing on the link are logged, never treated as errors.
    #[instrument(skip(self, params), fields(network = %params.network_id))]
    pub async fn ensure(&self, params: &NetworkParams) -> Result<EnsuredInterface> {
        let name = interface_name(&params.network_id);
        let record = self.build_record(&name, params)?;
        let loaded = self.store.server_keypair(&name, self.keys.as_ref()).await?;
        let keypair = loaded.pair;

        let created = if self.wireguard.interface_exists(&name).await? {
            if loaded.generated {
                // The link still runs the lost key; move it to the stored one.
                warn!(interface = %name, "Server key replaced, reconfiguring running interface");
                let settings = DeviceSettings {
                    private_key: keypair.private.to_base64(),
                    listen_port: record.listen_port,
                };
                self.wireguard.configure_device(&name, &settings).await?;
            }
            self.check_consistency(&record).await;
            false
        } else {
            info!(interface = %name, port = record.listen_port, "Creating interface");
            self.wireguard.create_interface(&name).await?;

            let settings = DeviceSettings {
                private_key: keypair.private.to_base64(),
                listen_port: record.listen_port,
            };
            if let Err(e) = self.bring_up(&record, &settings).await {
                // A half-configured link would pass the next existence check.
                if let Err(cleanup) = self.wireguard.delete_interface(&name).await {
                    warn!(interface = %name, "Failed to delete half-configured interface: {}", cleanup);
                }
                return Err(e);
            }
            true
        };

        self.store.save(&record)?;

        Ok(EnsuredInterface {
            record,
            server_public_key: keypair.public,
            created,
        })
    }

    async fn bring_up(&self, record: &InterfaceRecord, settings: &DeviceSettings) -> Result<()> {
        self.wireguard
            .configure_device(&record.name, settings)
            .await?;
        self.wireguard
            .add_address(&record.name, server_address(record.cidr)?)
            .await?;
        self.wireguard.set_up(&record.name).await?;

        // Restore peers recorded before the link went away.
        for peer in record.peers.values() {
            self.attach(peer).await?;
        }
        if !record.peers.is_empty() {
            info!(interface = %record.name, peers = record.peers.len(), "Restored persisted peers");
        }
        Ok(())
    }

    async fn check_consistency(&self, record: &InterfaceRecord) {
        match self.wireguard.peers(&record.name).await {
            Ok(live) => {
                let live: HashSet<String> = live.into_iter().collect();
                for peer in record.peers.values() {
                    if !live.contains(&peer.public_key) {
                        warn!(
                            interface = %record.name,
                            router = %peer.router_id,
                            "Recorded peer is missing from the interface"
                        );
                    }
                }
                debug!(interface = %record.name, "Interface already present");
            }
            Err(e) => warn!(interface = %record.name, "Consistency check skipped: {}", e),
        }
    }

    /// Attach a peer with its host route as the sole allowed IP
    pub async fn attach(&self, peer: &PeerRecord) -> Result<()> {
        let spec = PeerSpec {
            public_key: peer.public_key.clone(),
            allowed_ips: peer.server_allowed_ips(),
            persistent_keepalive: None,
        };
        self.wireguard.set_peer(&peer.interface, &spec).await
    }

    /// Detach a peer from its interface
    pub async fn detach(&self, peer: &PeerRecord) -> Result<()> {
        self.wireguard
            .remove_peer(&peer.interface, &peer.public_key)
            .await
    }

    /// Bring the network's interface down, delete it and drop its state.
    ///
    /// Returns whether a link was actually deleted.
    #[instrument(skip(self))]
    pub async fn remove(&self, network_id: &str) -> Result<bool> {
        let name = interface_name(network_id);
        let existed = self.wireguard.interface_exists(&name).await?;
        if existed {
            self.wireguard.delete_interface(&name).await?;
            info!(interface = %name, "Interface removed");
        } else {
            debug!(interface = %name, "Interface already absent");
        }
        self.store.delete(&name)?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::system::memory::InMemoryWireGuard;
    use crate::wireguard::keys::{NativeKeyGenerator, PrivateKey};
    use tempfile::TempDir;

    fn params(id: &str, cidr: &str) -> NetworkParams {
        NetworkParams {
            network_id: id.to_string(),
            cidr: cidr.parse().unwrap(),
            listen_port: None,
            server_endpoint: Some("vpn.example.com".to_string()),
            dns: vec![],
        }
    }

    fn manager(dir: &TempDir) -> (InterfaceManager, Arc<InMemoryWireGuard>) {
        let wg = Arc::new(InMemoryWireGuard::new());
        let manager = InterfaceManager::new(
            wg.clone(),
            Arc::new(NativeKeyGenerator),
            StateStore::open(dir.path()).unwrap(),
            51820,
        );
        (manager, wg)
    }

    #[test]
    fn test_interface_name() {
        assert_eq!(interface_name("3f2a-9b1c-4d5e"), "wg-3f2a9b1c");
        assert_eq!(interface_name("abc"), "wg-abc");
    }

    #[tokio::test]
    async fn test_ensure_creates_and_configures() {
        let dir = TempDir::new().unwrap();
        let (manager, wg) = manager(&dir);

        let ensured = manager.ensure(&params("net-1", "10.8.0.0/24")).await.unwrap();
        assert!(ensured.created);

        let iface = wg.interface("wg-net1").unwrap();
        assert!(iface.up);
        assert_eq!(iface.listen_port, Some(51820));
        assert_eq!(iface.addresses[0].to_string(), "10.8.0.1/24");
        assert!(dir.path().join("wg-net1.key").exists());
        assert!(dir.path().join("wg-net1.json").exists());
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (manager, wg) = manager(&dir);

        let first = manager.ensure(&params("net-1", "10.8.0.0/24")).await.unwrap();
        let before = wg.interface("wg-net1").unwrap();
        let second = manager.ensure(&params("net-1", "10.8.0.0/24")).await.unwrap();
        let after = wg.interface("wg-net1").unwrap();

        assert!(!second.created);
        assert_eq!(first.server_public_key, second.server_public_key);
        assert_eq!(first.record, second.record);
        assert_eq!(before.addresses, after.addresses);
        assert_eq!(before.listen_port, after.listen_port);
        assert_eq!(wg.creations(), 1);
    }

    #[tokio::test]
    async fn test_lost_server_key_reconfigures_running_interface() {
        let dir = TempDir::new().unwrap();
        let (manager, wg) = manager(&dir);

        let first = manager.ensure(&params("net-1", "10.8.0.0/24")).await.unwrap();
        std::fs::write(dir.path().join("wg-net1.key"), "garbage").unwrap();

        let second = manager.ensure(&params("net-1", "10.8.0.0/24")).await.unwrap();
        assert!(!second.created);
        assert_ne!(first.server_public_key, second.server_public_key);

        let iface = wg.interface("wg-net1").unwrap();
        let running = PrivateKey::from_base64(iface.private_key.as_deref().unwrap()).unwrap();
        assert_eq!(running.public_key(), second.server_public_key);
        assert_eq!(iface.listen_port, Some(51820));
        assert_eq!(wg.creations(), 1);
    }

    #[tokio::test]
    async fn test_listen_ports_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let (manager, _wg) = manager(&dir);

        let a = manager.ensure(&params("net-1", "10.8.0.0/24")).await.unwrap();
        let b = manager.ensure(&params("net-2", "10.9.0.0/24")).await.unwrap();
        assert_eq!(a.record.listen_port, 51820);
        assert_eq!(b.record.listen_port, 51821);

        let mut with_port = params("net-3", "10.10.0.0/24");
        with_port.listen_port = Some(52000);
        let c = manager.ensure(&with_port).await.unwrap();
        assert_eq!(c.record.listen_port, 52000);
    }

    #[tokio::test]
    async fn test_failed_bring_up_deletes_link() {
        let dir = TempDir::new().unwrap();
        let (manager, wg) = manager(&dir);
        wg.fail_operation("set_up");

        let err = manager
            .ensure(&params("net-1", "10.8.0.0/24"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InterfaceCommandFailed);
        assert!(wg.interface("wg-net1").is_none());

        wg.clear_failures();
        assert!(manager.ensure(&params("net-1", "10.8.0.0/24")).await.unwrap().created);
    }

    #[tokio::test]
    async fn test_remove_absent_interface_succeeds() {
        let dir = TempDir::new().unwrap();
        let (manager, _wg) = manager(&dir);
        assert!(!manager.remove("net-404").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_deletes_link_and_state() {
        let dir = TempDir::new().unwrap();
        let (manager, wg) = manager(&dir);

        manager.ensure(&params("net-1", "10.8.0.0/24")).await.unwrap();
        assert!(manager.remove("net-1").await.unwrap());
        assert!(wg.interface("wg-net1").is_none());
        assert!(!dir.path().join("wg-net1.json").exists());
        assert!(!manager.remove("net-1").await.unwrap());
    }
}
