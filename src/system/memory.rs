//! In-process system capabilities
//!
//! Keep interface, peer and firewall state in memory. Used by the `memory`
//! backend and by tests, which can inject failures per operation.

use super::{parse_rule_line, DeviceSettings, FirewallControl, PeerSpec, WireGuardControl};
use crate::error::{ProvisionError, Result};
use crate::wireguard::keys::PrivateKey;
use async_trait::async_trait;
use ipnet::Ipv4Net;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Mutex;

/// Runtime counters a test can attach to a peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    /// Unix seconds of the last handshake, 0 for never
    pub latest_handshake: u64,
    /// Bytes received
    pub rx_bytes: u64,
    /// Bytes sent
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
struct MemoryPeer {
    spec: PeerSpec,
    stats: PeerStats,
}

/// State of one in-memory interface
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryInterface {
    /// Base64 private key, once configured
    pub private_key: Option<String>,
    /// Listen port, once configured
    pub listen_port: Option<u16>,
    /// Assigned addresses
    pub addresses: Vec<Ipv4Net>,
    /// Whether the link is up
    pub up: bool,
    peers: BTreeMap<String, MemoryPeer>,
}

impl MemoryInterface {
    /// Configured peers keyed by public key
    pub fn peers(&self) -> BTreeMap<String, PeerSpec> {
        self.peers
            .iter()
            .map(|(k, p)| (k.clone(), p.spec.clone()))
            .collect()
    }
}

/// WireGuard control plane held in memory
#[derive(Debug, Default)]
pub struct InMemoryWireGuard {
    interfaces: Mutex<BTreeMap<String, MemoryInterface>>,
    failures: Mutex<HashSet<String>>,
    creations: Mutex<u64>,
}

impl InMemoryWireGuard {
    /// Create an empty control plane
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `operation` (method name) fail
    pub fn fail_operation(&self, operation: &str) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(operation.to_string());
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Snapshot of one interface
    pub fn interface(&self, name: &str) -> Option<MemoryInterface> {
        self.interfaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Names of existing interfaces
    pub fn interface_names(&self) -> Vec<String> {
        self.interfaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Number of interfaces ever created
    pub fn creations(&self) -> u64 {
        *self.creations.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach runtime counters to a peer
    pub fn set_peer_stats(&self, name: &str, public_key: &str, stats: PeerStats) {
        let mut interfaces = self.interfaces.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(peer) = interfaces
            .get_mut(name)
            .and_then(|iface| iface.peers.get_mut(public_key))
        {
            peer.stats = stats;
        }
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(operation)
        {
            return Err(ProvisionError::InterfaceCommandFailed(format!(
                "injected failure in {}",
                operation
            )));
        }
        Ok(())
    }

    fn with_interface<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut MemoryInterface) -> T,
    ) -> Result<T> {
        let mut interfaces = self.interfaces.lock().unwrap_or_else(|e| e.into_inner());
        let iface = interfaces.get_mut(name).ok_or_else(|| {
            ProvisionError::InterfaceCommandFailed(format!("Cannot find device \"{}\"", name))
        })?;
        Ok(f(iface))
    }
}

#[async_trait]
impl WireGuardControl for InMemoryWireGuard {
    async fn interface_exists(&self, name: &str) -> Result<bool> {
        self.check("interface_exists")?;
        Ok(self
            .interfaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name))
    }

    async fn create_interface(&self, name: &str) -> Result<()> {
        self.check("create_interface")?;
        let mut interfaces = self.interfaces.lock().unwrap_or_else(|e| e.into_inner());
        if interfaces.contains_key(name) {
            return Err(ProvisionError::InterfaceCommandFailed(format!(
                "RTNETLINK answers: File exists ({})",
                name
            )));
        }
        interfaces.insert(name.to_string(), MemoryInterface::default());
        *self.creations.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    async fn configure_device(&self, name: &str, settings: &DeviceSettings) -> Result<()> {
        self.check("configure_device")?;
        self.with_interface(name, |iface| {
            iface.private_key = Some(settings.private_key.clone());
            iface.listen_port = Some(settings.listen_port);
        })
    }

    async fn add_address(&self, name: &str, address: Ipv4Net) -> Result<()> {
        self.check("add_address")?;
        self.with_interface(name, |iface| {
            if !iface.addresses.contains(&address) {
                iface.addresses.push(address);
            }
        })
    }

    async fn set_up(&self, name: &str) -> Result<()> {
        self.check("set_up")?;
        self.with_interface(name, |iface| iface.up = true)
    }

    async fn delete_interface(&self, name: &str) -> Result<()> {
        self.check("delete_interface")?;
        self.interfaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| {
                ProvisionError::InterfaceCommandFailed(format!("Cannot find device \"{}\"", name))
            })
    }

    async fn set_peer(&self, name: &str, peer: &PeerSpec) -> Result<()> {
        self.check("set_peer")?;
        self.with_interface(name, |iface| {
            // An allowed IP belongs to one peer; claiming it moves it.
            for (key, other) in iface.peers.iter_mut() {
                if key != &peer.public_key {
                    other
                        .spec
                        .allowed_ips
                        .retain(|ip| !peer.allowed_ips.contains(ip));
                }
            }
            let stats = iface
                .peers
                .get(&peer.public_key)
                .map(|p| p.stats)
                .unwrap_or_default();
            iface.peers.insert(
                peer.public_key.clone(),
                MemoryPeer {
                    spec: peer.clone(),
                    stats,
                },
            );
        })
    }

    async fn remove_peer(&self, name: &str, public_key: &str) -> Result<()> {
        self.check("remove_peer")?;
        self.with_interface(name, |iface| {
            iface.peers.remove(public_key);
        })
    }

    async fn peers(&self, name: &str) -> Result<Vec<String>> {
        self.check("peers")?;
        self.with_interface(name, |iface| iface.peers.keys().cloned().collect())
    }

    async fn dump(&self) -> Result<String> {
        self.check("dump")?;
        let interfaces = self.interfaces.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = String::new();
        for (name, iface) in interfaces.iter() {
            let private = iface.private_key.as_deref().unwrap_or("(none)");
            let public = iface
                .private_key
                .as_deref()
                .and_then(|k| PrivateKey::from_base64(k).ok())
                .map(|k| k.public_key().to_base64())
                .unwrap_or_else(|| "(none)".to_string());
            let port = iface.listen_port.unwrap_or(0);
            let _ = writeln!(out, "{}\t{}\t{}\t{}\toff", name, private, public, port);

            for (key, peer) in &iface.peers {
                let allowed = if peer.spec.allowed_ips.is_empty() {
                    "(none)".to_string()
                } else {
                    peer.spec.allowed_ips.join(",")
                };
                let keepalive = peer
                    .spec
                    .persistent_keepalive
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "off".to_string());
                let _ = writeln!(
                    out,
                    "{}\t{}\t(none)\t(none)\t{}\t{}\t{}\t{}\t{}",
                    name,
                    key,
                    allowed,
                    peer.stats.latest_handshake,
                    peer.stats.rx_bytes,
                    peer.stats.tx_bytes,
                    keepalive
                );
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredRule {
    table: String,
    chain: String,
    args: Vec<String>,
}

/// Firewall tables held in memory
#[derive(Debug, Default)]
pub struct InMemoryFirewall {
    rules: Mutex<Vec<StoredRule>>,
    failing: Mutex<bool>,
    mutations: Mutex<u64>,
}

impl InMemoryFirewall {
    /// Create an empty firewall
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every append and delete fail
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(|e| e.into_inner()) = failing;
    }

    /// Total rule count across all tables
    pub fn rule_count(&self) -> usize {
        self.rules.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Rules whose arguments mention `needle`, as `table chain args` lines
    pub fn rules_matching(&self, needle: &str) -> Vec<String> {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.args.iter().any(|a| a.contains(needle)))
            .map(|r| format!("{} {} {}", r.table, r.chain, r.args.join(" ")))
            .collect()
    }

    /// Number of appends and deletes performed
    pub fn mutations(&self) -> u64 {
        *self.mutations.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a rule directly, bypassing failure injection
    pub fn seed_rule(&self, table: &str, line: &str) {
        if let Some((chain, args)) = parse_rule_line(line) {
            self.rules
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(StoredRule {
                    table: table.to_string(),
                    chain,
                    args,
                });
        }
    }

    fn check(&self) -> Result<()> {
        if *self.failing.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(ProvisionError::FirewallCommandFailed(
                "injected firewall failure".to_string(),
            ));
        }
        *self.mutations.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

#[async_trait]
impl FirewallControl for InMemoryFirewall {
    async fn list_rules(&self, table: &str, chain: &str) -> Result<Vec<String>> {
        Ok(self
            .rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.table == table && r.chain == chain)
            .map(|r| format!("-A {} {}", r.chain, r.args.join(" ")))
            .collect())
    }

    async fn append_rule(&self, table: &str, chain: &str, args: &[String]) -> Result<()> {
        self.check()?;
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(StoredRule {
                table: table.to_string(),
                chain: chain.to_string(),
                args: args.to_vec(),
            });
        Ok(())
    }

    async fn delete_rule(&self, table: &str, chain: &str, args: &[String]) -> Result<()> {
        self.check()?;
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let position = rules
            .iter()
            .position(|r| r.table == table && r.chain == chain && r.args == args)
            .ok_or_else(|| {
                ProvisionError::FirewallCommandFailed(
                    "Bad rule (does a matching rule exist in that chain?)".to_string(),
                )
            })?;
        rules.remove(position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interface_lifecycle() {
        let wg = InMemoryWireGuard::new();
        assert!(!wg.interface_exists("wg-test").await.unwrap());

        wg.create_interface("wg-test").await.unwrap();
        assert!(wg.create_interface("wg-test").await.is_err());
        wg.set_up("wg-test").await.unwrap();
        assert!(wg.interface("wg-test").unwrap().up);

        wg.delete_interface("wg-test").await.unwrap();
        assert!(!wg.interface_exists("wg-test").await.unwrap());
        assert_eq!(wg.creations(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let wg = InMemoryWireGuard::new();
        wg.fail_operation("create_interface");
        assert!(matches!(
            wg.create_interface("wg-test").await,
            Err(ProvisionError::InterfaceCommandFailed(_))
        ));
        wg.clear_failures();
        wg.create_interface("wg-test").await.unwrap();
    }

    #[tokio::test]
    async fn test_firewall_list_append_delete() {
        let fw = InMemoryFirewall::new();
        let args: Vec<String> = ["-i", "wg-a", "-j", "ACCEPT"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        fw.append_rule("filter", "INPUT", &args).await.unwrap();
        let listed = fw.list_rules("filter", "INPUT").await.unwrap();
        assert_eq!(listed, vec!["-A INPUT -i wg-a -j ACCEPT".to_string()]);

        fw.delete_rule("filter", "INPUT", &args).await.unwrap();
        assert_eq!(fw.rule_count(), 0);
        assert!(fw.delete_rule("filter", "INPUT", &args).await.is_err());
    }
}
