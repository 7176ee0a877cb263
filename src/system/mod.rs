//! System capabilities
//!
//! Narrow typed interfaces over the host facilities the service drives:
//! the WireGuard control plane, the host firewall and key generation.
//! `linux` shells out to `ip`, `wg` and `iptables`; `memory` keeps the same
//! state in process for the `memory` backend and for tests.

mod command;
pub mod linux;
pub mod memory;

pub use command::{CommandRunner, Facility};

use crate::config::KeyBackend;
use crate::error::Result;
use crate::wireguard::keys::{KeyPair, NativeKeyGenerator};
use async_trait::async_trait;
use ipnet::Ipv4Net;
use std::sync::Arc;
use std::time::Duration;

/// Device-level settings applied when an interface is created
#[derive(Clone)]
pub struct DeviceSettings {
    /// Base64 server private key
    pub private_key: String,
    /// UDP listen port
    pub listen_port: u16,
}

impl std::fmt::Debug for DeviceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSettings")
            .field("private_key", &"[REDACTED]")
            .field("listen_port", &self.listen_port)
            .finish()
    }
}

/// Peer as seen from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    /// Base64 peer public key
    pub public_key: String,
    /// Allowed IPs in CIDR notation
    pub allowed_ips: Vec<String>,
    /// Keepalive interval, if any
    pub persistent_keepalive: Option<u16>,
}

/// WireGuard control interface
#[async_trait]
pub trait WireGuardControl: Send + Sync {
    /// Whether a link with this name exists
    async fn interface_exists(&self, name: &str) -> Result<bool>;

    /// Create a WireGuard link
    async fn create_interface(&self, name: &str) -> Result<()>;

    /// Set private key and listen port
    async fn configure_device(&self, name: &str, settings: &DeviceSettings) -> Result<()>;

    /// Assign an address with its network prefix
    async fn add_address(&self, name: &str, address: Ipv4Net) -> Result<()>;

    /// Bring the link up
    async fn set_up(&self, name: &str) -> Result<()>;

    /// Bring the link down and delete it
    async fn delete_interface(&self, name: &str) -> Result<()>;

    /// Add or replace a peer
    async fn set_peer(&self, name: &str, peer: &PeerSpec) -> Result<()>;

    /// Remove a peer; removing an unknown peer succeeds
    async fn remove_peer(&self, name: &str, public_key: &str) -> Result<()>;

    /// Public keys of the peers configured on the link
    async fn peers(&self, name: &str) -> Result<Vec<String>>;

    /// Runtime state of every interface in `wg show all dump` format
    async fn dump(&self) -> Result<String>;
}

/// Host firewall control interface.
///
/// Rules are addressed by table, chain and the rule arguments that follow
/// `-A <chain>`.
#[async_trait]
pub trait FirewallControl: Send + Sync {
    /// Rules of a chain, one `-A <chain> <args>` line each
    async fn list_rules(&self, table: &str, chain: &str) -> Result<Vec<String>>;

    /// Append a rule to a chain
    async fn append_rule(&self, table: &str, chain: &str, args: &[String]) -> Result<()>;

    /// Delete a rule from a chain
    async fn delete_rule(&self, table: &str, chain: &str, args: &[String]) -> Result<()>;
}

/// Key generation facility
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Generate a fresh keypair
    async fn generate(&self) -> Result<KeyPair>;
}

/// The set of capabilities a provisioner runs against
#[derive(Clone)]
pub struct Capabilities {
    /// WireGuard control plane
    pub wireguard: Arc<dyn WireGuardControl>,
    /// Host firewall
    pub firewall: Arc<dyn FirewallControl>,
    /// Key generation
    pub keys: Arc<dyn KeyGenerator>,
}

impl Capabilities {
    /// Host tools with a per-command timeout
    pub fn linux(command_timeout: Duration, key_backend: KeyBackend) -> Self {
        let runner = CommandRunner::new(command_timeout);
        let keys: Arc<dyn KeyGenerator> = match key_backend {
            KeyBackend::Native => Arc::new(NativeKeyGenerator),
            KeyBackend::WgTool => Arc::new(linux::WgToolKeyGenerator::new(runner.clone())),
        };
        Self {
            wireguard: Arc::new(linux::LinuxWireGuard::new(runner.clone())),
            firewall: Arc::new(linux::IptablesFirewall::new(runner)),
            keys,
        }
    }

    /// Fresh in-memory state
    pub fn memory() -> Self {
        Self {
            wireguard: Arc::new(memory::InMemoryWireGuard::new()),
            firewall: Arc::new(memory::InMemoryFirewall::new()),
            keys: Arc::new(NativeKeyGenerator),
        }
    }
}

/// Split a listed rule line into chain and arguments.
///
/// Double quotes around a token are removed; tokens never contain spaces
/// for the rules this service writes.
pub fn parse_rule_line(line: &str) -> Option<(String, Vec<String>)> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "-A" {
        return None;
    }
    let chain = tokens.next()?.to_string();
    let args = tokens.map(|t| t.trim_matches('"').to_string()).collect();
    Some((chain, args))
}
