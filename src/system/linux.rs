//! Linux implementations backed by `ip`, `wg` and `iptables`

use super::{
    CommandRunner, DeviceSettings, Facility, FirewallControl, KeyGenerator, PeerSpec,
    WireGuardControl,
};
use crate::error::{ProvisionError, Result};
use crate::wireguard::keys::{KeyPair, PrivateKey};
use async_trait::async_trait;
use ipnet::Ipv4Net;
use tracing::{debug, info};

/// Kernel WireGuard driven through `ip` and `wg`
#[derive(Debug, Clone)]
pub struct LinuxWireGuard {
    runner: CommandRunner,
}

impl LinuxWireGuard {
    /// Create a controller using `runner` for every command
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    async fn ip(&self, args: &[&str]) -> Result<String> {
        self.runner.run(Facility::Interface, "ip", args, None).await
    }

    async fn wg(&self, args: &[&str], input: Option<&str>) -> Result<String> {
        self.runner.run(Facility::Interface, "wg", args, input).await
    }
}

#[async_trait]
impl WireGuardControl for LinuxWireGuard {
    async fn interface_exists(&self, name: &str) -> Result<bool> {
        match self.ip(&["link", "show", "dev", name]).await {
            Ok(_) => Ok(true),
            Err(ProvisionError::InterfaceCommandFailed(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_interface(&self, name: &str) -> Result<()> {
        info!("Creating WireGuard interface {}", name);
        self.ip(&["link", "add", "dev", name, "type", "wireguard"])
            .await?;
        Ok(())
    }

    async fn configure_device(&self, name: &str, settings: &DeviceSettings) -> Result<()> {
        let port = settings.listen_port.to_string();
        // Key goes through stdin so it never shows up in the process list.
        self.wg(
            &["set", name, "listen-port", &port, "private-key", "/dev/stdin"],
            Some(&format!("{}\n", settings.private_key)),
        )
        .await?;
        Ok(())
    }

    async fn add_address(&self, name: &str, address: Ipv4Net) -> Result<()> {
        let address = address.to_string();
        self.ip(&["address", "replace", &address, "dev", name]).await?;
        Ok(())
    }

    async fn set_up(&self, name: &str) -> Result<()> {
        self.ip(&["link", "set", "up", "dev", name]).await?;
        Ok(())
    }

    async fn delete_interface(&self, name: &str) -> Result<()> {
        info!("Deleting WireGuard interface {}", name);
        self.ip(&["link", "set", "down", "dev", name]).await?;
        self.ip(&["link", "delete", "dev", name]).await?;
        Ok(())
    }

    async fn set_peer(&self, name: &str, peer: &PeerSpec) -> Result<()> {
        let allowed = peer.allowed_ips.join(",");
        let keepalive = peer
            .persistent_keepalive
            .map(|k| k.to_string())
            .unwrap_or_else(|| "off".to_string());
        self.wg(
            &[
                "set",
                name,
                "peer",
                &peer.public_key,
                "allowed-ips",
                &allowed,
                "persistent-keepalive",
                &keepalive,
            ],
            None,
        )
        .await?;
        Ok(())
    }

    async fn remove_peer(&self, name: &str, public_key: &str) -> Result<()> {
        self.wg(&["set", name, "peer", public_key, "remove"], None)
            .await?;
        Ok(())
    }

    async fn peers(&self, name: &str) -> Result<Vec<String>> {
        let out = self.wg(&["show", name, "peers"], None).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn dump(&self) -> Result<String> {
        self.wg(&["show", "all", "dump"], None).await
    }
}

/// Host firewall driven through `iptables`
#[derive(Debug, Clone)]
pub struct IptablesFirewall {
    runner: CommandRunner,
}

impl IptablesFirewall {
    /// Create a firewall controller using `runner` for every command
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    async fn iptables(&self, args: &[&str]) -> Result<String> {
        self.runner
            .run(Facility::Firewall, "iptables", args, None)
            .await
    }
}

#[async_trait]
impl FirewallControl for IptablesFirewall {
    async fn list_rules(&self, table: &str, chain: &str) -> Result<Vec<String>> {
        let out = self.iptables(&["-w", "-t", table, "-S", chain]).await?;
        Ok(out.lines().map(String::from).collect())
    }

    async fn append_rule(&self, table: &str, chain: &str, args: &[String]) -> Result<()> {
        let mut argv = vec!["-w", "-t", table, "-A", chain];
        argv.extend(args.iter().map(String::as_str));
        debug!(table, chain, "Appending firewall rule");
        self.iptables(&argv).await?;
        Ok(())
    }

    async fn delete_rule(&self, table: &str, chain: &str, args: &[String]) -> Result<()> {
        let mut argv = vec!["-w", "-t", table, "-D", chain];
        argv.extend(args.iter().map(String::as_str));
        debug!(table, chain, "Deleting firewall rule");
        self.iptables(&argv).await?;
        Ok(())
    }
}

/// Key generation through `wg genkey` and `wg pubkey`
#[derive(Debug, Clone)]
pub struct WgToolKeyGenerator {
    runner: CommandRunner,
}

impl WgToolKeyGenerator {
    /// Create a generator using `runner` for every command
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl KeyGenerator for WgToolKeyGenerator {
    async fn generate(&self) -> Result<KeyPair> {
        let private = self
            .runner
            .run(Facility::Keys, "wg", &["genkey"], None)
            .await?;
        let private = private.trim();
        let public = self
            .runner
            .run(Facility::Keys, "wg", &["pubkey"], Some(&format!("{}\n", private)))
            .await?;

        let private = PrivateKey::from_base64(private)
            .map_err(|e| ProvisionError::KeyGenerationFailed(e.to_string()))?;
        let pair = KeyPair::from_private(private);
        if pair.public.to_base64() != public.trim() {
            return Err(ProvisionError::KeyGenerationFailed(
                "wg pubkey output does not match derived public key".to_string(),
            ));
        }
        Ok(pair)
    }
}
