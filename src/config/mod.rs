//! Configuration management
//!
//! This module handles parsing and validation of the service configuration
//! from a TOML file, with a small set of environment overrides applied on
//! top for container deployments.

mod validation;

pub use validation::{
    parse_cidr, validate_directory_url, validate_instance_id, validate_interface_name,
    validate_listen_port, validate_resource_id,
};

use crate::error::{ProvisionError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable overriding `instance_id`
pub const ENV_INSTANCE_ID: &str = "WGP_INSTANCE_ID";
/// Environment variable overriding `directory.url`
pub const ENV_DIRECTORY_URL: &str = "WGP_DIRECTORY_URL";
/// Environment variable overriding `sync.interval_secs`
pub const ENV_SYNC_INTERVAL: &str = "WGP_SYNC_INTERVAL_SECS";
/// Environment variable overriding `wireguard.state_dir`
pub const ENV_STATE_DIR: &str = "WGP_STATE_DIR";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity of this instance in the directory service
    #[serde(default)]
    pub instance_id: String,

    /// Which system capability implementation to drive
    #[serde(default)]
    pub backend: Backend,

    /// Directory service settings
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Resource synchronization settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// WireGuard interface and peer settings
    #[serde(default)]
    pub wireguard: WireGuardConfig,

    /// Host firewall settings
    #[serde(default)]
    pub firewall: FirewallConfig,

    /// Local control socket
    #[serde(default)]
    pub control: ControlConfig,

    /// Health/metrics HTTP endpoint
    #[serde(default)]
    pub http: HttpConfig,
}

/// System capability backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Drive `ip`, `wg` and `iptables` on the host
    #[default]
    System,
    /// Keep interfaces and rules in memory (dry run)
    Memory,
}

/// Directory service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL of the directory API
    #[serde(default = "default_directory_url")]
    pub url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_directory_timeout")]
    pub timeout_secs: u64,
}

/// Synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between synchronization cycles in seconds
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
}

/// How peer private keys are handled after provisioning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrivateKeyPolicy {
    /// Private key is revealed once in the provisioning response
    #[default]
    OneTime,
    /// Private key is stored with the interface record so the config can be re-issued
    Retain,
}

/// Key generation implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyBackend {
    /// In-process x25519
    #[default]
    Native,
    /// `wg genkey` / `wg pubkey`
    WgTool,
}

/// WireGuard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireGuardConfig {
    /// Directory holding server keypairs and interface records
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// First listen port handed out to interfaces
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Leading host addresses of each network reserved for the server
    #[serde(default = "default_reserved_addresses")]
    pub reserved_addresses: u32,

    /// Persistent keepalive written into peer configs (0 disables)
    #[serde(default = "default_keepalive")]
    pub persistent_keepalive_secs: u16,

    /// DNS servers written into peer configs
    #[serde(default)]
    pub dns: Vec<String>,

    /// Key generation implementation
    #[serde(default)]
    pub key_backend: KeyBackend,

    /// Private key retention policy
    #[serde(default)]
    pub private_key_policy: PrivateKeyPolicy,

    /// Remove an interface when its last peer is removed
    #[serde(default)]
    pub teardown_when_empty: bool,

    /// Deadline for a single external command in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

/// Firewall settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// Apply firewall rules at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Uplink interface for source NAT of tunnel traffic
    #[serde(default)]
    pub masquerade_interface: Option<String>,
}

/// Control socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Unix socket path
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Time allowed for in-flight requests to finish on shutdown, in seconds
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

/// HTTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind address for `/healthz` and `/metrics`
    #[serde(default = "default_http_bind")]
    pub bind: String,
}

impl Config {
    /// Load configuration from a TOML file and apply environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            ProvisionError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml)
            .map_err(|e| ProvisionError::Config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Overlay `WGP_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(id) = std::env::var(ENV_INSTANCE_ID) {
            debug!("Overriding instance_id from {}", ENV_INSTANCE_ID);
            self.instance_id = id;
        }
        if let Ok(url) = std::env::var(ENV_DIRECTORY_URL) {
            debug!("Overriding directory.url from {}", ENV_DIRECTORY_URL);
            self.directory.url = url;
        }
        if let Ok(secs) = std::env::var(ENV_SYNC_INTERVAL) {
            self.sync.interval_secs = secs.trim().parse().map_err(|_| {
                ProvisionError::Config(format!("{} must be an integer, got '{}'", ENV_SYNC_INTERVAL, secs))
            })?;
        }
        if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
            self.wireguard.state_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        validate_instance_id(&self.instance_id)?;
        validate_directory_url(&self.directory.url)?;
        validate_listen_port(self.wireguard.listen_port)?;

        if self.sync.interval_secs == 0 {
            return Err(ProvisionError::Config(
                "sync.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.wireguard.command_timeout_secs == 0 {
            return Err(ProvisionError::Config(
                "wireguard.command_timeout_secs must be greater than zero".to_string(),
            ));
        }
        for dns in &self.wireguard.dns {
            dns.parse::<std::net::IpAddr>().map_err(|_| {
                ProvisionError::Config(format!("Invalid DNS server address: {}", dns))
            })?;
        }
        if let Some(uplink) = &self.firewall.masquerade_interface {
            validate_interface_name(uplink)?;
        }
        if self.backend == Backend::Memory {
            warn!("Memory backend selected: no host interfaces or firewall rules will be touched");
        }
        Ok(())
    }

    /// Synchronization interval as a duration
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    /// External command deadline as a duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.wireguard.command_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_id: String::new(),
            backend: Backend::default(),
            directory: DirectoryConfig::default(),
            sync: SyncConfig::default(),
            wireguard: WireGuardConfig::default(),
            firewall: FirewallConfig::default(),
            control: ControlConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: default_directory_url(),
            timeout_secs: default_directory_timeout(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval(),
        }
    }
}

impl Default for WireGuardConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            listen_port: default_listen_port(),
            reserved_addresses: default_reserved_addresses(),
            persistent_keepalive_secs: default_keepalive(),
            dns: Vec::new(),
            key_backend: KeyBackend::default(),
            private_key_policy: PrivateKeyPolicy::default(),
            teardown_when_empty: false,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            masquerade_interface: None,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
        }
    }
}

// Default value functions for serde
fn default_directory_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_directory_timeout() -> u64 {
    30
}

fn default_sync_interval() -> u64 {
    60
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/etc/wireguard/wg-provisioner")
}

fn default_listen_port() -> u16 {
    51820
}

fn default_reserved_addresses() -> u32 {
    1
}

fn default_keepalive() -> u16 {
    25
}

fn default_command_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(crate::control::DEFAULT_SOCKET_PATH)
}

fn default_drain_timeout() -> u64 {
    30
}

fn default_http_bind() -> String {
    "127.0.0.1:9090".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SAMPLE: &str = r#"
instance_id = "vpn-eu-1"
backend = "memory"

[directory]
url = "https://directory.example.com"

[sync]
interval_secs = 15

[wireguard]
state_dir = "/tmp/wgp"
listen_port = 51900
private_key_policy = "retain"
teardown_when_empty = true
dns = ["1.1.1.1"]

[firewall]
masquerade_interface = "eth0"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.instance_id, "vpn-eu-1");
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.sync.interval_secs, 15);
        assert_eq!(config.wireguard.listen_port, 51900);
        assert_eq!(config.wireguard.private_key_policy, PrivateKeyPolicy::Retain);
        assert!(config.wireguard.teardown_when_empty);
        assert_eq!(config.firewall.masquerade_interface.as_deref(), Some("eth0"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse("instance_id = \"a\"").unwrap();
        assert_eq!(config.backend, Backend::System);
        assert_eq!(config.wireguard.reserved_addresses, 1);
        assert_eq!(config.wireguard.persistent_keepalive_secs, 25);
        assert_eq!(config.wireguard.private_key_policy, PrivateKeyPolicy::OneTime);
        assert_eq!(config.wireguard.key_backend, KeyBackend::Native);
        assert!(!config.wireguard.teardown_when_empty);
        assert!(config.firewall.enabled);
        assert_eq!(config.sync_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_missing_instance_id_is_invalid() {
        let config = Config::parse("").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_dns_rejected() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.wireguard.dns = vec!["not-an-ip".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(ENV_INSTANCE_ID, "from-env");
        std::env::set_var(ENV_SYNC_INTERVAL, "5");
        let mut config = Config::parse(SAMPLE).unwrap();
        let result = config.apply_env_overrides();
        std::env::remove_var(ENV_INSTANCE_ID);
        std::env::remove_var(ENV_SYNC_INTERVAL);

        result.unwrap();
        assert_eq!(config.instance_id, "from-env");
        assert_eq!(config.sync.interval_secs, 5);
    }

    #[test]
    #[serial]
    fn test_env_override_rejects_bad_interval() {
        std::env::set_var(ENV_SYNC_INTERVAL, "soon");
        let mut config = Config::parse(SAMPLE).unwrap();
        let result = config.apply_env_overrides();
        std::env::remove_var(ENV_SYNC_INTERVAL);
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.directory.url, "https://directory.example.com");
    }
}
