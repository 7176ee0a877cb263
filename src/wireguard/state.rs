//! Persisted interface state
//!
//! Everything the service must remember across restarts lives under the
//! state directory:
//!
//! - `<iface>.key` / `<iface>.pub`: server keypair (private key mode 0600)
//! - `<iface>.json`: interface record with its attached peers (mode 0600)

use super::keys::{KeyPair, PrivateKey, PublicKey};
use crate::error::{ProvisionError, Result};
use crate::system::KeyGenerator;
use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::net::Ipv4Addr;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Server keypair as loaded from the state directory
#[derive(Debug, Clone)]
pub struct ServerKeypair {
    /// The keypair
    pub pair: KeyPair,
    /// Whether the stored pair was missing or unreadable and got replaced
    pub generated: bool,
}

/// Peer attached to an interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Router this peer belongs to
    pub router_id: String,

    /// Router display name
    #[serde(default)]
    pub router_name: Option<String>,

    /// Base64 public key
    pub public_key: String,

    /// Allocated tunnel address
    pub address: Ipv4Addr,

    /// Networks behind the router, in CIDR notation
    #[serde(default)]
    pub allowed_networks: BTreeSet<String>,

    /// Interface the peer is attached to
    pub interface: String,

    /// Base64 private key, kept only under the `retain` key policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    /// Provisioning time
    pub created_at: DateTime<Utc>,
}

impl PeerRecord {
    /// Allowed IPs from the server's point of view: the peer's host route
    pub fn server_allowed_ips(&self) -> Vec<String> {
        vec![format!("{}/32", self.address)]
    }
}

/// Local interface terminating one network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    /// Interface name
    pub name: String,

    /// Network id
    pub network_id: String,

    /// Network CIDR
    pub cidr: Ipv4Net,

    /// UDP listen port
    pub listen_port: u16,

    /// Public host peers connect to
    #[serde(default)]
    pub server_endpoint: Option<String>,

    /// DNS servers pushed to peers
    #[serde(default)]
    pub dns: Vec<String>,

    /// Attached peers keyed by router id
    #[serde(default)]
    pub peers: BTreeMap<String, PeerRecord>,
}

impl InterfaceRecord {
    /// Server address: first usable host, with the network prefix
    pub fn server_address(&self) -> Result<Ipv4Net> {
        server_address(self.cidr)
    }

    /// Addresses held by attached peers
    pub fn peer_addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.peers.values().map(|p| p.address)
    }

    /// Union of every attached peer's allowed networks
    pub fn allowed_networks(&self) -> BTreeSet<String> {
        self.peers
            .values()
            .flat_map(|p| p.allowed_networks.iter().cloned())
            .collect()
    }
}

/// First usable host of `cidr`, carrying the network prefix
pub fn server_address(cidr: Ipv4Net) -> Result<Ipv4Net> {
    let host = cidr.hosts().next().ok_or_else(|| {
        ProvisionError::Validation(format!("{} has no usable host address", cidr))
    })?;
    Ipv4Net::new(host, cidr.prefix_len())
        .map_err(|e| ProvisionError::Validation(format!("Invalid prefix for {}: {}", cidr, e)))
}

/// File-backed store for interface records and server keypairs
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open the store, creating the directory (mode 0700) if needed.
    ///
    /// Fails when the directory cannot be created or written to.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&dir)
                .map_err(|e| {
                    ProvisionError::Config(format!(
                        "Cannot create state directory {:?}: {}",
                        dir, e
                    ))
                })?;
            info!("Created state directory {:?}", dir);
        }

        let probe = dir.join(".write-test");
        fs::write(&probe, b"")
            .and_then(|_| fs::remove_file(&probe))
            .map_err(|e| {
                ProvisionError::Config(format!("State directory {:?} is not writable: {}", dir, e))
            })?;

        Ok(Self { dir })
    }

    /// State directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Path of an interface's private key
    pub fn private_key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.key", name))
    }

    /// Path of an interface's public key
    pub fn public_key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.pub", name))
    }

    /// Load an interface record, `None` if it was never written
    pub fn load(&self, name: &str) -> Result<Option<InterfaceRecord>> {
        let path = self.record_path(name);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Load every record in the directory; unreadable records are skipped
    pub fn load_all(&self) -> Result<Vec<InterfaceRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(ProvisionError::from)
                .and_then(|c| serde_json::from_str::<InterfaceRecord>(&c).map_err(Into::into))
            {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable interface record {:?}: {}", path, e),
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Write a record atomically (temp file + rename), mode 0600
    pub fn save(&self, record: &InterfaceRecord) -> Result<()> {
        let path = self.record_path(&record.name);
        let tmp = self.dir.join(format!(".{}.json.tmp", record.name));
        let body = serde_json::to_vec_pretty(record)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)?;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        file.write_all(&body)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        debug!(interface = %record.name, peers = record.peers.len(), "Saved interface record");
        Ok(())
    }

    /// Delete a record and its keypair; absent files are ignored
    pub fn delete(&self, name: &str) -> Result<()> {
        for path in [
            self.record_path(name),
            self.private_key_path(name),
            self.public_key_path(name),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Stored server public key of an interface
    pub fn server_public_key(&self, name: &str) -> Result<PublicKey> {
        let path = self.public_key_path(name);
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ProvisionError::NotFound(format!("server public key for {}", name))
            }
            _ => e.into(),
        })?;
        PublicKey::from_base64(content.trim())
    }

    /// Load the interface's server keypair, generating and persisting a new
    /// one when it is missing or unreadable
    pub async fn server_keypair(
        &self,
        name: &str,
        generator: &dyn KeyGenerator,
    ) -> Result<ServerKeypair> {
        let private_path = self.private_key_path(name);
        let public_path = self.public_key_path(name);

        if private_path.exists() {
            match PrivateKey::from_file(&private_path) {
                Ok(private) => {
                    let pair = KeyPair::from_private(private);
                    let stored_public = fs::read_to_string(&public_path).unwrap_or_default();
                    if stored_public.trim() != pair.public.to_base64() {
                        fs::write(&public_path, format!("{}\n", pair.public))?;
                    }
                    return Ok(ServerKeypair {
                        pair,
                        generated: false,
                    });
                }
                Err(e) => warn!(
                    "Server key for {} is unreadable, generating a new one: {}",
                    name, e
                ),
            }
        }

        let pair = generator.generate().await?;
        pair.private.save_to_file(&private_path)?;
        fs::write(&public_path, format!("{}\n", pair.public))?;
        info!(interface = name, public_key = %pair.public, "Generated server keypair");
        Ok(ServerKeypair {
            pair,
            generated: true,
        })
    }
}
