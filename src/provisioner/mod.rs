//! Peer provisioning
//!
//! Ties the resource cache, address allocator, interface manager and
//! firewall applier together behind the operation surface exposed to
//! callers. Every mutation of a network runs under that network's lock, and
//! every failure carries the step that produced it so callers can pick the
//! matching idempotent recovery operation. Nothing is retried automatically.

mod gate;
mod locks;

pub use gate::{GateGuard, RequestGate};
pub use locks::NetworkLocks;

use crate::config::{parse_cidr, Config, PrivateKeyPolicy};
use crate::directory::{DirectoryClient, NetworkDetail};
use crate::error::{ProvisionError, Result, Step};
use crate::firewall::{ApplyReport, FirewallApplier};
use crate::ipam::IpAllocator;
use crate::resources::{
    ManagedNetwork, ManagedRouter, ResourceCache, ResourceSynchronizer, Snapshot, SyncReport,
    SyncStatus,
};
use crate::system::{Capabilities, KeyGenerator};
use crate::wireguard::{
    interface_name, parse_dump, render_peer_config, InterfaceManager, InterfaceRecord,
    InterfaceStatus, NetworkParams, PeerConfigParams, PeerRecord, PublicKey, StateStore,
};
use chrono::Utc;
use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Behavior knobs taken from the configuration
#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    /// Identity of this instance in the directory
    pub instance_id: String,
    /// Keepalive written into peer documents
    pub persistent_keepalive: u16,
    /// DNS servers used when the directory supplies none
    pub dns: Vec<String>,
    /// Whether peer private keys are kept after provisioning
    pub private_key_policy: PrivateKeyPolicy,
    /// Remove an interface when its last peer goes away
    pub teardown_when_empty: bool,
}

impl From<&Config> for ProvisionerSettings {
    fn from(config: &Config) -> Self {
        Self {
            instance_id: config.instance_id.clone(),
            persistent_keepalive: config.wireguard.persistent_keepalive_secs,
            dns: config.wireguard.dns.clone(),
            private_key_policy: config.wireguard.private_key_policy,
            teardown_when_empty: config.wireguard.teardown_when_empty,
        }
    }
}

/// Caller-supplied provisioning options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionOptions {
    /// Extra networks behind the router
    #[serde(default)]
    pub allowed_networks: Vec<String>,

    /// Specific tunnel address instead of first-fit
    #[serde(default)]
    pub requested_address: Option<Ipv4Addr>,
}

/// Server-side connection parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerParams {
    /// Interface terminating the network
    pub interface: String,
    /// Server public key
    pub public_key: String,
    /// `host:port` routers connect to
    pub endpoint: String,
    /// Listen port
    pub listen_port: u16,
    /// Network CIDR
    pub network_cidr: String,
    /// Server tunnel address with prefix
    pub address: String,
}

/// Connection material returned by `provision_peer`
#[derive(Clone, Serialize)]
pub struct ProvisionedPeer {
    /// Router id
    pub router_id: String,
    /// Network id
    pub network_id: String,
    /// Peer public key
    pub public_key: String,
    /// Peer private key
    pub private_key: String,
    /// Allocated tunnel address
    pub address: Ipv4Addr,
    /// Networks behind the router
    pub allowed_networks: Vec<String>,
    /// Server parameters
    pub server: ServerParams,
    /// Rendered peer document
    pub config: String,
}

impl fmt::Debug for ProvisionedPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionedPeer")
            .field("router_id", &self.router_id)
            .field("network_id", &self.network_id)
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .field("address", &self.address)
            .field("allowed_networks", &self.allowed_networks)
            .field("server", &self.server)
            .finish()
    }
}

/// Result of `ensure_interface`
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceSummary {
    /// Interface name
    pub name: String,
    /// Network id
    pub network_id: String,
    /// Network CIDR
    pub cidr: String,
    /// Server address with prefix
    pub address: String,
    /// Listen port
    pub listen_port: u16,
    /// Server public key
    pub public_key: String,
    /// Attached peers
    pub peers: usize,
    /// Whether this call created the link
    pub created: bool,
    /// Firewall changes made by this call
    pub firewall: ApplyReport,
}

/// Result of `add_network` / `remove_network`
#[derive(Debug, Clone, Serialize)]
pub struct PeerNetworks {
    /// Router id
    pub router_id: String,
    /// Interface the peer is attached to
    pub interface: String,
    /// Networks now routed to the router
    pub allowed_networks: Vec<String>,
    /// Firewall changes made by this call
    pub firewall: ApplyReport,
}

/// Runtime status of the service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Identity of this instance
    pub instance_id: String,
    /// Whether new requests are admitted
    pub accepting: bool,
    /// Networks in the ownership snapshot
    pub managed_networks: usize,
    /// Routers in the ownership snapshot
    pub managed_routers: usize,
    /// Synchronizer health
    pub sync: SyncStatus,
    /// Managed interfaces with their peers
    pub interfaces: Vec<InterfaceStatus>,
}

fn ipv4_cidr(cidr: &str) -> Result<Ipv4Net> {
    match parse_cidr(cidr)? {
        IpNet::V4(net) => Ok(net),
        IpNet::V6(_) => Err(ProvisionError::Validation(format!(
            "IPv6 networks are not supported: {}",
            cidr
        ))),
    }
}

fn network_params(network: &ManagedNetwork, detail: &NetworkDetail) -> Result<NetworkParams> {
    Ok(NetworkParams {
        network_id: network.id.clone(),
        cidr: ipv4_cidr(&detail.cidr)?,
        listen_port: detail.listen_port,
        server_endpoint: detail
            .server_endpoint
            .clone()
            .or_else(|| network.server_endpoint.clone()),
        dns: detail.dns_servers.clone(),
    })
}

/// Orchestrates provisioning for the networks this instance owns
pub struct Provisioner {
    settings: ProvisionerSettings,
    cache: Arc<ResourceCache>,
    sync: Arc<ResourceSynchronizer>,
    directory: Arc<dyn DirectoryClient>,
    allocator: IpAllocator,
    interfaces: InterfaceManager,
    firewall: FirewallApplier,
    keys: Arc<dyn KeyGenerator>,
    locks: NetworkLocks,
    gate: RequestGate,
}

impl Provisioner {
    /// Build a provisioner from configuration.
    ///
    /// Fails when the state directory is unusable. Address pools are seeded
    /// from persisted interface records so allocations survive restarts.
    pub fn new(
        config: &Config,
        directory: Arc<dyn DirectoryClient>,
        capabilities: Capabilities,
    ) -> Result<Self> {
        let store = StateStore::open(&config.wireguard.state_dir)?;

        let allocator = IpAllocator::new(config.wireguard.reserved_addresses);
        for record in store.load_all()? {
            allocator.register(&record.network_id, record.cidr, record.peer_addresses());
            info!(
                interface = %record.name,
                peers = record.peers.len(),
                "Loaded persisted interface"
            );
        }

        let cache = Arc::new(ResourceCache::new());
        let sync = Arc::new(ResourceSynchronizer::new(
            directory.clone(),
            cache.clone(),
            config.instance_id.clone(),
            config.sync_interval(),
        ));

        Ok(Self {
            settings: ProvisionerSettings::from(config),
            cache,
            sync,
            directory,
            allocator,
            interfaces: InterfaceManager::new(
                capabilities.wireguard,
                capabilities.keys.clone(),
                store,
                config.wireguard.listen_port,
            ),
            firewall: FirewallApplier::new(
                capabilities.firewall,
                config.firewall.enabled,
                config.firewall.masquerade_interface.clone(),
            ),
            keys: capabilities.keys,
            locks: NetworkLocks::new(),
            gate: RequestGate::new(),
        })
    }

    /// Background synchronizer feeding the resource cache
    pub fn synchronizer(&self) -> &Arc<ResourceSynchronizer> {
        &self.sync
    }

    /// Ownership cache
    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// Address allocator
    pub fn allocator(&self) -> &IpAllocator {
        &self.allocator
    }

    /// Request admission gate
    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    fn store(&self) -> &StateStore {
        self.interfaces.store()
    }

    fn authorize_router(&self, router_id: &str) -> Result<(ManagedRouter, ManagedNetwork)> {
        let router = self
            .cache
            .router(router_id)
            .map_err(|e| e.at(Step::Authorize))?;
        let network = self
            .cache
            .network(&router.network_id)
            .map_err(|e| e.at(Step::Authorize))?;
        Ok((router, network))
    }

    fn load_record(&self, name: &str) -> Result<Option<InterfaceRecord>> {
        self.store()
            .load(name)
            .map_err(|e| e.at(Step::PersistState))
    }

    /// Provision a peer for a router and return its connection material.
    ///
    /// A router that already has a peer gets it replaced.
    #[instrument(skip(self, options))]
    pub async fn provision_peer(
        &self,
        router_id: &str,
        options: ProvisionOptions,
    ) -> Result<ProvisionedPeer> {
        let _admitted = self.gate.enter()?;

        let (router, network) = self.authorize_router(router_id)?;

        let mut allowed_networks = BTreeSet::new();
        for cidr in &options.allowed_networks {
            allowed_networks.insert(ipv4_cidr(cidr)?.to_string());
        }

        let (detail, router_detail) = tokio::try_join!(
            self.directory.network(&network.id),
            self.directory.router(router_id)
        )
        .map_err(|e| e.at(Step::FetchDetail))?;
        let params = network_params(&network, &detail).map_err(|e| e.at(Step::FetchDetail))?;
        let endpoint_host = params.server_endpoint.clone().ok_or_else(|| {
            ProvisionError::Validation(format!("network {} has no server endpoint", network.id))
                .at(Step::FetchDetail)
        })?;
        for cidr in &router_detail.allowed_networks {
            let cidr = ipv4_cidr(cidr).map_err(|e| e.at(Step::FetchDetail))?;
            allowed_networks.insert(cidr.to_string());
        }

        let keypair = self
            .keys
            .generate()
            .await
            .map_err(|e| e.at(Step::GenerateKeys))?;

        let _lock = self.locks.lock(&network.id).await;
        let name = interface_name(&network.id);

        let existing = self.load_record(&name)?;
        let seed: Vec<Ipv4Addr> = existing
            .iter()
            .flat_map(|r| r.peer_addresses())
            .chain(detail.allocated_addresses.iter().copied())
            .collect();
        self.allocator.register(&network.id, params.cidr, seed);

        // The replaced peer stays attached until its successor is in place.
        let previous = existing.and_then(|mut r| r.peers.remove(router_id));
        if let Some(previous) = &previous {
            self.allocator.release(&network.id, previous.address);
        }

        let allocated = match options.requested_address {
            Some(addr) => self.allocator.allocate_specific(&network.id, addr),
            None => self.allocator.allocate(&network.id),
        };
        let address = match allocated {
            Ok(address) => address,
            Err(e) => {
                self.restore_replaced(&network.id, None, previous.as_ref(), false)
                    .await;
                return Err(e.at(Step::AllocateAddress));
            }
        };

        let ensured = match self.interfaces.ensure(&params).await {
            Ok(ensured) => ensured,
            Err(e) => {
                self.restore_replaced(&network.id, Some(address), previous.as_ref(), false)
                    .await;
                return Err(e.at(Step::EnsureInterface));
            }
        };
        let mut record = ensured.record;

        let private_key = keypair.private.to_base64();
        let peer = PeerRecord {
            router_id: router_id.to_string(),
            router_name: router.name.clone().or(router_detail.name.clone()),
            public_key: keypair.public.to_base64(),
            address,
            allowed_networks,
            interface: name.clone(),
            private_key: match self.settings.private_key_policy {
                PrivateKeyPolicy::Retain => Some(private_key.clone()),
                PrivateKeyPolicy::OneTime => None,
            },
            created_at: Utc::now(),
        };

        if let Err(e) = self.interfaces.attach(&peer).await {
            self.restore_replaced(&network.id, Some(address), previous.as_ref(), true)
                .await;
            return Err(e.at(Step::AttachPeer));
        }

        if let Some(previous) = &previous {
            if let Err(e) = self.interfaces.detach(previous).await {
                self.detach_best_effort(&peer).await;
                self.restore_replaced(&network.id, Some(address), Some(previous), true)
                    .await;
                return Err(e.at(Step::DetachPeer));
            }
            info!(router = router_id, address = %previous.address, "Replaced existing peer");
        }

        record.peers.insert(router_id.to_string(), peer.clone());
        if let Err(e) = self.store().save(&record) {
            self.detach_best_effort(&peer).await;
            self.restore_replaced(&network.id, Some(address), previous.as_ref(), true)
                .await;
            return Err(e.at(Step::PersistState));
        }
        if let Err(e) = self.firewall.apply_record(&record).await {
            // The record stays so remove_peer can finish the cleanup.
            self.detach_best_effort(&peer).await;
            return Err(e.at(Step::ApplyFirewall));
        }

        let config = self.render(&record, &peer, &ensured.server_public_key, Some(&private_key))?;
        let server_address = record.server_address()?;

        info!(
            router = router_id,
            network = %network.id,
            interface = %name,
            %address,
            "Peer provisioned"
        );

        Ok(ProvisionedPeer {
            router_id: router_id.to_string(),
            network_id: network.id.clone(),
            public_key: peer.public_key.clone(),
            private_key,
            address,
            allowed_networks: peer.allowed_networks.iter().cloned().collect(),
            server: ServerParams {
                interface: name,
                public_key: ensured.server_public_key.to_base64(),
                endpoint: format!("{}:{}", endpoint_host, record.listen_port),
                listen_port: record.listen_port,
                network_cidr: record.cidr.to_string(),
                address: server_address.to_string(),
            },
            config,
        })
    }

    /// Detach a router's peer and drop it from the record. The caller owns
    /// the network lock and releases the returned peer's address.
    async fn detach_locked(
        &self,
        record: &mut InterfaceRecord,
        router_id: &str,
    ) -> Result<Option<PeerRecord>> {
        let Some(peer) = record.peers.get(router_id).cloned() else {
            return Ok(None);
        };

        let link_exists = self
            .interfaces
            .wireguard()
            .interface_exists(&record.name)
            .await
            .map_err(|e| e.at(Step::DetachPeer))?;
        if link_exists {
            self.interfaces
                .detach(&peer)
                .await
                .map_err(|e| e.at(Step::DetachPeer))?;
        }

        record.peers.remove(router_id);
        self.store()
            .save(record)
            .map_err(|e| e.at(Step::PersistState))?;
        Ok(Some(peer))
    }

    /// Undo a provision that failed before its record was saved: free the
    /// new address and put back the peer it was replacing
    async fn restore_replaced(
        &self,
        network_id: &str,
        address: Option<Ipv4Addr>,
        previous: Option<&PeerRecord>,
        reattach: bool,
    ) {
        if let Some(address) = address {
            self.allocator.release(network_id, address);
        }
        let Some(previous) = previous else {
            return;
        };
        if let Err(e) = self.allocator.allocate_specific(network_id, previous.address) {
            warn!(
                router = %previous.router_id,
                address = %previous.address,
                "Could not reclaim address of the replaced peer: {}", e
            );
        }
        if reattach {
            if let Err(e) = self.interfaces.attach(previous).await {
                warn!(
                    router = %previous.router_id,
                    interface = %previous.interface,
                    "Could not restore the replaced peer: {}", e
                );
            }
        }
    }

    async fn detach_best_effort(&self, peer: &PeerRecord) {
        if let Err(e) = self.interfaces.detach(peer).await {
            warn!(
                router = %peer.router_id,
                interface = %peer.interface,
                "Cleanup detach failed, peer may still be attached: {}", e
            );
        }
    }

    fn render(
        &self,
        record: &InterfaceRecord,
        peer: &PeerRecord,
        server_key: &PublicKey,
        private_key: Option<&str>,
    ) -> Result<String> {
        let endpoint_host = record.server_endpoint.as_deref().ok_or_else(|| {
            ProvisionError::Validation(format!("interface {} has no server endpoint", record.name))
        })?;
        let server_public_key = server_key.to_base64();
        let dns = if record.dns.is_empty() {
            &self.settings.dns
        } else {
            &record.dns
        };

        Ok(render_peer_config(&PeerConfigParams {
            router_name: peer.router_name.as_deref(),
            private_key,
            address: peer.address,
            network: record.cidr,
            server_public_key: &server_public_key,
            endpoint_host,
            listen_port: record.listen_port,
            allowed_networks: &peer.allowed_networks,
            persistent_keepalive: self.settings.persistent_keepalive,
            dns,
        }))
    }

    /// Remove a router's peer. Returns false when there was nothing to remove.
    #[instrument(skip(self))]
    pub async fn remove_peer(&self, router_id: &str) -> Result<bool> {
        let _admitted = self.gate.enter()?;
        let (_router, network) = self.authorize_router(router_id)?;

        let _lock = self.locks.lock(&network.id).await;
        let name = interface_name(&network.id);
        let Some(mut record) = self.load_record(&name)? else {
            return Ok(false);
        };
        let Some(peer) = self.detach_locked(&mut record, router_id).await? else {
            return Ok(false);
        };

        let applied = self.firewall.apply_record(&record).await;
        self.allocator.release(&network.id, peer.address);
        applied.map_err(|e| e.at(Step::ApplyFirewall))?;

        info!(router = router_id, address = %peer.address, "Peer removed");

        if self.settings.teardown_when_empty && record.peers.is_empty() {
            info!(interface = %name, "Last peer removed, tearing down interface");
            self.teardown_locked(&network.id).await?;
        }
        Ok(true)
    }

    /// Re-issue a router's peer document.
    ///
    /// Under the one-time key policy the `PrivateKey` line is omitted.
    #[instrument(skip(self))]
    pub async fn get_config(&self, router_id: &str) -> Result<String> {
        let _admitted = self.gate.enter()?;
        let (_router, network) = self.authorize_router(router_id)?;

        let name = interface_name(&network.id);
        let record = self
            .load_record(&name)?
            .ok_or_else(|| ProvisionError::NotFound(format!("no interface for network {}", network.id)))?;
        let peer = record
            .peers
            .get(router_id)
            .ok_or_else(|| ProvisionError::NotFound(format!("no peer for router {}", router_id)))?;
        let server_key = self.store().server_public_key(&name)?;

        let private_key = match self.settings.private_key_policy {
            PrivateKeyPolicy::Retain => peer.private_key.as_deref(),
            PrivateKeyPolicy::OneTime => None,
        };
        self.render(&record, peer, &server_key, private_key)
    }

    /// Create the network's interface if needed and apply its firewall rules
    #[instrument(skip(self))]
    pub async fn ensure_interface(&self, network_id: &str) -> Result<InterfaceSummary> {
        let _admitted = self.gate.enter()?;
        let network = self
            .cache
            .network(network_id)
            .map_err(|e| e.at(Step::Authorize))?;

        let detail = self
            .directory
            .network(network_id)
            .await
            .map_err(|e| e.at(Step::FetchDetail))?;
        let params = network_params(&network, &detail).map_err(|e| e.at(Step::FetchDetail))?;

        let _lock = self.locks.lock(network_id).await;
        let ensured = self
            .interfaces
            .ensure(&params)
            .await
            .map_err(|e| e.at(Step::EnsureInterface))?;
        let seed: Vec<Ipv4Addr> = ensured
            .record
            .peer_addresses()
            .chain(detail.allocated_addresses.iter().copied())
            .collect();
        self.allocator.register(network_id, params.cidr, seed);

        let firewall = self
            .firewall
            .apply_record(&ensured.record)
            .await
            .map_err(|e| e.at(Step::ApplyFirewall))?;

        Ok(InterfaceSummary {
            name: ensured.record.name.clone(),
            network_id: network_id.to_string(),
            cidr: ensured.record.cidr.to_string(),
            address: ensured.record.server_address()?.to_string(),
            listen_port: ensured.record.listen_port,
            public_key: ensured.server_public_key.to_base64(),
            peers: ensured.record.peers.len(),
            created: ensured.created,
            firewall,
        })
    }

    /// Delete the network's interface, its rules and its state.
    ///
    /// Returns whether a link existed; removing an absent interface succeeds.
    #[instrument(skip(self))]
    pub async fn remove_interface(&self, network_id: &str) -> Result<bool> {
        let _admitted = self.gate.enter()?;
        self.cache
            .network(network_id)
            .map_err(|e| e.at(Step::Authorize))?;

        let _lock = self.locks.lock(network_id).await;
        self.teardown_locked(network_id).await
    }

    async fn teardown_locked(&self, network_id: &str) -> Result<bool> {
        let name = interface_name(network_id);
        let existed = self
            .interfaces
            .remove(network_id)
            .await
            .map_err(|e| e.at(Step::RemoveInterface))?;
        self.firewall
            .clear(&name)
            .await
            .map_err(|e| e.at(Step::ApplyFirewall))?;
        self.allocator.forget(network_id);
        Ok(existed)
    }

    /// Route an extra network to a router's peer
    #[instrument(skip(self))]
    pub async fn add_network(&self, router_id: &str, cidr: &str) -> Result<PeerNetworks> {
        self.update_networks(router_id, cidr, true).await
    }

    /// Stop routing a network to a router's peer
    #[instrument(skip(self))]
    pub async fn remove_network(&self, router_id: &str, cidr: &str) -> Result<PeerNetworks> {
        self.update_networks(router_id, cidr, false).await
    }

    async fn update_networks(&self, router_id: &str, cidr: &str, add: bool) -> Result<PeerNetworks> {
        let _admitted = self.gate.enter()?;
        let (_router, network) = self.authorize_router(router_id)?;
        let cidr = ipv4_cidr(cidr)?.to_string();

        let _lock = self.locks.lock(&network.id).await;
        let name = interface_name(&network.id);
        let mut record = self
            .load_record(&name)?
            .ok_or_else(|| ProvisionError::NotFound(format!("no peer for router {}", router_id)))?;
        let peer = record
            .peers
            .get_mut(router_id)
            .ok_or_else(|| ProvisionError::NotFound(format!("no peer for router {}", router_id)))?;

        let changed = if add {
            peer.allowed_networks.insert(cidr.clone())
        } else {
            peer.allowed_networks.remove(&cidr)
        };
        let allowed_networks: Vec<String> = peer.allowed_networks.iter().cloned().collect();

        if changed {
            self.store()
                .save(&record)
                .map_err(|e| e.at(Step::PersistState))?;
        }
        let firewall = self
            .firewall
            .apply_record(&record)
            .await
            .map_err(|e| e.at(Step::ApplyFirewall))?;

        info!(router = router_id, %cidr, add, changed, "Allowed networks updated");
        Ok(PeerNetworks {
            router_id: router_id.to_string(),
            interface: name,
            allowed_networks,
            firewall,
        })
    }

    /// Per-interface and per-peer runtime statistics of managed interfaces
    pub async fn get_status(&self) -> Result<ServiceStatus> {
        let dump = self.interfaces.wireguard().dump().await?;
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);

        let records: HashMap<String, InterfaceRecord> = self
            .store()
            .load_all()?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();

        let interfaces = parse_dump(&dump, now)
            .into_iter()
            .filter_map(|mut iface| {
                let record = records.get(&iface.name)?;
                iface.network_id = Some(record.network_id.clone());
                let by_key: HashMap<&str, &PeerRecord> = record
                    .peers
                    .values()
                    .map(|p| (p.public_key.as_str(), p))
                    .collect();
                for peer in &mut iface.peers {
                    if let Some(known) = by_key.get(peer.public_key.as_str()) {
                        peer.router_id = Some(known.router_id.clone());
                        peer.router_name = known.router_name.clone();
                    }
                }
                Some(iface)
            })
            .collect();

        let snapshot = self.cache.snapshot();
        Ok(ServiceStatus {
            instance_id: self.settings.instance_id.clone(),
            accepting: self.gate.is_open(),
            managed_networks: snapshot.networks.len(),
            managed_routers: snapshot.routers.len(),
            sync: self.sync.status(),
            interfaces,
        })
    }

    /// Run a synchronization cycle now and wait for it
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let _admitted = self.gate.enter()?;
        self.sync.sync_once().await
    }

    /// Current ownership snapshot
    pub fn resources(&self) -> Arc<Snapshot> {
        self.cache.snapshot()
    }

    /// Refuse new requests and wait up to `timeout` for in-flight ones.
    ///
    /// Returns whether every in-flight request finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.gate.close();
        let in_flight = self.gate.in_flight();
        if in_flight > 0 {
            info!(in_flight, "Draining in-flight requests");
        }
        let drained = self.gate.drain(timeout).await;
        if !drained {
            warn!(
                remaining = self.gate.in_flight(),
                "Drain timeout reached with requests still running"
            );
        }
        drained
    }
}
