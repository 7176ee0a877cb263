//! IPv4 address allocation
//!
//! One pool per network. Every operation takes the allocator lock for the
//! whole read-modify-write, so concurrent callers can never be handed the
//! same address.

use crate::error::{ProvisionError, Result};
use ipnet::Ipv4Net;
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
struct Pool {
    cidr: Ipv4Net,
    allocated: BTreeSet<Ipv4Addr>,
}

impl Pool {
    /// Host addresses reserved for the server side of the network
    fn reserved(&self, reserved: u32) -> impl Iterator<Item = Ipv4Addr> {
        self.cidr.hosts().take(reserved as usize)
    }

    fn is_reserved(&self, addr: Ipv4Addr, reserved: u32) -> bool {
        addr == self.cidr.network()
            || addr == self.cidr.broadcast()
            || self.reserved(reserved).any(|r| r == addr)
    }
}

/// First-fit address allocator keyed by network id
#[derive(Debug)]
pub struct IpAllocator {
    reserved: u32,
    pools: Mutex<HashMap<String, Pool>>,
}

impl IpAllocator {
    /// Create an allocator reserving `reserved` leading host addresses
    /// of every network for the server
    pub fn new(reserved: u32) -> Self {
        Self {
            reserved,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Register a network pool seeded with addresses already in use.
    ///
    /// The seed only applies when the pool is new or its CIDR changed; an
    /// existing pool is authoritative. Returns whether the pool was (re)built.
    pub fn register(
        &self,
        network_id: &str,
        cidr: Ipv4Net,
        seed: impl IntoIterator<Item = Ipv4Addr>,
    ) -> bool {
        let cidr = cidr.trunc();
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());

        match pools.get(network_id) {
            Some(pool) if pool.cidr == cidr => return false,
            Some(pool) => {
                debug!(network = network_id, old = %pool.cidr, new = %cidr, "Network CIDR changed, rebuilding pool");
            }
            None => {}
        }

        let allocated = seed.into_iter().filter(|a| cidr.contains(a)).collect();
        pools.insert(network_id.to_string(), Pool { cidr, allocated });
        true
    }

    /// Whether a pool exists for the network
    pub fn is_registered(&self, network_id: &str) -> bool {
        self.pools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(network_id)
    }

    /// Allocate the lowest free address of the network
    pub fn allocate(&self, network_id: &str) -> Result<Ipv4Addr> {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        let pool = pools
            .get_mut(network_id)
            .ok_or_else(|| ProvisionError::NotFound(format!("address pool for network {}", network_id)))?;

        let candidate = pool
            .cidr
            .hosts()
            .skip(self.reserved as usize)
            .filter(|addr| *addr != pool.cidr.broadcast())
            .find(|addr| !pool.allocated.contains(addr));

        match candidate {
            Some(addr) => {
                pool.allocated.insert(addr);
                debug!(network = network_id, %addr, "Allocated address");
                Ok(addr)
            }
            None => Err(ProvisionError::PoolExhausted(format!(
                "no free address in {} for network {}",
                pool.cidr, network_id
            ))),
        }
    }

    /// Claim a specific address
    pub fn allocate_specific(&self, network_id: &str, addr: Ipv4Addr) -> Result<Ipv4Addr> {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        let pool = pools
            .get_mut(network_id)
            .ok_or_else(|| ProvisionError::NotFound(format!("address pool for network {}", network_id)))?;

        if !pool.cidr.contains(&addr) {
            return Err(ProvisionError::Validation(format!(
                "{} is outside {}",
                addr, pool.cidr
            )));
        }
        if pool.is_reserved(addr, self.reserved) {
            return Err(ProvisionError::Validation(format!(
                "{} is reserved in {}",
                addr, pool.cidr
            )));
        }
        if !pool.allocated.insert(addr) {
            return Err(ProvisionError::Validation(format!(
                "{} is already allocated in {}",
                addr, pool.cidr
            )));
        }

        debug!(network = network_id, %addr, "Allocated requested address");
        Ok(addr)
    }

    /// Return an address to the pool. Releasing a free address is a no-op.
    pub fn release(&self, network_id: &str, addr: Ipv4Addr) {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pool) = pools.get_mut(network_id) {
            if pool.allocated.remove(&addr) {
                debug!(network = network_id, %addr, "Released address");
            }
        }
    }

    /// Addresses currently allocated in the network, ascending
    pub fn allocated(&self, network_id: &str) -> Vec<Ipv4Addr> {
        self.pools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(network_id)
            .map(|pool| pool.allocated.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop the pool of a removed network
    pub fn forget(&self, network_id: &str) {
        self.pools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(network_id);
    }
}

impl Default for IpAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}
