//! In-memory directory
//!
//! Serves a fixed inventory for embedders that seed resources
//! programmatically and for tests, which can also flip it into an
//! unavailable state to simulate directory outages.

use super::{DirectoryClient, NetworkDetail, ResourceSnapshot, RouterDetail};
use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Directory backed by maps held in memory
#[derive(Debug, Default)]
pub struct StaticDirectory {
    snapshot: Mutex<ResourceSnapshot>,
    networks: Mutex<HashMap<String, NetworkDetail>>,
    routers: Mutex<HashMap<String, RouterDetail>>,
    unavailable: AtomicBool,
    snapshot_calls: AtomicUsize,
}

impl StaticDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot returned for every instance
    pub fn set_snapshot(&self, snapshot: ResourceSnapshot) {
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    /// Register network detail
    pub fn insert_network(&self, detail: NetworkDetail) {
        self.networks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(detail.id.clone(), detail);
    }

    /// Register router detail
    pub fn insert_router(&self, detail: RouterDetail) {
        self.routers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(detail.id.clone(), detail);
    }

    /// Make every call fail with `DirectoryUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of snapshot requests served or refused so far
    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProvisionError::DirectoryUnavailable(
                "static directory marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryClient for StaticDirectory {
    async fn resource_snapshot(&self, _instance_id: &str) -> Result<ResourceSnapshot> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.snapshot.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn network(&self, id: &str) -> Result<NetworkDetail> {
        self.check_available()?;
        self.networks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| ProvisionError::NotFound(format!("network {}", id)))
    }

    async fn router(&self, id: &str) -> Result<RouterDetail> {
        self.check_available()?;
        self.routers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| ProvisionError::NotFound(format!("router {}", id)))
    }
}
