//! Periodic resource synchronization
//!
//! One background task fetches the full ownership snapshot at startup, on a
//! fixed interval and on manual trigger. A failed cycle keeps the previous
//! snapshot: stale ownership is still correct ownership, while an empty
//! cache would deny every operation during a directory outage.

use super::{ResourceCache, Snapshot};
use crate::directory::DirectoryClient;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Outcome of a successful cycle
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Number of networks in the new snapshot
    pub networks: usize,
    /// Number of routers in the new snapshot
    pub routers: usize,
    /// When the snapshot was installed
    pub synced_at: DateTime<Utc>,
}

/// Synchronizer health
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    /// Last successful cycle
    pub last_success: Option<DateTime<Utc>>,
    /// Last attempted cycle
    pub last_attempt: Option<DateTime<Utc>>,
    /// Error of the last failed cycle, cleared on success
    pub last_error: Option<String>,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Total cycles attempted
    pub cycles: u64,
}

/// Keeps the resource cache in step with the directory
pub struct ResourceSynchronizer {
    directory: Arc<dyn DirectoryClient>,
    cache: Arc<ResourceCache>,
    instance_id: String,
    interval: Duration,
    trigger: Notify,
    // Held from fetch to swap so an older fetch never lands last.
    cycle: AsyncMutex<()>,
    status: Mutex<SyncStatus>,
}

impl ResourceSynchronizer {
    /// Create a synchronizer for `instance_id`
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        cache: Arc<ResourceCache>,
        instance_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            directory,
            cache,
            instance_id: instance_id.into(),
            interval,
            trigger: Notify::new(),
            cycle: AsyncMutex::new(()),
            status: Mutex::new(SyncStatus::default()),
        }
    }

    /// Cache this synchronizer writes to
    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// Current health
    pub fn status(&self) -> SyncStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Ask the background loop to run a cycle now
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Run a single cycle and swap the cache on success.
    ///
    /// Cycles never overlap: a caller arriving mid-cycle waits for it and
    /// then fetches a fresh snapshot of its own.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let _cycle = self.cycle.lock().await;
        let started = Utc::now();
        {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            status.last_attempt = Some(started);
            status.cycles += 1;
        }

        match self.directory.resource_snapshot(&self.instance_id).await {
            Ok(snapshot) => {
                let synced_at = Utc::now();
                let snapshot = Snapshot::from_directory(snapshot, synced_at);
                let report = SyncReport {
                    networks: snapshot.networks.len(),
                    routers: snapshot.routers.len(),
                    synced_at,
                };
                self.cache.replace(snapshot);

                let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
                status.last_success = Some(synced_at);
                status.last_error = None;
                status.consecutive_failures = 0;

                info!(
                    networks = report.networks,
                    routers = report.routers,
                    "Resources synchronized"
                );
                Ok(report)
            }
            Err(e) => {
                let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
                status.last_error = Some(e.to_string());
                status.consecutive_failures += 1;

                if status.last_success.is_some() {
                    warn!(
                        failures = status.consecutive_failures,
                        "Resource sync failed, keeping previous snapshot: {}", e
                    );
                } else {
                    error!("Resource sync failed before any snapshot was loaded: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Run until `shutdown` flips to true.
    ///
    /// The first cycle runs immediately. A cycle still in flight when
    /// shutdown is signalled is dropped before it can touch the cache.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            instance = %self.instance_id,
            interval_secs = self.interval.as_secs(),
            "Starting resource synchronizer"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {
                    debug!("Manual sync triggered");
                    ticker.reset();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                // Errors are recorded in status and logged by sync_once.
                _ = self.sync_once() => {}
                _ = shutdown.changed() => {
                    info!("Aborting in-flight resource sync for shutdown");
                    break;
                }
            }
        }

        info!("Resource synchronizer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{
        MockDirectoryClient, NetworkDetail, NetworkSummary, ResourceSnapshot, RouterDetail,
        RouterSummary,
    };
    use crate::error::ProvisionError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot() -> ResourceSnapshot {
        ResourceSnapshot {
            networks: vec![NetworkSummary {
                id: "net-1".to_string(),
                name: None,
                cidr: Some("10.8.0.0/24".to_string()),
                server_endpoint: None,
                tenant_id: None,
            }],
            routers: vec![RouterSummary {
                id: "router-1".to_string(),
                name: None,
                network_id: "net-1".to_string(),
                status: None,
            }],
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_successful_sync_replaces_cache() {
        let mut directory = MockDirectoryClient::new();
        directory
            .expect_resource_snapshot()
            .withf(|id| id == "vpn-1")
            .times(1)
            .returning(|_| Ok(snapshot()));

        let cache = Arc::new(ResourceCache::new());
        let sync = ResourceSynchronizer::new(
            Arc::new(directory),
            cache.clone(),
            "vpn-1",
            Duration::from_secs(60),
        );

        let report = sync.sync_once().await.unwrap();
        assert_eq!(report.networks, 1);
        assert_eq!(report.routers, 1);
        assert!(cache.is_managed("router-1"));
        assert!(sync.status().last_success.is_some());
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_previous_snapshot() {
        let mut directory = MockDirectoryClient::new();
        let mut seq = mockall::Sequence::new();
        directory
            .expect_resource_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(snapshot()));
        directory
            .expect_resource_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ProvisionError::DirectoryUnavailable("503".to_string())));

        let cache = Arc::new(ResourceCache::new());
        let sync = ResourceSynchronizer::new(
            Arc::new(directory),
            cache.clone(),
            "vpn-1",
            Duration::from_secs(60),
        );

        sync.sync_once().await.unwrap();
        assert!(sync.sync_once().await.is_err());

        assert!(cache.is_managed("net-1"));
        assert!(cache.is_managed("router-1"));
        let status = sync.status();
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.last_error.unwrap().contains("503"));
        assert_eq!(status.cycles, 2);
    }

    /// Directory whose first answer is slow and stale
    struct LaggingDirectory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DirectoryClient for LaggingDirectory {
        async fn resource_snapshot(&self, _instance_id: &str) -> Result<ResourceSnapshot> {
            let mut snap = snapshot();
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(200)).await;
                snap.networks[0].id = "net-old".to_string();
            } else {
                snap.networks[0].id = "net-new".to_string();
            }
            Ok(snap)
        }

        async fn network(&self, id: &str) -> Result<NetworkDetail> {
            Err(ProvisionError::NotFound(id.to_string()))
        }

        async fn router(&self, id: &str) -> Result<RouterDetail> {
            Err(ProvisionError::NotFound(id.to_string()))
        }
    }

    #[tokio::test]
    async fn test_overlapping_cycles_install_newest_snapshot() {
        let cache = Arc::new(ResourceCache::new());
        let sync = Arc::new(ResourceSynchronizer::new(
            Arc::new(LaggingDirectory {
                calls: AtomicUsize::new(0),
            }),
            cache.clone(),
            "vpn-1",
            Duration::from_secs(3600),
        ));

        let slow = tokio::spawn({
            let sync = sync.clone();
            async move { sync.sync_once().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        sync.sync_once().await.unwrap();
        slow.await.unwrap().unwrap();

        assert!(cache.is_network_managed("net-new"));
        assert!(!cache.is_network_managed("net-old"));
        assert_eq!(sync.status().cycles, 2);
    }

    #[tokio::test]
    async fn test_run_syncs_at_startup_and_stops_on_shutdown() {
        let mut directory = MockDirectoryClient::new();
        directory
            .expect_resource_snapshot()
            .returning(|_| Ok(snapshot()));

        let cache = Arc::new(ResourceCache::new());
        let sync = Arc::new(ResourceSynchronizer::new(
            Arc::new(directory),
            cache.clone(),
            "vpn-1",
            Duration::from_secs(3600),
        ));

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(sync.clone().run(rx));

        for _ in 0..50 {
            if cache.is_managed("net-1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cache.is_managed("net-1"));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("synchronizer did not stop")
            .unwrap();
    }
}
