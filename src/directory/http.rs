//! HTTP directory client
//!
//! Talks JSON to the directory API with a per-request timeout. Any transport
//! error, timeout, non-2xx status or malformed body becomes
//! `DirectoryUnavailable`; a 404 on a single-resource lookup is `NotFound`.

use super::{DirectoryClient, NetworkDetail, ResourceSnapshot, RouterDetail};
use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

/// Directory client backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    base_url: Url,
    http_client: Client,
}

impl HttpDirectory {
    /// Create a client for `base_url` with the given request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            ProvisionError::Config(format!("Invalid directory URL '{}': {}", base_url, e))
        })?;

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProvisionError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            http_client,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ProvisionError::Config(format!("Invalid directory path '{}': {}", path, e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        debug!(%url, "querying directory");

        let response = self
            .http_client
            .get(url.clone())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProvisionError::DirectoryUnavailable(format!("Timeout querying {}", url))
                } else {
                    ProvisionError::DirectoryUnavailable(format!("Request to {} failed: {}", url, e))
                }
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProvisionError::NotFound(format!("{} returned 404", url)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::DirectoryUnavailable(format!(
                "{} returned {}: {}",
                url, status, body
            )));
        }

        response.json::<T>().await.map_err(|e| {
            ProvisionError::DirectoryUnavailable(format!("Malformed response from {}: {}", url, e))
        })
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectory {
    #[instrument(skip(self))]
    async fn resource_snapshot(&self, instance_id: &str) -> Result<ResourceSnapshot> {
        // The snapshot must exist for a configured instance; 404 here means the
        // directory cannot serve us, not that ownership is empty.
        self.get_json(&format!("/api/vpn-servers/{}/resources", instance_id))
            .await
            .map_err(|e| match e {
                ProvisionError::NotFound(msg) => ProvisionError::DirectoryUnavailable(msg),
                other => other,
            })
    }

    #[instrument(skip(self))]
    async fn network(&self, id: &str) -> Result<NetworkDetail> {
        self.get_json(&format!("/api/vpn/networks/{}", id)).await
    }

    #[instrument(skip(self))]
    async fn router(&self, id: &str) -> Result<RouterDetail> {
        self.get_json(&format!("/api/routers/{}", id)).await
    }
}
