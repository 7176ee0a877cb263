//! Control API request and response types
//!
//! One JSON object per line in each direction. Responses echo the request
//! id; failures carry the error kind and, for provisioning operations, the
//! step that failed.

use crate::error::{ErrorKind, ProvisionError, Step};
use crate::provisioner::ProvisionOptions;
use serde::{Deserialize, Serialize};

/// Operation requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    /// Provision a peer for `router_id`
    ProvisionPeer,
    /// Remove the peer of `router_id`
    RemovePeer,
    /// Re-issue the peer document of `router_id`
    GetConfig,
    /// Create the interface of `network_id`
    EnsureInterface,
    /// Delete the interface of `network_id`
    RemoveInterface,
    /// Route `cidr` to the peer of `router_id`
    AddNetwork,
    /// Stop routing `cidr` to the peer of `router_id`
    RemoveNetwork,
    /// Runtime status
    Status,
    /// Run a resource synchronization cycle
    Sync,
    /// Current ownership snapshot
    Resources,
}

/// API request from client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Request ID for tracking
    #[serde(default = "default_request_id")]
    pub id: String,

    /// Action to perform
    pub action: ControlAction,

    /// Router the action applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_id: Option<String>,

    /// Network the action applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,

    /// Network for add/remove network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,

    /// Provisioning options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ProvisionOptions>,
}

impl ApiRequest {
    /// Create a request without parameters
    pub fn new(id: impl Into<String>, action: ControlAction) -> Self {
        Self {
            id: id.into(),
            action,
            router_id: None,
            network_id: None,
            cidr: None,
            options: None,
        }
    }

    /// Set the router id
    pub fn with_router(mut self, router_id: impl Into<String>) -> Self {
        self.router_id = Some(router_id.into());
        self
    }

    /// Set the network id
    pub fn with_network(mut self, network_id: impl Into<String>) -> Self {
        self.network_id = Some(network_id.into());
        self
    }

    /// Set the CIDR
    pub fn with_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.cidr = Some(cidr.into());
        self
    }

    /// Set provisioning options
    pub fn with_options(mut self, options: ProvisionOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, ApiError> {
        serde_json::from_str(json).map_err(|e| ApiError::parse(e.to_string()))
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, ApiError> {
        serde_json::to_string(self).map_err(|e| ApiError::parse(e.to_string()))
    }
}

/// API response to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Request ID this response corresponds to
    pub id: String,

    /// Whether the request was successful
    pub success: bool,

    /// Optional result data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Optional error information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiResponse {
    /// Create a successful response
    pub fn success(id: String, data: Option<serde_json::Value>) -> Self {
        Self {
            id,
            success: true,
            data,
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: String, error: ApiError) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(error),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, ApiError> {
        serde_json::to_string(self).map_err(|e| ApiError::parse(e.to_string()))
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, ApiError> {
        serde_json::from_str(json).map_err(|e| ApiError::parse(e.to_string()))
    }
}

/// Error reported to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    /// Root error category
    pub kind: ErrorKind,

    /// Step that failed, for provisioning operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,

    /// Human-readable description
    pub message: String,
}

impl ApiError {
    /// Malformed request or response
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Serialization,
            step: None,
            message: message.into(),
        }
    }

    /// Missing or invalid request parameter
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            step: None,
            message: message.into(),
        }
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        Self {
            kind: err.kind(),
            step: err.step(),
            message: err.to_string(),
        }
    }
}

fn default_request_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("req-{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}
