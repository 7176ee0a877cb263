//! Error types for wg-provisioner
//!
//! This module defines the error taxonomy used throughout the service.
//! We use `thiserror` for the library error and `anyhow` for error
//! propagation in the binary.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Provisioning step that failed, reported back to callers so they can
/// decide which idempotent recovery operation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Ownership check against the resource cache
    Authorize,
    /// Fetching network/router detail from the directory
    FetchDetail,
    /// Peer keypair generation
    GenerateKeys,
    /// Address allocation
    AllocateAddress,
    /// Interface creation/consistency check
    EnsureInterface,
    /// Attaching the peer to the interface
    AttachPeer,
    /// Detaching a peer from the interface
    DetachPeer,
    /// Persisting the interface record
    PersistState,
    /// Recomputing and applying firewall rules
    ApplyFirewall,
    /// Interface removal
    RemoveInterface,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Authorize => "authorize",
            Step::FetchDetail => "fetch_detail",
            Step::GenerateKeys => "generate_keys",
            Step::AllocateAddress => "allocate_address",
            Step::EnsureInterface => "ensure_interface",
            Step::AttachPeer => "attach_peer",
            Step::DetachPeer => "detach_peer",
            Step::PersistState => "persist_state",
            Step::ApplyFirewall => "apply_firewall",
            Step::RemoveInterface => "remove_interface",
        };
        f.write_str(name)
    }
}

/// Root error categories, independent of the step that produced them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Resource is not owned by this instance
    NotManaged,
    /// Directory service unreachable or returned an error
    DirectoryUnavailable,
    /// No free address left in the network
    PoolExhausted,
    /// WireGuard/interface command failed
    InterfaceCommandFailed,
    /// Firewall command failed
    FirewallCommandFailed,
    /// Key generation failed
    KeyGenerationFailed,
    /// External command exceeded its deadline
    Timeout,
    /// Invalid configuration
    Config,
    /// Local I/O failure
    Io,
    /// (De)serialization failure
    Serialization,
    /// Invalid input
    Validation,
    /// Requested entity does not exist
    NotFound,
    /// Service is draining and refuses new work
    ShuttingDown,
}

/// Main error type for provisioning operations
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Target resource is absent from the current ownership snapshot
    #[error("Resource not managed by this instance: {0}")]
    NotManaged(String),

    /// Directory service failure (network, non-2xx, timeout, bad body)
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Address pool exhausted
    #[error("Address pool exhausted: {0}")]
    PoolExhausted(String),

    /// Interface control command failure
    #[error("Interface command failed: {0}")]
    InterfaceCommandFailed(String),

    /// Firewall control command failure
    #[error("Firewall command failed: {0}")]
    FirewallCommandFailed(String),

    /// Key generation failure
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request rejected because the service is shutting down
    #[error("Service is shutting down")]
    ShuttingDown,

    /// Failure tagged with the provisioning step that produced it
    #[error("Step '{step}' failed: {source}")]
    Step {
        /// Failing step
        step: Step,
        /// Underlying error
        #[source]
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    /// Tag this error with the step that produced it.
    ///
    /// Already-tagged errors keep their original step.
    pub fn at(self, step: Step) -> Self {
        match self {
            tagged @ ProvisionError::Step { .. } => tagged,
            other => ProvisionError::Step {
                step,
                source: Box::new(other),
            },
        }
    }

    /// Step that failed, if the error was tagged
    pub fn step(&self) -> Option<Step> {
        match self {
            ProvisionError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Root error, with any step tag removed
    pub fn root(&self) -> &ProvisionError {
        match self {
            ProvisionError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Taxonomy entry of the root error
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            ProvisionError::NotManaged(_) => ErrorKind::NotManaged,
            ProvisionError::DirectoryUnavailable(_) => ErrorKind::DirectoryUnavailable,
            ProvisionError::PoolExhausted(_) => ErrorKind::PoolExhausted,
            ProvisionError::InterfaceCommandFailed(_) => ErrorKind::InterfaceCommandFailed,
            ProvisionError::FirewallCommandFailed(_) => ErrorKind::FirewallCommandFailed,
            ProvisionError::KeyGenerationFailed(_) => ErrorKind::KeyGenerationFailed,
            ProvisionError::Timeout(_) => ErrorKind::Timeout,
            ProvisionError::Config(_) => ErrorKind::Config,
            ProvisionError::Io(_) => ErrorKind::Io,
            ProvisionError::Serialization(_) => ErrorKind::Serialization,
            ProvisionError::Validation(_) => ErrorKind::Validation,
            ProvisionError::NotFound(_) => ErrorKind::NotFound,
            ProvisionError::ShuttingDown => ErrorKind::ShuttingDown,
            ProvisionError::Step { .. } => unreachable!("root() never returns a Step"),
        }
    }
}

/// Result type alias using ProvisionError
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl From<serde_json::Error> for ProvisionError {
    fn from(err: serde_json::Error) -> Self {
        ProvisionError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ProvisionError {
    fn from(err: toml::de::Error) -> Self {
        ProvisionError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for ProvisionError {
    fn from(err: reqwest::Error) -> Self {
        ProvisionError::DirectoryUnavailable(err.to_string())
    }
}
