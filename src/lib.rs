//! wg-provisioner: WireGuard provisioning for directory-managed router fleets
//!
//! A server-side service that owns a set of VPN networks assigned to it by an
//! external directory. For each network it maintains one WireGuard interface;
//! for each router in a network it provisions a peer with a unique tunnel
//! address and returns a ready-to-use peer configuration document.
//!
//! # Architecture
//!
//! A background synchronizer keeps an in-memory ownership snapshot fresh.
//! Every operation first checks ownership against that snapshot, then runs
//! its steps under a per-network lock: address allocation, interface
//! lifecycle, peer attach/detach, state persistence and firewall rules.
//! Host facilities are reached through narrow capability traits so the same
//! orchestration runs against `ip`/`wg`/`iptables` or in memory.
//!
//! # Modules
//!
//! - `config`: Configuration parsing and validation
//! - `directory`: Directory service client
//! - `resources`: Ownership cache and background synchronizer
//! - `ipam`: Per-network tunnel address allocation
//! - `system`: Host capabilities (WireGuard control, firewall, keys)
//! - `wireguard`: Keys, interface lifecycle, state, config documents, status
//! - `firewall`: Per-interface rule computation and reconciliation
//! - `provisioner`: Operation surface tying everything together
//! - `control`: Control API over a Unix socket
//! - `monitoring`: Health checks and metrics
//! - `service`: Service manager notifications
//! - `error`: Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod control;
pub mod directory;
pub mod error;
pub mod firewall;
pub mod ipam;
pub mod monitoring;
pub mod provisioner;
pub mod resources;
pub mod service;
pub mod system;
pub mod wireguard;

// Re-export commonly used types
pub use error::{ErrorKind, ProvisionError, Result, Step};
pub use provisioner::{ProvisionOptions, ProvisionedPeer, Provisioner};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
