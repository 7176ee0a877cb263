//! WireGuard control-plane state
//!
//! Keys, persisted interface records, interface lifecycle, peer
//! configuration documents and runtime status parsing. The data plane
//! itself is the kernel's.

pub mod config_gen;
pub mod interface;
pub mod keys;
pub mod state;
pub mod status;

pub use config_gen::{render_peer_config, PeerConfigParams};
pub use interface::{interface_name, EnsuredInterface, InterfaceManager, NetworkParams};
pub use keys::{KeyPair, NativeKeyGenerator, PrivateKey, PublicKey};
pub use state::{InterfaceRecord, PeerRecord, ServerKeypair, StateStore};
pub use status::{parse_dump, InterfaceStatus, PeerStatus};
