//! Peer connection documents
//!
//! Rendering is a pure function of its inputs: no timestamps, allowed
//! networks sorted and de-duplicated, fixed key order.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

/// Inputs of a peer configuration document
#[derive(Debug, Clone)]
pub struct PeerConfigParams<'a> {
    /// Router display name, rendered as a comment
    pub router_name: Option<&'a str>,
    /// Peer private key; the line is omitted when `None`
    pub private_key: Option<&'a str>,
    /// Peer tunnel address
    pub address: Ipv4Addr,
    /// Network the peer belongs to
    pub network: Ipv4Net,
    /// Server public key
    pub server_public_key: &'a str,
    /// Server host
    pub endpoint_host: &'a str,
    /// Server port
    pub listen_port: u16,
    /// Extra networks routed through the tunnel
    pub allowed_networks: &'a BTreeSet<String>,
    /// Keepalive interval, omitted when 0
    pub persistent_keepalive: u16,
    /// DNS servers, omitted when empty
    pub dns: &'a [String],
}

/// Render the wg-quick style document handed to a router
pub fn render_peer_config(params: &PeerConfigParams<'_>) -> String {
    let mut allowed: BTreeSet<String> = params.allowed_networks.clone();
    allowed.insert(params.network.trunc().to_string());
    let allowed: Vec<String> = allowed.into_iter().collect();

    let mut out = String::new();
    if let Some(name) = params.router_name {
        let _ = writeln!(out, "# Router: {}", name);
        out.push('\n');
    }

    out.push_str("[Interface]\n");
    if let Some(key) = params.private_key {
        let _ = writeln!(out, "PrivateKey = {}", key);
    }
    let _ = writeln!(
        out,
        "Address = {}/{}",
        params.address,
        params.network.prefix_len()
    );
    if !params.dns.is_empty() {
        let _ = writeln!(out, "DNS = {}", params.dns.join(", "));
    }

    out.push_str("\n[Peer]\n");
    let _ = writeln!(out, "PublicKey = {}", params.server_public_key);
    let _ = writeln!(out, "Endpoint = {}:{}", params.endpoint_host, params.listen_port);
    let _ = writeln!(out, "AllowedIPs = {}", allowed.join(", "));
    if params.persistent_keepalive > 0 {
        let _ = writeln!(out, "PersistentKeepalive = {}", params.persistent_keepalive);
    }
    out
}
