//! Runtime status from `wg show all dump`

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Peers with a handshake younger than this are online
pub const ONLINE_HANDSHAKE_SECS: u64 = 180;

/// Runtime view of one peer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerStatus {
    /// Base64 public key
    pub public_key: String,
    /// Remote endpoint, if known
    pub endpoint: Option<String>,
    /// Allowed IPs configured on the server
    pub allowed_ips: Vec<String>,
    /// Unix seconds of the last handshake, `None` if never
    pub latest_handshake: Option<u64>,
    /// Bytes received from the peer
    pub rx_bytes: u64,
    /// Bytes sent to the peer
    pub tx_bytes: u64,
    /// Keepalive interval
    pub persistent_keepalive: Option<u16>,
    /// Whether the last handshake is recent
    pub online: bool,
    /// Router owning the peer, when known
    pub router_id: Option<String>,
    /// Router display name, when known
    pub router_name: Option<String>,
}

/// Runtime view of one interface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceStatus {
    /// Interface name
    pub name: String,
    /// Server public key
    pub public_key: Option<String>,
    /// Listen port
    pub listen_port: Option<u16>,
    /// Network served by the interface, when known
    pub network_id: Option<String>,
    /// Attached peers
    pub peers: Vec<PeerStatus>,
}

fn none_if_placeholder(value: &str) -> Option<String> {
    match value {
        "(none)" | "off" | "" => None,
        v => Some(v.to_string()),
    }
}

/// Parse `wg show all dump` output.
///
/// Interface lines carry 5 tab-separated fields, peer lines 9; anything
/// else is skipped. `now` is the reference time for the online flag.
pub fn parse_dump(dump: &str, now: u64) -> Vec<InterfaceStatus> {
    let mut interfaces: BTreeMap<String, InterfaceStatus> = BTreeMap::new();

    for line in dump.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.len() {
            5 => {
                let name = fields[0].to_string();
                interfaces.insert(
                    name.clone(),
                    InterfaceStatus {
                        name,
                        public_key: none_if_placeholder(fields[2]),
                        listen_port: fields[3].parse().ok().filter(|p| *p != 0),
                        network_id: None,
                        peers: Vec::new(),
                    },
                );
            }
            9 => {
                let handshake = fields[5].parse::<u64>().ok().filter(|h| *h > 0);
                let peer = PeerStatus {
                    public_key: fields[1].to_string(),
                    endpoint: none_if_placeholder(fields[3]),
                    allowed_ips: none_if_placeholder(fields[4])
                        .map(|a| a.split(',').map(String::from).collect())
                        .unwrap_or_default(),
                    latest_handshake: handshake,
                    rx_bytes: fields[6].parse().unwrap_or(0),
                    tx_bytes: fields[7].parse().unwrap_or(0),
                    persistent_keepalive: fields[8].parse().ok(),
                    online: handshake
                        .map(|h| now.saturating_sub(h) < ONLINE_HANDSHAKE_SECS)
                        .unwrap_or(false),
                    router_id: None,
                    router_name: None,
                };
                if let Some(iface) = interfaces.get_mut(fields[0]) {
                    iface.peers.push(peer);
                }
            }
            _ if line.trim().is_empty() => {}
            n => debug!("Skipping dump line with {} fields", n),
        }
    }

    interfaces.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "wg-net1\tcHJpdg==\tcHVi\t51820\toff\n\
wg-net1\tcGVlcjE=\t(none)\t203.0.113.5:40000\t10.8.0.2/32\t1000\t2048\t4096\toff\n\
wg-net1\tcGVlcjI=\t(none)\t(none)\t10.8.0.3/32\t0\t0\t0\t25\n";

    #[test]
    fn test_parse_dump() {
        let interfaces = parse_dump(DUMP, 1100);
        assert_eq!(interfaces.len(), 1);

        let iface = &interfaces[0];
        assert_eq!(iface.name, "wg-net1");
        assert_eq!(iface.listen_port, Some(51820));
        assert_eq!(iface.peers.len(), 2);

        let first = &iface.peers[0];
        assert_eq!(first.endpoint.as_deref(), Some("203.0.113.5:40000"));
        assert_eq!(first.rx_bytes, 2048);
        assert_eq!(first.tx_bytes, 4096);
        assert!(first.online);

        let second = &iface.peers[1];
        assert_eq!(second.latest_handshake, None);
        assert!(!second.online);
        assert_eq!(second.persistent_keepalive, Some(25));
    }

    #[test]
    fn test_stale_handshake_is_offline() {
        let interfaces = parse_dump(DUMP, 1000 + ONLINE_HANDSHAKE_SECS);
        assert!(!interfaces[0].peers[0].online);
    }

    #[test]
    fn test_empty_dump() {
        assert!(parse_dump("", 0).is_empty());
    }
}
