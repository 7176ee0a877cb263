//! Prometheus text exposition
//!
//! Metrics are derived from a status report on every scrape; nothing is
//! accumulated in process.

use crate::provisioner::ServiceStatus;
use std::fmt::Write;

/// Exported metric families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    /// Build information
    Info,
    /// Managed interfaces present on the host
    Interfaces,
    /// Peers per interface
    Peers,
    /// Peers with a recent handshake per interface
    PeersOnline,
    /// Bytes received from a peer
    PeerRxBytes,
    /// Bytes sent to a peer
    PeerTxBytes,
    /// Last handshake of a peer
    PeerLastHandshake,
    /// Last successful synchronization
    SyncLastSuccess,
    /// Consecutive failed synchronizations
    SyncFailures,
    /// Networks owned by this instance
    ManagedNetworks,
    /// Routers owned by this instance
    ManagedRouters,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "wg_provisioner_info"),
            Self::Interfaces => write!(f, "wg_provisioner_interfaces"),
            Self::Peers => write!(f, "wg_provisioner_peers"),
            Self::PeersOnline => write!(f, "wg_provisioner_peers_online"),
            Self::PeerRxBytes => write!(f, "wg_provisioner_peer_rx_bytes_total"),
            Self::PeerTxBytes => write!(f, "wg_provisioner_peer_tx_bytes_total"),
            Self::PeerLastHandshake => write!(f, "wg_provisioner_peer_last_handshake_seconds"),
            Self::SyncLastSuccess => write!(f, "wg_provisioner_sync_last_success_seconds"),
            Self::SyncFailures => write!(f, "wg_provisioner_sync_consecutive_failures"),
            Self::ManagedNetworks => write!(f, "wg_provisioner_managed_networks"),
            Self::ManagedRouters => write!(f, "wg_provisioner_managed_routers"),
        }
    }
}

impl MetricType {
    /// Get metric help text
    pub fn help_text(&self) -> &'static str {
        match self {
            Self::Info => "Provisioner build information",
            Self::Interfaces => "Managed WireGuard interfaces present on the host",
            Self::Peers => "Peers attached to the interface",
            Self::PeersOnline => "Peers with a handshake in the last 180 seconds",
            Self::PeerRxBytes => "Bytes received from the peer",
            Self::PeerTxBytes => "Bytes sent to the peer",
            Self::PeerLastHandshake => "Unix time of the peer's last handshake",
            Self::SyncLastSuccess => "Unix time of the last successful resource sync",
            Self::SyncFailures => "Resource sync failures since the last success",
            Self::ManagedNetworks => "Networks owned by this instance",
            Self::ManagedRouters => "Routers owned by this instance",
        }
    }

    /// Get metric type (counter, gauge)
    pub fn metric_kind(&self) -> &'static str {
        match self {
            Self::PeerRxBytes | Self::PeerTxBytes => "counter",
            _ => "gauge",
        }
    }
}

fn header(out: &mut String, metric: MetricType) {
    let _ = writeln!(out, "# HELP {} {}", metric, metric.help_text());
    let _ = writeln!(out, "# TYPE {} {}", metric, metric.metric_kind());
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Export a status report in Prometheus text format
pub fn export_prometheus(status: &ServiceStatus, version: &str) -> String {
    let mut out = String::new();
    let instance = escape(&status.instance_id);

    header(&mut out, MetricType::Info);
    let _ = writeln!(
        out,
        "{}{{version=\"{}\",instance=\"{}\"}} 1",
        MetricType::Info,
        escape(version),
        instance
    );

    header(&mut out, MetricType::ManagedNetworks);
    let _ = writeln!(out, "{} {}", MetricType::ManagedNetworks, status.managed_networks);
    header(&mut out, MetricType::ManagedRouters);
    let _ = writeln!(out, "{} {}", MetricType::ManagedRouters, status.managed_routers);

    header(&mut out, MetricType::SyncLastSuccess);
    let last_success = status
        .sync
        .last_success
        .map(|t| t.timestamp())
        .unwrap_or(0);
    let _ = writeln!(out, "{} {}", MetricType::SyncLastSuccess, last_success);
    header(&mut out, MetricType::SyncFailures);
    let _ = writeln!(
        out,
        "{} {}",
        MetricType::SyncFailures,
        status.sync.consecutive_failures
    );

    header(&mut out, MetricType::Interfaces);
    let _ = writeln!(out, "{} {}", MetricType::Interfaces, status.interfaces.len());

    header(&mut out, MetricType::Peers);
    for iface in &status.interfaces {
        let _ = writeln!(
            out,
            "{}{{interface=\"{}\"}} {}",
            MetricType::Peers,
            escape(&iface.name),
            iface.peers.len()
        );
    }
    header(&mut out, MetricType::PeersOnline);
    for iface in &status.interfaces {
        let online = iface.peers.iter().filter(|p| p.online).count();
        let _ = writeln!(
            out,
            "{}{{interface=\"{}\"}} {}",
            MetricType::PeersOnline,
            escape(&iface.name),
            online
        );
    }

    for metric in [
        MetricType::PeerRxBytes,
        MetricType::PeerTxBytes,
        MetricType::PeerLastHandshake,
    ] {
        header(&mut out, metric);
        for iface in &status.interfaces {
            for peer in &iface.peers {
                let value = match metric {
                    MetricType::PeerRxBytes => peer.rx_bytes,
                    MetricType::PeerTxBytes => peer.tx_bytes,
                    _ => peer.latest_handshake.unwrap_or(0),
                };
                let router = peer.router_id.as_deref().unwrap_or("");
                let _ = writeln!(
                    out,
                    "{}{{interface=\"{}\",router=\"{}\"}} {}",
                    metric,
                    escape(&iface.name),
                    escape(router),
                    value
                );
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::SyncStatus;
    use crate::wireguard::{InterfaceStatus, PeerStatus};

    fn status() -> ServiceStatus {
        ServiceStatus {
            instance_id: "vpn-1".to_string(),
            accepting: true,
            managed_networks: 1,
            managed_routers: 2,
            sync: SyncStatus::default(),
            interfaces: vec![InterfaceStatus {
                name: "wg-net1".to_string(),
                public_key: None,
                listen_port: Some(51820),
                network_id: Some("net-1".to_string()),
                peers: vec![PeerStatus {
                    public_key: "cGVlcg==".to_string(),
                    endpoint: None,
                    allowed_ips: vec!["10.8.0.2/32".to_string()],
                    latest_handshake: Some(1_700_000_000),
                    rx_bytes: 1024,
                    tx_bytes: 2048,
                    persistent_keepalive: None,
                    online: true,
                    router_id: Some("router-a".to_string()),
                    router_name: None,
                }],
            }],
        }
    }

    #[test]
    fn test_metric_type_display() {
        assert_eq!(
            MetricType::PeerRxBytes.to_string(),
            "wg_provisioner_peer_rx_bytes_total"
        );
        assert_eq!(MetricType::PeerRxBytes.metric_kind(), "counter");
    }

    #[test]
    fn test_prometheus_export() {
        let output = export_prometheus(&status(), "0.1.0");
        assert!(output.contains("wg_provisioner_info{version=\"0.1.0\",instance=\"vpn-1\"} 1"));
        assert!(output.contains("wg_provisioner_managed_routers 2"));
        assert!(output.contains("wg_provisioner_peers_online{interface=\"wg-net1\"} 1"));
        assert!(output.contains(
            "wg_provisioner_peer_tx_bytes_total{interface=\"wg-net1\",router=\"router-a\"} 2048"
        ));
        assert!(output.contains("wg_provisioner_sync_last_success_seconds 0"));
    }

    #[test]
    fn test_label_escaping() {
        assert_eq!(escape("a\"b"), "a\\\"b");
    }
}
