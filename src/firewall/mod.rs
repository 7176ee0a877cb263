//! Firewall rules for WireGuard interfaces
//!
//! The rule set of an interface is always computed in full from its
//! record. Every rule carries the comment `wgp:<iface>:<rule-id>`; applying
//! lists the tagged rules present, deletes the ones that are no longer
//! wanted (or differ) and appends the missing ones. Reapplying an
//! unchanged set issues no commands.

use crate::error::Result;
use crate::system::{parse_rule_line, FirewallControl};
use crate::wireguard::InterfaceRecord;
use ipnet::Ipv4Net;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument};

const FILTER: &str = "filter";
const NAT: &str = "nat";

/// Chains the applier owns rules in
const MANAGED_CHAINS: [(&str, &str); 4] = [
    (FILTER, "INPUT"),
    (FILTER, "OUTPUT"),
    (FILTER, "FORWARD"),
    (NAT, "POSTROUTING"),
];

/// One tagged rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// iptables table
    pub table: &'static str,
    /// Chain within the table
    pub chain: &'static str,
    /// Comment tag identifying the rule
    pub tag: String,
    /// Arguments following `-A <chain>`, comment included
    pub args: Vec<String>,
}

/// Everything the rule set of one interface depends on
#[derive(Debug, Clone)]
pub struct InterfaceFirewall<'a> {
    /// Interface name
    pub interface: &'a str,
    /// WireGuard listen port
    pub listen_port: u16,
    /// Network CIDR
    pub network: Ipv4Net,
    /// Union of attached peers' allowed networks
    pub allowed_networks: &'a BTreeSet<String>,
}

/// Comment prefix shared by every rule of `interface`
pub fn tag_prefix(interface: &str) -> String {
    format!("wgp:{}:", interface)
}

fn rule(
    table: &'static str,
    chain: &'static str,
    interface: &str,
    id: &str,
    matches: &[&str],
    target: &str,
) -> Rule {
    let tag = format!("{}{}", tag_prefix(interface), id);
    let mut args: Vec<String> = matches.iter().map(|s| s.to_string()).collect();
    args.extend(
        ["-m", "comment", "--comment", tag.as_str(), "-j", target]
            .iter()
            .map(|s| s.to_string()),
    );
    Rule {
        table,
        chain,
        tag,
        args,
    }
}

/// Compute the full rule set for an interface.
///
/// Match arguments follow the order `iptables -S` prints them in, so listed
/// rules compare equal to computed ones.
pub fn compute_rules(fw: &InterfaceFirewall<'_>, masquerade_interface: Option<&str>) -> Vec<Rule> {
    let iface = fw.interface;
    let port = fw.listen_port.to_string();
    let network = fw.network.trunc().to_string();

    let mut rules = vec![
        rule(FILTER, "INPUT", iface, "input-udp", &["-p", "udp", "-m", "udp", "--dport", &port], "ACCEPT"),
        rule(FILTER, "INPUT", iface, "input", &["-i", iface], "ACCEPT"),
        rule(FILTER, "OUTPUT", iface, "output", &["-o", iface], "ACCEPT"),
        rule(FILTER, "FORWARD", iface, "forward-in", &["-s", &network, "-i", iface], "ACCEPT"),
        rule(FILTER, "FORWARD", iface, "forward-out", &["-d", &network, "-o", iface], "ACCEPT"),
    ];

    for cidr in fw.allowed_networks {
        if *cidr == network {
            continue;
        }
        rules.push(rule(
            FILTER,
            "FORWARD",
            iface,
            &format!("from-{}", cidr),
            &["-s", cidr, "-i", iface],
            "ACCEPT",
        ));
        rules.push(rule(
            FILTER,
            "FORWARD",
            iface,
            &format!("to-{}", cidr),
            &["-d", cidr, "-o", iface],
            "ACCEPT",
        ));
    }

    if let Some(out) = masquerade_interface {
        rules.push(rule(NAT, "POSTROUTING", iface, "masquerade", &["-s", &network, "-o", out], "MASQUERADE"));
    }

    rules
}

/// Outcome of an apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Rules appended
    pub added: usize,
    /// Rules deleted
    pub removed: usize,
    /// Rules already in place
    pub unchanged: usize,
}

impl ApplyReport {
    /// Whether the apply changed anything
    pub fn changed(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}

/// Applies interface rule sets through a firewall capability
pub struct FirewallApplier {
    control: Arc<dyn FirewallControl>,
    enabled: bool,
    masquerade_interface: Option<String>,
}

impl FirewallApplier {
    /// Create an applier; a disabled applier never touches the firewall
    pub fn new(
        control: Arc<dyn FirewallControl>,
        enabled: bool,
        masquerade_interface: Option<String>,
    ) -> Self {
        Self {
            control,
            enabled,
            masquerade_interface,
        }
    }

    /// Apply the rule set derived from an interface record
    pub async fn apply_record(&self, record: &InterfaceRecord) -> Result<ApplyReport> {
        let allowed = record.allowed_networks();
        self.apply(&InterfaceFirewall {
            interface: &record.name,
            listen_port: record.listen_port,
            network: record.cidr,
            allowed_networks: &allowed,
        })
        .await
    }

    /// Compute and apply the full rule set of an interface
    #[instrument(skip(self, fw), fields(interface = fw.interface))]
    pub async fn apply(&self, fw: &InterfaceFirewall<'_>) -> Result<ApplyReport> {
        if !self.enabled {
            return Ok(ApplyReport::default());
        }
        let desired = compute_rules(fw, self.masquerade_interface.as_deref());
        self.reconcile(fw.interface, desired).await
    }

    /// Delete every rule tagged for the interface
    pub async fn clear(&self, interface: &str) -> Result<ApplyReport> {
        if !self.enabled {
            return Ok(ApplyReport::default());
        }
        self.reconcile(interface, Vec::new()).await
    }

    async fn reconcile(&self, interface: &str, desired: Vec<Rule>) -> Result<ApplyReport> {
        let prefix = tag_prefix(interface);
        let mut report = ApplyReport::default();

        let mut wanted: HashMap<String, Rule> =
            desired.into_iter().map(|r| (r.tag.clone(), r)).collect();

        for (table, chain) in MANAGED_CHAINS {
            for line in self.control.list_rules(table, chain).await? {
                let Some((listed_chain, args)) = parse_rule_line(&line) else {
                    continue;
                };
                let Some(tag) = comment_of(&args) else {
                    continue;
                };
                if !tag.starts_with(&prefix) {
                    continue;
                }

                let keep = matches!(
                    wanted.get(tag),
                    Some(rule) if rule.table == table && rule.chain == listed_chain && rule.args == args
                );
                if keep {
                    // Matched once; a duplicate with the same tag is stale.
                    wanted.remove(tag);
                    report.unchanged += 1;
                } else {
                    debug!(table, chain = %listed_chain, tag, "Deleting stale rule");
                    self.control.delete_rule(table, &listed_chain, &args).await?;
                    report.removed += 1;
                }
            }
        }

        let mut missing: Vec<Rule> = wanted.into_values().collect();
        missing.sort_by(|a, b| a.tag.cmp(&b.tag));
        for rule in missing {
            debug!(table = rule.table, chain = rule.chain, tag = %rule.tag, "Appending rule");
            self.control
                .append_rule(rule.table, rule.chain, &rule.args)
                .await?;
            report.added += 1;
        }

        if report.changed() {
            info!(
                interface,
                added = report.added,
                removed = report.removed,
                "Firewall rules updated"
            );
        }
        Ok(report)
    }
}

fn comment_of(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|a| a == "--comment")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::system::memory::InMemoryFirewall;

    fn allowed(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn fw<'a>(allowed: &'a BTreeSet<String>) -> InterfaceFirewall<'a> {
        InterfaceFirewall {
            interface: "wg-net1",
            listen_port: 51820,
            network: "10.8.0.0/24".parse().unwrap(),
            allowed_networks: allowed,
        }
    }

    fn applier() -> (FirewallApplier, Arc<InMemoryFirewall>) {
        let control = Arc::new(InMemoryFirewall::new());
        (
            FirewallApplier::new(control.clone(), true, Some("eth0".to_string())),
            control,
        )
    }

    #[test]
    fn test_compute_rules_tags_every_rule() {
        let nets = allowed(&["192.168.10.0/24"]);
        let rules = compute_rules(&fw(&nets), None);
        assert_eq!(rules.len(), 7);
        assert!(rules.iter().all(|r| r.tag.starts_with("wgp:wg-net1:")));
        assert!(rules.iter().all(|r| r.args.contains(&r.tag)));
    }

    #[tokio::test]
    async fn test_reapply_is_noop() {
        let (applier, control) = applier();
        let nets = allowed(&["192.168.10.0/24"]);

        let first = applier.apply(&fw(&nets)).await.unwrap();
        assert_eq!(first.added, 8);
        let count = control.rule_count();
        let mutations = control.mutations();

        let second = applier.apply(&fw(&nets)).await.unwrap();
        assert!(!second.changed());
        assert_eq!(second.unchanged, 8);
        assert_eq!(control.rule_count(), count);
        assert_eq!(control.mutations(), mutations);
    }

    #[tokio::test]
    async fn test_removed_network_rules_are_deleted() {
        let (applier, control) = applier();
        let two = allowed(&["192.168.10.0/24", "192.168.20.0/24"]);
        let one = allowed(&["192.168.10.0/24"]);

        applier.apply(&fw(&two)).await.unwrap();
        let report = applier.apply(&fw(&one)).await.unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.added, 0);
        assert!(control.rules_matching("192.168.20.0/24").is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_and_foreign_rules() {
        let (applier, control) = applier();
        let nets = allowed(&[]);
        applier.apply(&fw(&nets)).await.unwrap();

        control.seed_rule(
            "filter",
            "-A INPUT -i wg-net1 -m comment --comment wgp:wg-net1:input -j ACCEPT",
        );
        control.seed_rule("filter", "-A INPUT -i eth0 -j ACCEPT");
        control.seed_rule(
            "filter",
            "-A INPUT -i wg-other -m comment --comment wgp:wg-other:input -j ACCEPT",
        );
        let before = control.rule_count();

        let report = applier.apply(&fw(&nets)).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(control.rule_count(), before - 1);
        assert_eq!(control.rules_matching("wg-other").len(), 1);
    }

    #[tokio::test]
    async fn test_clear_removes_only_interface_rules() {
        let (applier, control) = applier();
        let nets = allowed(&[]);
        applier.apply(&fw(&nets)).await.unwrap();
        control.seed_rule("filter", "-A INPUT -i eth0 -j ACCEPT");

        applier.clear("wg-net1").await.unwrap();
        assert_eq!(control.rule_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_applier_does_nothing() {
        let control = Arc::new(InMemoryFirewall::new());
        let applier = FirewallApplier::new(control.clone(), false, None);
        applier.apply(&fw(&allowed(&[]))).await.unwrap();
        assert_eq!(control.rule_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_surfaces_as_firewall_error() {
        let (applier, control) = applier();
        control.set_failing(true);
        let err = applier.apply(&fw(&allowed(&[]))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FirewallCommandFailed);
    }
}
