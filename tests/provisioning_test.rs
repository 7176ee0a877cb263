//! End-to-end provisioning against in-memory host capabilities

mod common;

use common::Harness;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use wg_provisioner::config::PrivateKeyPolicy;
use wg_provisioner::wireguard::PrivateKey;
use wg_provisioner::{ErrorKind, ProvisionOptions, Step};

fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 8, 0, last)
}

#[tokio::test]
async fn test_first_fit_allocation_and_reuse() {
    let h = Harness::new().await;
    let p = &h.provisioner;

    let a = p
        .provision_peer("router-a", ProvisionOptions::default())
        .await
        .unwrap();
    assert_eq!(a.address, addr(2));

    let b = p
        .provision_peer("router-b", ProvisionOptions::default())
        .await
        .unwrap();
    assert_eq!(b.address, addr(3));

    assert!(p.remove_peer("router-a").await.unwrap());

    let c = p
        .provision_peer("router-c", ProvisionOptions::default())
        .await
        .unwrap();
    assert_eq!(c.address, addr(2));
}

#[tokio::test]
async fn test_unmanaged_router_has_no_side_effects() {
    let h = Harness::new().await;

    let err = h
        .provisioner
        .provision_peer("router-x", ProvisionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotManaged);
    assert_eq!(err.step(), Some(Step::Authorize));

    assert!(h.wireguard.interface_names().is_empty());
    assert!(!h.provisioner.allocator().is_registered("net-1"));
    assert_eq!(h.firewall.mutations(), 0);
    assert!(!h.config.wireguard.state_dir.join("wg-net1.json").exists());
}

#[tokio::test]
async fn test_provisioned_document() {
    let h = Harness::new().await;
    let peer = h
        .provisioner
        .provision_peer("router-a", ProvisionOptions::default())
        .await
        .unwrap();

    assert_eq!(peer.server.interface, "wg-net1");
    assert_eq!(peer.server.endpoint, "vpn.example.com:51820");
    assert_eq!(peer.server.address, "10.8.0.1/24");

    let expected = format!(
        "# Router: router-a-name\n\
         \n\
         [Interface]\n\
         PrivateKey = {}\n\
         Address = 10.8.0.2/24\n\
         \n\
         [Peer]\n\
         PublicKey = {}\n\
         Endpoint = vpn.example.com:51820\n\
         AllowedIPs = 10.8.0.0/24\n\
         PersistentKeepalive = 25\n",
        peer.private_key, peer.server.public_key
    );
    assert_eq!(peer.config, expected);

    let iface = h.wireguard.interface("wg-net1").unwrap();
    let server_side = &iface.peers()[&peer.public_key];
    assert_eq!(server_side.allowed_ips, vec!["10.8.0.2/32".to_string()]);
}

#[tokio::test]
async fn test_get_config_is_deterministic() {
    let h = Harness::with_config(|c| c.wireguard.private_key_policy = PrivateKeyPolicy::Retain).await;
    let peer = h
        .provisioner
        .provision_peer("router-a", ProvisionOptions::default())
        .await
        .unwrap();

    let first = h.provisioner.get_config("router-a").await.unwrap();
    let second = h.provisioner.get_config("router-a").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, peer.config);
}

#[tokio::test]
async fn test_get_config_without_peer_is_not_found() {
    let h = Harness::new().await;
    let err = h.provisioner.get_config("router-a").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_ensure_interface_is_idempotent() {
    let h = Harness::new().await;

    let first = h.provisioner.ensure_interface("net-1").await.unwrap();
    let state = h.wireguard.interface("wg-net1").unwrap();
    let rules = h.firewall.rule_count();

    let second = h.provisioner.ensure_interface("net-1").await.unwrap();
    assert!(first.created);
    assert!(!second.created);
    assert!(!second.firewall.changed());
    assert_eq!(first.public_key, second.public_key);
    assert_eq!(state, h.wireguard.interface("wg-net1").unwrap());
    assert_eq!(rules, h.firewall.rule_count());
}

#[tokio::test]
async fn test_firewall_reapply_keeps_rule_count() {
    let h = Harness::new().await;
    h.provisioner
        .provision_peer(
            "router-a",
            ProvisionOptions {
                allowed_networks: vec!["192.168.10.0/24".to_string()],
                requested_address: None,
            },
        )
        .await
        .unwrap();
    let rules = h.firewall.rule_count();
    assert!(rules > 0);

    h.provisioner.ensure_interface("net-1").await.unwrap();
    h.provisioner.ensure_interface("net-1").await.unwrap();
    assert_eq!(h.firewall.rule_count(), rules);
}

#[tokio::test]
async fn test_remove_interface() {
    let h = Harness::new().await;
    assert!(!h.provisioner.remove_interface("net-1").await.unwrap());

    h.provisioner
        .provision_peer("router-a", ProvisionOptions::default())
        .await
        .unwrap();
    assert!(h.provisioner.remove_interface("net-1").await.unwrap());
    assert!(h.wireguard.interface("wg-net1").is_none());
    assert_eq!(h.firewall.rule_count(), 0);
    assert!(!h.config.wireguard.state_dir.join("wg-net1.key").exists());

    assert!(!h.provisioner.remove_interface("net-1").await.unwrap());

    let again = h
        .provisioner
        .provision_peer("router-b", ProvisionOptions::default())
        .await
        .unwrap();
    assert_eq!(again.address, addr(2));
}

#[tokio::test]
async fn test_remove_unknown_peer_is_noop() {
    let h = Harness::new().await;
    assert!(!h.provisioner.remove_peer("router-a").await.unwrap());

    h.provisioner
        .provision_peer("router-a", ProvisionOptions::default())
        .await
        .unwrap();
    assert!(!h.provisioner.remove_peer("router-b").await.unwrap());
    assert!(h.provisioner.remove_peer("router-a").await.unwrap());
    assert!(!h.provisioner.remove_peer("router-a").await.unwrap());
}

#[tokio::test]
async fn test_teardown_when_empty() {
    let h = Harness::with_config(|c| c.wireguard.teardown_when_empty = true).await;
    h.provisioner
        .provision_peer("router-a", ProvisionOptions::default())
        .await
        .unwrap();
    h.provisioner
        .provision_peer("router-b", ProvisionOptions::default())
        .await
        .unwrap();

    h.provisioner.remove_peer("router-a").await.unwrap();
    assert!(h.wireguard.interface("wg-net1").is_some());

    h.provisioner.remove_peer("router-b").await.unwrap();
    assert!(h.wireguard.interface("wg-net1").is_none());
    assert_eq!(h.firewall.rule_count(), 0);
}

#[tokio::test]
async fn test_concurrent_provisioning_yields_unique_addresses() {
    let h = Harness::new().await;

    let mut tasks = Vec::new();
    for router in ["router-a", "router-b", "router-c"] {
        let p = h.provisioner.clone();
        tasks.push(tokio::spawn(async move {
            p.provision_peer(router, ProvisionOptions::default()).await
        }));
    }

    let mut addresses = HashSet::new();
    for task in tasks {
        let peer = task.await.unwrap().unwrap();
        assert!(addresses.insert(peer.address));
    }
    let expected: HashSet<Ipv4Addr> = [addr(2), addr(3), addr(4)].into_iter().collect();
    assert_eq!(addresses, expected);
    assert_eq!(h.wireguard.interface("wg-net1").unwrap().peers().len(), 3);
}

#[tokio::test]
async fn test_allocations_survive_restart() {
    let h = Harness::new().await;
    h.provisioner
        .provision_peer("router-a", ProvisionOptions::default())
        .await
        .unwrap();
    h.provisioner
        .provision_peer("router-b", ProvisionOptions::default())
        .await
        .unwrap();

    let restarted = h.restart().await;
    let c = restarted
        .provision_peer("router-c", ProvisionOptions::default())
        .await
        .unwrap();
    assert_eq!(c.address, addr(4));
}

#[tokio::test]
async fn test_failed_sync_keeps_ownership() {
    let h = Harness::new().await;
    h.directory.set_unavailable(true);

    let err = h.provisioner.sync_now().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DirectoryUnavailable);
    assert!(h.provisioner.cache().is_router_managed("router-a"));
    assert!(h.provisioner.cache().is_network_managed("net-1"));

    let status = h.provisioner.get_status().await.unwrap();
    assert_eq!(status.sync.consecutive_failures, 1);
    assert!(status.sync.last_success.is_some());
}

#[tokio::test]
async fn test_lost_server_key_keeps_link_and_documents_in_step() {
    let h = Harness::new().await;
    let a = h
        .provisioner
        .provision_peer("router-a", ProvisionOptions::default())
        .await
        .unwrap();
    std::fs::write(h.config.wireguard.state_dir.join("wg-net1.key"), "garbage").unwrap();

    let b = h
        .provisioner
        .provision_peer("router-b", ProvisionOptions::default())
        .await
        .unwrap();
    assert_ne!(a.server.public_key, b.server.public_key);

    let iface = h.wireguard.interface("wg-net1").unwrap();
    let running = PrivateKey::from_base64(iface.private_key.as_deref().unwrap()).unwrap();
    assert_eq!(running.public_key().to_base64(), b.server.public_key);
    assert_eq!(iface.peers().len(), 2);

    let config = h.provisioner.get_config("router-b").await.unwrap();
    assert!(config.contains(&format!("PublicKey = {}", b.server.public_key)));
}
