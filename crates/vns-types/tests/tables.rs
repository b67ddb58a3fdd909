//! Integration tests for the typed tables
//!
//! Each test runs engines against a shared in-memory store, the way
//! several agents share one coordination ensemble.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use vns_replicated::{EntryMode, SetChange};
use vns_store::{ensure_path, MemoryStore};
use vns_types::{DhcpLeaseMap, Ipv4Set, MacAddr, MacPortMap};

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn mac(text: &str) -> MacAddr {
    text.parse().unwrap()
}

#[tokio::test]
async fn test_mac_port_map_scenario() {
    let store = MemoryStore::with_sequence_start(101);
    let writer = MacPortMap::new(Arc::new(store.connect()), "/state/macs");
    let observer = MacPortMap::new(Arc::new(store.connect()), "/state/macs");
    writer.start().await.unwrap();
    observer.start().await.unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    observer.add_listener(move |mac: &MacAddr, old: Option<&Uuid>, new: Option<&Uuid>| {
        sink.lock().push((*mac, old.copied(), new.copied()));
    });

    let key = mac("AA-BB-CC-DD-EE-FF");
    let port = Uuid::new_v4();
    writer.put(key, port).await.unwrap();

    assert_eq!(
        store.children("/state/macs"),
        vec![format!("aa:bb:cc:dd:ee:ff,{},0000000101", port)]
    );
    assert!(wait_for(|| observer.get(&key) == Some(port)).await);
    assert_eq!(observer.macs_on_port(&port), vec![key]);

    writer.remove(&key).await.unwrap();
    assert!(wait_for(|| !observer.contains_key(&key)).await);
    assert!(wait_for(|| seen.lock().len() == 2).await);
    assert_eq!(
        *seen.lock(),
        vec![(key, None, Some(port)), (key, Some(port), None)]
    );
}

#[tokio::test]
async fn test_persistent_helpers_across_restart() {
    let store = MemoryStore::new();
    let key = mac("02:00:00:00:00:01");
    let port = Uuid::new_v4();

    {
        let admin = store.connect();
        ensure_path(&admin, "/bridges/br0/macs").await.unwrap();
        MacPortMap::add_persistent_entry(&admin, "/bridges/br0/macs", &key, &port)
            .await
            .unwrap();
        assert!(
            MacPortMap::has_persistent_entry(&admin, "/bridges/br0/macs", &key, &port)
                .await
                .unwrap()
        );
    }
    assert_eq!(store.session_count(), 0);

    let later = store.connect();
    let table = MacPortMap::get_as_map(&later, "/bridges/br0/macs").await.unwrap();
    assert_eq!(table.get(&key), Some(&port));

    let engine = MacPortMap::new(Arc::new(store.connect()), "/bridges/br0/macs");
    engine.start().await.unwrap();
    assert_eq!(engine.get(&key), Some(port));
    assert_eq!(engine.get_version(&key), Some(1));

    MacPortMap::delete_persistent_entry(&later, "/bridges/br0/macs", &key, &port)
        .await
        .unwrap();
    assert!(wait_for(|| !engine.contains_key(&key)).await);
    assert!(
        !MacPortMap::has_persistent_entry(&later, "/bridges/br0/macs", &key, &port)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_undecodable_entries_are_skipped() {
    let store = MemoryStore::new();
    let admin = store.connect();
    ensure_path(&admin, "/state/macs").await.unwrap();
    store
        .insert_raw("/state/macs/not-a-mac,6f1d2c1e-8a4b-4c39-9d3e-2f7b5a1c0e42,1", &[])
        .unwrap();
    store
        .insert_raw("/state/macs/aa:bb:cc:dd:ee:ff,not-a-uuid,1", &[])
        .unwrap();
    store
        .insert_raw(
            "/state/macs/aa:bb:cc:dd:ee:01,6f1d2c1e-8a4b-4c39-9d3e-2f7b5a1c0e42,1",
            &[],
        )
        .unwrap();

    let table = MacPortMap::new(Arc::new(store.connect()), "/state/macs");
    table.start().await.unwrap();
    assert_eq!(table.len(), 1);
    assert!(table.contains_key(&mac("aa:bb:cc:dd:ee:01")));
}

#[tokio::test]
async fn test_non_canonical_nodes_are_skipped() {
    let store = MemoryStore::new();
    let admin = store.connect();
    ensure_path(&admin, "/state/macs").await.unwrap();
    store
        .insert_raw("/state/macs/AA:BB:CC:DD:EE:FF,6f1d2c1e-8a4b-4c39-9d3e-2f7b5a1c0e42,1", &[])
        .unwrap();
    store
        .insert_raw(
            "/state/macs/aa:bb:cc:dd:ee:02,{6f1d2c1e-8a4b-4c39-9d3e-2f7b5a1c0e42},1",
            &[],
        )
        .unwrap();

    let port: Uuid = "6f1d2c1e-8a4b-4c39-9d3e-2f7b5a1c0e42".parse().unwrap();
    let upper = mac("aa:bb:cc:dd:ee:ff");
    let braced = mac("aa:bb:cc:dd:ee:02");

    let table = MacPortMap::new(Arc::new(store.connect()), "/state/macs");
    table.start().await.unwrap();
    assert!(table.is_empty());
    assert!(MacPortMap::get_as_map(&admin, "/state/macs").await.unwrap().is_empty());
    assert!(!MacPortMap::has_persistent_entry(&admin, "/state/macs", &upper, &port)
        .await
        .unwrap());

    MacPortMap::add_persistent_entry(&admin, "/state/macs", &braced, &port)
        .await
        .unwrap();
    assert!(wait_for(|| table.get(&braced) == Some(port)).await);
    assert!(MacPortMap::has_persistent_entry(&admin, "/state/macs", &braced, &port)
        .await
        .unwrap());
    assert!(!table.contains_key(&upper));
}

#[tokio::test]
async fn test_ipv4_set_modes() {
    let store = MemoryStore::new();
    let learned_dir = Arc::new(store.connect());
    let learned = Ipv4Set::new(learned_dir.clone(), "/groups/g1/ips", EntryMode::Ephemeral);
    let configured = Ipv4Set::new(Arc::new(store.connect()), "/groups/g1/ips", EntryMode::Persistent);
    let watcher = Ipv4Set::new(Arc::new(store.connect()), "/groups/g1/ips", EntryMode::Ephemeral);
    for set in [&learned, &configured, &watcher] {
        set.start().await.unwrap();
    }

    let changes = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = changes.clone();
    watcher.add_listener(move |ip: &Ipv4Addr, change| sink.lock().push((*ip, change)));

    let dynamic = Ipv4Addr::new(10, 0, 0, 1);
    let fixed = Ipv4Addr::new(10, 0, 0, 2);
    learned.add(dynamic).await.unwrap();
    configured.add(fixed).await.unwrap();
    assert!(wait_for(|| watcher.len() == 2).await);
    assert_eq!(watcher.elements(), HashSet::from([dynamic, fixed]));

    learned_dir.expire_session();
    assert!(wait_for(|| !watcher.contains(&dynamic)).await);
    assert!(watcher.contains(&fixed));

    assert!(wait_for(|| changes.lock().len() == 3).await);
    assert!(changes.lock().contains(&(dynamic, SetChange::Removed)));
    assert!(store.children("/groups/g1/ips").contains(&"10.0.0.2,,1".to_string()));
}

#[tokio::test]
async fn test_dhcp_lease_map() {
    let store = MemoryStore::new();
    let server_a = DhcpLeaseMap::new(Arc::new(store.connect()), "/dhcp/leases");
    let server_b = DhcpLeaseMap::new(Arc::new(store.connect()), "/dhcp/leases");
    server_a.start().await.unwrap();
    server_b.start().await.unwrap();

    let address = Ipv4Addr::new(192, 168, 1, 10);
    server_a.put(mac("aa:00:00:00:00:01"), address).await.unwrap();
    server_b.put(mac("aa:00:00:00:00:02"), address).await.unwrap();

    assert!(wait_for(|| server_a.holders_of(&address).len() == 2).await);
    let reader = store.connect();
    let leases = DhcpLeaseMap::get_as_map(&reader, "/dhcp/leases").await.unwrap();
    assert_eq!(leases.len(), 2);
    assert!(leases.values().all(|ip| *ip == address));
}
