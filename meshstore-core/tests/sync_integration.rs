//! Two databases replicating over real transports

mod common;

use common::*;
use meshstore_core::core_sync::RelayServer;
use meshstore_core::{ChangeEvent, Database, SyncError, TransportMode, Value};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

/// Open A, enable sync, then open B bootstrapped from A's listener
async fn direct_pair(dir_a: &TempDir, dir_b: &TempDir) -> (Database, Database) {
    let a = Database::open(direct_config(dir_a, vec![])).unwrap();
    a.enable_sync(KEY).await.unwrap();
    let a_addr = a.listen_addr().await.expect("direct backend listens");

    let b = Database::open(direct_config(dir_b, vec![a_addr])).unwrap();
    (a, b)
}

#[tokio::test]
async fn test_direct_peers_converge_on_concurrent_writes() {
    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let (a, b) = direct_pair(&dir_a, &dir_b).await;

    // Written before B joins, so neither write has seen the other
    a.put("shared", Value::from(json!({"author": "a", "only_a": 1}))).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    b.put("shared", Value::from(json!({"author": "b", "only_b": 2}))).unwrap();
    a.put("from-a", Value::from(json!({"n": 1}))).unwrap();

    b.enable_sync(KEY).await.unwrap();
    wait_for_peer(&a, b.peer_id()).await;

    eventually("records to converge", || {
        let on_a = a.get("shared").unwrap();
        on_a.is_some() && on_a == b.get("shared").unwrap() && b.get("from-a").unwrap().is_some()
    })
    .await;

    // The later write wins wholesale
    let winner = a.get("shared").unwrap().unwrap();
    assert_eq!(winner.data, Value::from(json!({"author": "b", "only_b": 2})));
    assert_eq!(winner.vector_clock.get(a.peer_id()), 1);
    assert_eq!(winner.vector_clock.get(b.peer_id()), 1);

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_direct_live_updates_and_deletes() {
    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let (a, b) = direct_pair(&dir_a, &dir_b).await;
    b.enable_sync(KEY).await.unwrap();
    wait_for_peer(&b, a.peer_id()).await;

    b.put("live", Value::from(json!({"v": 1}))).unwrap();
    eventually("put to reach A", || a.get("live").unwrap().is_some()).await;

    a.delete("live").unwrap();
    eventually("delete to reach B", || b.get("live").unwrap().is_none()).await;

    // The tombstone keeps a stale replay from resurrecting the record
    let stale = Value::from(json!({"v": 0}));
    let tombstone_ts = b.store().snapshot_all().unwrap()[0].timestamp;
    let mut replay = meshstore_core::Record::new("live", stale, tombstone_ts - 1);
    replay.vector_clock.increment("ghost");
    b.store()
        .apply_remote(replay, meshstore_core::EventSource::remote("ghost", None))
        .unwrap();
    assert!(b.get("live").unwrap().is_none());
}

#[tokio::test]
async fn test_disable_sync_disconnects_peers() {
    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let (a, b) = direct_pair(&dir_a, &dir_b).await;
    let mut a_events = a.subscribe();

    b.enable_sync(KEY).await.unwrap();
    let b_id = b.peer_id().to_string();
    next_event(&mut a_events, |e| matches!(e, ChangeEvent::PeerConnected { peer_id } if *peer_id == b_id)).await;

    b.disable_sync().await.unwrap();
    assert!(b.status().await.peers.is_empty());
    assert!(b.listen_addr().await.is_none());

    next_event(&mut a_events, |e| matches!(e, ChangeEvent::PeerDisconnected { peer_id } if *peer_id == b_id)).await;

    // Writes while apart still arrive after rejoining
    b.put("while-apart", Value::from(json!({"v": 1}))).unwrap();
    b.enable_sync(KEY).await.unwrap();
    eventually("catch-up after rejoin", || a.get("while-apart").unwrap().is_some()).await;
}

#[tokio::test]
async fn test_relay_peers_converge() {
    let server = RelayServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let relay = server.local_addr().unwrap();
    let _relay_task = server.spawn();

    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let a = Database::open(relay_config(&dir_a, relay)).unwrap();
    let b = Database::open(relay_config(&dir_b, relay)).unwrap();

    a.put("before", Value::from(json!({"v": "a"}))).unwrap();
    a.enable_sync(KEY).await.unwrap();
    b.enable_sync(KEY).await.unwrap();

    let status = b.status().await;
    assert_eq!(status.transport, Some("relay"));
    assert!(status.listen_addr.is_none());

    eventually("initial sync over relay", || b.get("before").unwrap().is_some()).await;

    // Large enough to need several encrypted chunks
    let blob = "x".repeat(150_000);
    b.put("big", Value::from(json!({"blob": blob}))).unwrap();
    eventually("large record over relay", || a.get("big").unwrap().is_some()).await;
    assert_eq!(a.get("big").unwrap(), b.get("big").unwrap());

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_different_keys_do_not_mix() {
    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let (a, b) = direct_pair(&dir_a, &dir_b).await;
    let other_key = "1111111111111111111111111111111111111111111111111111111111111111";

    b.put("private", Value::from(json!({"v": 1}))).unwrap();
    b.enable_sync(other_key).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(a.get("private").unwrap().is_none());
    assert!(a.status().await.peers.is_empty());
}

#[tokio::test]
async fn test_disabled_transport_is_local_only() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(&dir, TransportMode::Disabled)).unwrap();

    db.enable_sync(KEY).await.unwrap();
    db.put("local", Value::from(json!({"v": 1}))).unwrap();

    let status = db.status().await;
    assert!(status.enabled);
    assert_eq!(status.transport, Some("disabled"));
    assert!(status.peers.is_empty());
    assert!(db.get("local").unwrap().is_some());
}

#[tokio::test]
async fn test_invalid_key_fails_fast() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(direct_config(&dir, vec![])).unwrap();

    let result = db.enable_sync("not-a-key").await;
    assert!(matches!(result, Err(SyncError::InvalidKey(_))));
    // Nothing was bound
    assert!(db.listen_addr().await.is_none());
}
