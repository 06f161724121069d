//! Helpers shared by the integration suites

#![allow(dead_code)]

use meshstore_core::{ChangeEvent, Config, Database, Subscription, TransportMode};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;

pub const KEY: &str = "7d1a54127b222502f5b79b5fb0803061152a44f92b37e23c6527baf665d4da9a";

pub const SETTLE: Duration = Duration::from_secs(10);

/// Config for a database in `dir` syncing over `mode`, tuned for fast tests
pub fn config(dir: &TempDir, mode: TransportMode) -> Config {
    let mut config = Config::default();
    config.store.data_dir = dir.path().to_path_buf();
    config.sync.mode = mode;
    config.sync.listen_address = "127.0.0.1:0".parse().unwrap();
    config.sync.refresh_interval = Duration::from_millis(100);
    config.sync.timeout_ms = 3_000;
    config
}

pub fn direct_config(dir: &TempDir, bootstrap: Vec<SocketAddr>) -> Config {
    let mut config = config(dir, TransportMode::Direct);
    config.sync.bootstrap_peers = bootstrap;
    config
}

pub fn relay_config(dir: &TempDir, relay: SocketAddr) -> Config {
    let mut config = config(dir, TransportMode::Relay);
    config.sync.relay_address = Some(relay.to_string());
    config
}

/// Poll `check` until it holds or `SETTLE` passes
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let settled = tokio::time::timeout(SETTLE, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(settled.is_ok(), "timed out waiting for {}", what);
}

/// Wait until `db` reports `peer` as connected
pub async fn wait_for_peer(db: &Database, peer: &str) {
    let settled = tokio::time::timeout(SETTLE, async {
        while !db.status().await.peers.iter().any(|p| p == peer) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(settled.is_ok(), "{} never connected to {}", db.peer_id(), peer);
}

/// Next event matching `pred`
pub async fn next_event(sub: &mut Subscription, mut pred: impl FnMut(&ChangeEvent) -> bool) -> ChangeEvent {
    tokio::time::timeout(SETTLE, async {
        loop {
            match sub.next().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => panic!("subscription closed"),
            }
        }
    })
    .await
    .expect("event did not arrive")
}
