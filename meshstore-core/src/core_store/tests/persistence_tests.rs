/*
    Persistence tests - NodeStore state across close and reopen
*/

use crate::core_store::model::Value;
use crate::core_store::node_store::{NodeStore, RecordMeta};
use crate::core_store::store::DurableStoreOptions;
use crate::events::EventBroadcaster;
use serde_json::json;
use std::path::Path;
use tempfile::tempdir;

fn open(path: &Path, options: DurableStoreOptions) -> NodeStore {
    let store = NodeStore::new(path, "replica", EventBroadcaster::new(16), options);
    store.initialize().unwrap();
    store
}

#[test]
fn test_put_close_reopen_get() {
    let dir = tempdir().unwrap();

    let store = open(dir.path(), DurableStoreOptions::default());
    store.put("id", "p1", Value::from("v")).unwrap();
    store.close().unwrap();

    let store = open(dir.path(), DurableStoreOptions::default());
    assert_eq!(store.get("id").unwrap().unwrap().data, Value::from("v"));
}

#[test]
fn test_reopen_after_unclean_shutdown() {
    let dir = tempdir().unwrap();
    {
        let store = open(dir.path(), DurableStoreOptions::default());
        store.put("a", "p1", Value::from(json!({"x": 1}))).unwrap();
        store.put("a", "p1", Value::from(json!({"x": 2}))).unwrap();
        // dropped without close
    }

    let store = open(dir.path(), DurableStoreOptions::default());
    let record = store.get("a").unwrap().unwrap();
    assert_eq!(record.data, Value::from(json!({"x": 2})));
    assert_eq!(record.vector_clock.get("p1"), 2);
}

#[test]
fn test_tombstones_and_metadata_survive() {
    let dir = tempdir().unwrap();
    let options = DurableStoreOptions { snapshot_interval: 3, keep_snapshots: 1 };

    let store = open(dir.path(), options.clone());
    store
        .put_with(
            "doc",
            "p1",
            Value::from(json!({"body": "hi"})),
            RecordMeta { record_type: Some("note".into()), vector: Some(vec![0.1, 0.2]) },
        )
        .unwrap();
    store.put("gone", "p1", Value::Null).unwrap();
    store.delete("gone").unwrap();
    store.put("later", "p1", Value::from(3)).unwrap();
    store.close().unwrap();

    let store = open(dir.path(), options);
    let doc = store.get("doc").unwrap().unwrap();
    assert_eq!(doc.record_type.as_deref(), Some("note"));
    assert_eq!(doc.vector, Some(vec![0.1, 0.2]));
    assert!(store.get("gone").unwrap().is_none());

    let all = store.snapshot_all().unwrap();
    let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["doc", "gone", "later"]);
    assert!(all[1].is_tombstone());
}

#[test]
fn test_clock_continues_after_reopen() {
    let dir = tempdir().unwrap();

    let store = open(dir.path(), DurableStoreOptions::default());
    store.put("x", "p1", Value::from(1)).unwrap();
    store.close().unwrap();

    let store = open(dir.path(), DurableStoreOptions::default());
    store.put("x", "p1", Value::from(2)).unwrap();
    assert_eq!(store.get("x").unwrap().unwrap().vector_clock.get("p1"), 2);
}

#[test]
fn test_writes_after_crash_tail_are_kept() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), DurableStoreOptions::default());
    store.put("a", "p1", Value::from("first")).unwrap();
    drop(store);

    // Half-written entry left by a crash
    let log_path = dir.path().join("commit.log");
    let mut bytes = std::fs::read(&log_path).unwrap();
    bytes.extend_from_slice(&[9, 9, 9, 9, 9, 9]);
    std::fs::write(&log_path, bytes).unwrap();

    let store = open(dir.path(), DurableStoreOptions::default());
    assert!(store.get("a").unwrap().is_some());
    store.put("b", "p1", Value::from("second")).unwrap();
    drop(store);

    let store = open(dir.path(), DurableStoreOptions::default());
    assert!(store.get("a").unwrap().is_some());
    assert_eq!(store.get("b").unwrap().unwrap().data, Value::from("second"));
}
