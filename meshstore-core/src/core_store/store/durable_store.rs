/*
    durable_store.rs - Persistent record storage

    Owns the only physical copy of record state, keyed by record id.

    Architecture:
    - Append-only commit log for every put/delete
    - Periodic snapshots for fast rehydration
    - In-memory index in first-insertion order, rebuilt on open from the
      latest snapshot followed by the commit log
    - Close compacts: snapshot, then truncate the log
*/

use crate::core_store::model::Record;
use crate::core_store::store::commit_log::CommitLog;
use crate::core_store::store::errors::{StoreError, StoreResult};
use crate::core_store::store::snapshot::SnapshotManager;
use hashlink::LinkedHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Tuning for a durable store
#[derive(Debug, Clone)]
pub struct DurableStoreOptions {
    /// Logged operations between automatic snapshots
    pub snapshot_interval: usize,

    /// Snapshots kept on disk after compaction
    pub keep_snapshots: usize,
}

impl Default for DurableStoreOptions {
    fn default() -> Self {
        DurableStoreOptions { snapshot_interval: 1000, keep_snapshots: 2 }
    }
}

/// A mutation as written to the commit log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogOp {
    Put { record: Record },
    Delete { id: String },
}

/// Storage statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub records_count: usize,
    pub tombstones_count: usize,
    pub operation_count: usize,
    pub log_size: usize,
    pub snapshot_version: u64,
}

/// Handle to an opened store directory
pub struct DurableStore {
    path: PathBuf,
    options: DurableStoreOptions,
    records: LinkedHashMap<String, Record>,
    commit_log: Option<CommitLog>,
    snapshots: SnapshotManager,
    operation_count: usize,
}

impl DurableStore {
    /// Open or create a store at `path` with default options
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with(path, DurableStoreOptions::default())
    }

    /// Open or create a store at `path`
    pub fn open_with(path: impl AsRef<Path>, options: DurableStoreOptions) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let snapshots = SnapshotManager::new(path.join("snapshots"))?;
        let commit_log = CommitLog::new(path.join("commit.log"))?;

        let mut records = LinkedHashMap::new();
        if let Some(snapshot) = snapshots.load_latest()? {
            for record in snapshot.records {
                records.insert(record.id.clone(), record);
            }
        }

        let entries = commit_log.read_all()?;
        let replayed = entries.len();
        for entry in entries {
            let op: LogOp = serde_json::from_slice(&entry.data).map_err(|e| {
                StoreError::CorruptedData(format!("Undecodable log entry {}: {}", entry.seq, e))
            })?;
            Self::apply(&mut records, op);
        }

        info!(
            path = %path.display(),
            records = records.len(),
            replayed,
            snapshot_version = snapshots.current_version(),
            "Opened durable store"
        );

        Ok(DurableStore {
            path,
            options,
            records,
            commit_log: Some(commit_log),
            snapshots,
            operation_count: replayed,
        })
    }

    fn apply(records: &mut LinkedHashMap<String, Record>, op: LogOp) {
        match op {
            LogOp::Put { record } => {
                // get_mut keeps the entry in its original position
                if let Some(existing) = records.get_mut(&record.id) {
                    *existing = record;
                } else {
                    records.insert(record.id.clone(), record);
                }
            }
            LogOp::Delete { id } => {
                records.remove(&id);
            }
        }
    }

    fn log(&mut self) -> StoreResult<&mut CommitLog> {
        self.commit_log
            .as_mut()
            .ok_or_else(|| StoreError::NotReady(format!("{} is closed", self.path.display())))
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.commit_log.is_none() {
            return Err(StoreError::NotReady(format!("{} is closed", self.path.display())));
        }
        Ok(())
    }

    /// Fetch a record (tombstones included)
    pub fn get_node(&self, id: &str) -> StoreResult<Option<Record>> {
        self.ensure_open()?;
        Ok(self.records.get(id).cloned())
    }

    /// Insert or replace the record with `record.id`
    pub fn put_node(&mut self, record: Record) -> StoreResult<()> {
        let op = LogOp::Put { record };
        let data = serde_json::to_vec(&op)?;
        self.log()?.append(&data)?;

        Self::apply(&mut self.records, op);
        self.operation_count += 1;
        self.maybe_snapshot()
    }

    /// Physically remove a record; returns whether it existed
    pub fn delete_node(&mut self, id: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        if !self.records.contains_key(id) {
            return Ok(false);
        }

        let data = serde_json::to_vec(&LogOp::Delete { id: id.to_string() })?;
        self.log()?.append(&data)?;

        self.records.remove(id);
        self.operation_count += 1;
        self.maybe_snapshot()?;
        Ok(true)
    }

    /// All records (tombstones included) in first-insertion order
    pub fn list_nodes(&self) -> StoreResult<Vec<Record>> {
        self.ensure_open()?;
        Ok(self.records.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn maybe_snapshot(&mut self) -> StoreResult<()> {
        if self.operation_count >= self.options.snapshot_interval {
            self.compact()?;
        }
        Ok(())
    }

    /// Snapshot the full record set and truncate the commit log
    pub fn compact(&mut self) -> StoreResult<()> {
        self.ensure_open()?;

        let records: Vec<Record> = self.records.values().cloned().collect();
        let version = self.snapshots.create_snapshot(records)?;
        self.log()?.truncate()?;
        self.snapshots.cleanup_old_snapshots(self.options.keep_snapshots.max(1))?;
        self.operation_count = 0;

        debug!(path = %self.path.display(), version, "Compacted durable store");
        Ok(())
    }

    /// Flush and release the store; later calls fail with `NotReady`
    pub fn close(&mut self) -> StoreResult<()> {
        if self.commit_log.is_none() {
            return Ok(());
        }

        self.compact()?;
        if let Some(mut log) = self.commit_log.take() {
            log.sync()?;
        }

        info!(path = %self.path.display(), records = self.records.len(), "Closed durable store");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.commit_log.is_some()
    }

    /// Get storage statistics
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            records_count: self.records.len(),
            tombstones_count: self.records.values().filter(|r| r.is_tombstone()).count(),
            operation_count: self.operation_count,
            log_size: self.commit_log.as_ref().map(|log| log.size()).unwrap_or(0),
            snapshot_version: self.snapshots.current_version(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::model::Value;
    use tempfile::tempdir;

    fn record(id: &str, v: i64) -> Record {
        Record::new(id, Value::from(serde_json::json!({ "v": v })), 100)
    }

    #[test]
    fn test_put_get_list() {
        let dir = tempdir().unwrap();
        let mut store = DurableStore::open(dir.path()).unwrap();

        store.put_node(record("b", 1)).unwrap();
        store.put_node(record("a", 1)).unwrap();
        store.put_node(record("b", 2)).unwrap();

        assert_eq!(store.get_node("b").unwrap().unwrap(), record("b", 2));
        assert!(store.get_node("missing").unwrap().is_none());

        // Replacing "b" keeps its original position
        let ids: Vec<_> = store.list_nodes().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_delete_node() {
        let dir = tempdir().unwrap();
        let mut store = DurableStore::open(dir.path()).unwrap();

        store.put_node(record("a", 1)).unwrap();
        assert!(store.delete_node("a").unwrap());
        assert!(!store.delete_node("a").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_reopen_replays_log_without_close() {
        let dir = tempdir().unwrap();
        {
            let mut store = DurableStore::open(dir.path()).unwrap();
            store.put_node(record("a", 1)).unwrap();
            store.put_node(record("b", 1)).unwrap();
            store.delete_node("a").unwrap();
            // Dropped without close: only the log holds the data
        }

        let store = DurableStore::open(dir.path()).unwrap();
        assert!(store.get_node("a").unwrap().is_none());
        assert_eq!(store.get_node("b").unwrap().unwrap(), record("b", 1));
    }

    #[test]
    fn test_snapshot_then_log_replay() {
        let dir = tempdir().unwrap();
        let options = DurableStoreOptions { snapshot_interval: 2, keep_snapshots: 1 };
        {
            let mut store = DurableStore::open_with(dir.path(), options.clone()).unwrap();
            store.put_node(record("a", 1)).unwrap();
            store.put_node(record("b", 1)).unwrap(); // triggers snapshot
            store.put_node(record("a", 2)).unwrap(); // log only
            assert_eq!(store.stats().snapshot_version, 1);
            assert_eq!(store.stats().operation_count, 1);
        }

        let store = DurableStore::open_with(dir.path(), options).unwrap();
        assert_eq!(store.get_node("a").unwrap().unwrap(), record("a", 2));
        let ids: Vec<_> = store.list_nodes().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_close_compacts_and_rejects_use() {
        let dir = tempdir().unwrap();
        let mut store = DurableStore::open(dir.path()).unwrap();
        store.put_node(record("a", 1)).unwrap();

        store.close().unwrap();
        assert!(!store.is_open());
        assert!(matches!(store.get_node("a"), Err(StoreError::NotReady(_))));
        assert!(matches!(store.put_node(record("b", 1)), Err(StoreError::NotReady(_))));

        // Close is idempotent
        store.close().unwrap();

        let reopened = DurableStore::open(dir.path()).unwrap();
        assert_eq!(reopened.stats().log_size, 0);
        assert_eq!(reopened.get_node("a").unwrap().unwrap(), record("a", 1));
    }

    #[test]
    fn test_stats_counts_tombstones() {
        let dir = tempdir().unwrap();
        let mut store = DurableStore::open(dir.path()).unwrap();
        store.put_node(record("a", 1)).unwrap();
        store.put_node(Record::tombstone("b", 5, Default::default())).unwrap();

        let stats = store.stats();
        assert_eq!(stats.records_count, 2);
        assert_eq!(stats.tombstones_count, 1);
        assert!(stats.log_size > 0);
    }
}
