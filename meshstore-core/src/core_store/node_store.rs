/*
    node_store.rs - CRDT façade over the durable store

    The mutation API consumers and the mesh protocol go through:
    - put/delete stamp a new version (timestamp + own clock counter)
    - apply_remote merges an incoming version under the same lock as the
      read, so a record's read-merge-write is atomic
    - get/list hide tombstones
    - every change publishes exactly one event, in store order
*/

use crate::core_store::crdt::{merge, VectorClock};
use crate::core_store::model::{now_millis, Record, Value};
use crate::core_store::store::{DurableStore, DurableStoreOptions, StoreError, StoreResult, StoreStats};
use crate::events::{ChangeEvent, EventBroadcaster, EventSource};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Helper to convert poison errors into StoreError
fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::Storage("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// Optional singular fields of a local write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordMeta {
    /// `None` keeps the type already stored for the id
    pub record_type: Option<String>,
    /// `None` keeps the vector already stored for the id
    pub vector: Option<Vec<f32>>,
}

impl RecordMeta {
    pub fn with_type(record_type: impl Into<String>) -> Self {
        RecordMeta { record_type: Some(record_type.into()), vector: None }
    }
}

/// Node store: the replicated record set of one database
pub struct NodeStore {
    path: PathBuf,
    replica_id: String,
    options: DurableStoreOptions,
    broadcaster: EventBroadcaster,
    store: Mutex<Option<DurableStore>>,
}

impl NodeStore {
    /// Create a store handle; nothing is opened until [`initialize`](Self::initialize)
    pub fn new(
        path: impl AsRef<Path>,
        replica_id: impl Into<String>,
        broadcaster: EventBroadcaster,
        options: DurableStoreOptions,
    ) -> Self {
        NodeStore {
            path: path.as_ref().to_path_buf(),
            replica_id: replica_id.into(),
            options,
            broadcaster,
            store: Mutex::new(None),
        }
    }

    /// Open the durable store; calling it again is a no-op
    pub fn initialize(&self) -> StoreResult<()> {
        let mut guard = self.store.lock().map_err(handle_poison)?;
        if guard.is_none() {
            *guard = Some(DurableStore::open_with(&self.path, self.options.clone())?);
            info!(replica_id = %self.replica_id, path = %self.path.display(), "Node store ready");
        }
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.store.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// Run `f` against the open durable store
    fn with_store<T>(
        &self,
        op: &str,
        f: impl FnOnce(&mut DurableStore) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.store.lock().map_err(handle_poison)?;
        match guard.as_mut() {
            Some(store) => f(store),
            None => Err(StoreError::NotReady(op.to_string())),
        }
    }

    /// Write `data` as the new local version of `id`
    pub fn put(&self, id: &str, actor: &str, data: Value) -> StoreResult<String> {
        self.put_with(id, actor, data, RecordMeta::default())
    }

    /// Write `data` with explicit type/vector
    pub fn put_with(&self, id: &str, actor: &str, data: Value, meta: RecordMeta) -> StoreResult<String> {
        if id.is_empty() {
            return Err(StoreError::InvalidOperation("record id must not be empty".to_string()));
        }

        self.with_store("put", |store| {
            let existing = store.get_node(id)?;

            let (mut vector_clock, timestamp, record_type, vector) = match existing {
                Some(prev) => {
                    let timestamp = now_millis().max(prev.timestamp.saturating_add(1));
                    let (record_type, vector) = if prev.is_live() {
                        (prev.record_type, prev.vector)
                    } else {
                        (None, None)
                    };
                    (prev.vector_clock, timestamp, record_type, vector)
                }
                None => (VectorClock::new(), now_millis(), None, None),
            };
            vector_clock.increment(actor);

            let record = Record {
                id: id.to_string(),
                data,
                record_type: meta.record_type.or(record_type),
                vector: meta.vector.or(vector),
                timestamp,
                vector_clock,
                deleted: false,
            };

            store.put_node(record.clone())?;
            debug!(id, actor, timestamp, "Local put");
            self.broadcaster.emit(ChangeEvent::NodeUpsert { record, source: EventSource::Local });
            Ok(id.to_string())
        })
    }

    /// Current live version of `id`
    pub fn get(&self, id: &str) -> StoreResult<Option<Record>> {
        self.with_store("get", |store| Ok(store.get_node(id)?.filter(Record::is_live)))
    }

    /// Delete `id` by writing a tombstone; `NotFound` if there is nothing live to delete
    pub fn delete(&self, id: &str) -> StoreResult<()> {
        self.with_store("delete", |store| {
            let prev = match store.get_node(id)? {
                Some(prev) if prev.is_live() => prev,
                _ => return Err(StoreError::NotFound(id.to_string())),
            };

            let mut vector_clock = prev.vector_clock;
            vector_clock.increment(&self.replica_id);
            let tombstone =
                Record::tombstone(id, now_millis().max(prev.timestamp.saturating_add(1)), vector_clock);

            store.put_node(tombstone.clone())?;
            debug!(id, timestamp = tombstone.timestamp, "Local delete");
            self.broadcaster.emit(ChangeEvent::NodeDelete {
                id: id.to_string(),
                tombstone,
                source: EventSource::Local,
            });
            Ok(())
        })
    }

    /// Live records in store order
    pub fn list(&self) -> StoreResult<Vec<Record>> {
        self.with_store("list", |store| {
            Ok(store.list_nodes()?.into_iter().filter(Record::is_live).collect())
        })
    }

    /// Live records whose type equals `record_type`
    pub fn list_by_type(&self, record_type: &str) -> StoreResult<Vec<Record>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|record| record.record_type.as_deref() == Some(record_type))
            .collect())
    }

    /// Every stored version, tombstones included, in store order
    pub fn snapshot_all(&self) -> StoreResult<Vec<Record>> {
        self.with_store("snapshot_all", |store| store.list_nodes())
    }

    /// Merge a version received from a peer.
    ///
    /// Returns the new stored version when it changed, `None` when the
    /// incoming version was already reflected locally.
    pub fn apply_remote(&self, incoming: Record, source: EventSource) -> StoreResult<Option<Record>> {
        if incoming.id.is_empty() {
            return Err(StoreError::InvalidOperation("record id must not be empty".to_string()));
        }

        self.with_store("apply_remote", |store| {
            let merged = match store.get_node(&incoming.id)? {
                None => incoming,
                Some(local) => {
                    let merged = merge(&local, &incoming);
                    metrics::counter!("meshstore_store_merges_total").increment(1);
                    if merged == local {
                        return Ok(None);
                    }
                    merged
                }
            };

            store.put_node(merged.clone())?;
            debug!(id = %merged.id, timestamp = merged.timestamp, deleted = merged.deleted, "Applied remote version");

            let event = if merged.is_tombstone() {
                ChangeEvent::NodeDelete { id: merged.id.clone(), tombstone: merged.clone(), source }
            } else {
                ChangeEvent::NodeUpsert { record: merged.clone(), source }
            };
            self.broadcaster.emit(event);
            Ok(Some(merged))
        })
    }

    /// Apply a delete received from a peer.
    ///
    /// Without a timestamp and clock the tombstone is stamped now, after any
    /// locally known version.
    pub fn apply_remote_delete(
        &self,
        id: &str,
        timestamp: Option<u64>,
        vector_clock: Option<VectorClock>,
        source: EventSource,
    ) -> StoreResult<Option<Record>> {
        let tombstone = match (timestamp, vector_clock) {
            (Some(timestamp), vector_clock) => {
                Record::tombstone(id, timestamp, vector_clock.unwrap_or_default())
            }
            (None, vector_clock) => {
                let prev = self.with_store("apply_remote_delete", |store| store.get_node(id))?;
                let (timestamp, local_clock) = match prev {
                    Some(prev) => (now_millis().max(prev.timestamp.saturating_add(1)), prev.vector_clock),
                    None => (now_millis(), VectorClock::new()),
                };
                let clock = match vector_clock {
                    Some(remote) => local_clock.merged(&remote),
                    None => local_clock,
                };
                Record::tombstone(id, timestamp, clock)
            }
        };

        self.apply_remote(tombstone, source)
    }

    /// Physically drop tombstones older than `older_than_ms`; returns how many
    pub fn purge_tombstones(&self, older_than_ms: u64) -> StoreResult<usize> {
        let cutoff = now_millis().saturating_sub(older_than_ms);
        self.with_store("purge_tombstones", |store| {
            let expired: Vec<String> = store
                .list_nodes()?
                .into_iter()
                .filter(|record| record.is_tombstone() && record.timestamp < cutoff)
                .map(|record| record.id)
                .collect();

            for id in &expired {
                store.delete_node(id)?;
            }
            if !expired.is_empty() {
                info!(purged = expired.len(), "Purged tombstones");
            }
            Ok(expired.len())
        })
    }

    /// Snapshot and truncate the commit log
    pub fn compact(&self) -> StoreResult<()> {
        self.with_store("compact", |store| store.compact())
    }

    pub fn stats(&self) -> StoreResult<StoreStats> {
        self.with_store("stats", |store| Ok(store.stats()))
    }

    /// Close the durable store; later operations fail with `NotReady`
    pub fn close(&self) -> StoreResult<()> {
        let mut guard = self.store.lock().map_err(handle_poison)?;
        if let Some(mut store) = guard.take() {
            store.close()?;
        }
        Ok(())
    }
}
