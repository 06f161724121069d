/*
    database.rs - One replicated database

    The context object an application holds. It owns the node store, the
    change broadcaster and at most one sync session; nothing is global, so
    several databases can live in one process.

    Layout under `store.data_dir`:
      replica_id     this replica's peer id, created on first open
      store/         commit log and snapshots
*/

use crate::config::{Config, ConfigError};
use crate::core_store::model::{Record, Value};
use crate::core_store::node_store::{NodeStore, RecordMeta};
use crate::core_store::store::{StoreError, StoreResult, StoreStats};
use crate::core_sync::{
    create_transport, MeshProtocol, SyncError, SyncKey, SyncResult, SyncSession, Topic,
};
use crate::events::{EventBroadcaster, Subscription};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

const REPLICA_ID_FILE: &str = "replica_id";
const STORE_DIR: &str = "store";

/// Errors from opening or closing a database
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Snapshot of a database's sync state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub enabled: bool,
    /// Topic hex while enabled
    pub topic: Option<String>,
    pub transport: Option<&'static str>,
    pub peers: Vec<String>,
    pub listen_addr: Option<SocketAddr>,
}

pub struct Database {
    config: Config,
    peer_id: String,
    store: Arc<NodeStore>,
    broadcaster: EventBroadcaster,
    sync: Mutex<Option<SyncSession>>,
}

impl Database {
    /// Open (or create) the database described by `config`
    pub fn open(config: Config) -> DatabaseResult<Self> {
        config.validate()?;

        let data_dir = &config.store.data_dir;
        std::fs::create_dir_all(data_dir).map_err(StoreError::from)?;
        let peer_id = match &config.store.replica_id {
            Some(id) => id.clone(),
            None => load_or_create_replica_id(data_dir)?,
        };

        let broadcaster = EventBroadcaster::new(config.events.channel_capacity);
        let store = Arc::new(NodeStore::new(
            data_dir.join(STORE_DIR),
            peer_id.clone(),
            broadcaster.clone(),
            config.store.durable_options(),
        ));
        store.initialize()?;

        info!(peer_id = %peer_id, data_dir = %data_dir.display(), "Database opened");
        Ok(Database { config, peer_id, store, broadcaster, sync: Mutex::new(None) })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying node store
    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    /// Write `data` under `id`, authored by this replica
    pub fn put(&self, id: &str, data: Value) -> StoreResult<String> {
        self.store.put(id, &self.peer_id, data)
    }

    pub fn put_with(&self, id: &str, data: Value, meta: RecordMeta) -> StoreResult<String> {
        self.store.put_with(id, &self.peer_id, data, meta)
    }

    pub fn get(&self, id: &str) -> StoreResult<Option<Record>> {
        self.store.get(id)
    }

    /// Delete `id`; `StoreError::NotFound` if there is no live record
    pub fn delete(&self, id: &str) -> StoreResult<()> {
        self.store.delete(id)
    }

    pub fn list(&self) -> StoreResult<Vec<Record>> {
        self.store.list()
    }

    pub fn list_by_type(&self, record_type: &str) -> StoreResult<Vec<Record>> {
        self.store.list_by_type(record_type)
    }

    pub fn stats(&self) -> StoreResult<StoreStats> {
        self.store.stats()
    }

    /// Receive every change from now on, local and remote
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    /// Start replicating with every peer holding the same `key`.
    ///
    /// The key is validated before any transport is built. On failure no
    /// topic stays joined and no listener stays open.
    pub async fn enable_sync(&self, key: &str) -> SyncResult<Topic> {
        let key = SyncKey::parse(key)?;
        let topic = key.topic();

        let mut sync = self.sync.lock().await;
        if let Some(session) = sync.as_ref() {
            return Err(SyncError::AlreadyEnabled(session.topic().to_hex()));
        }
        if !self.store.is_ready() {
            return Err(StoreError::NotReady("enable_sync".to_string()).into());
        }

        let transport = create_transport(&self.config.sync, &self.peer_id)?;
        let mesh = MeshProtocol::new(self.peer_id.clone(), self.store.clone(), self.broadcaster.clone());
        let session = SyncSession::start(transport, topic, mesh, self.config.sync.timeout()).await?;

        info!(peer_id = %self.peer_id, topic = %topic.short(), transport = session.transport_name(), "Sync enabled");
        *sync = Some(session);
        Ok(topic)
    }

    /// Stop replicating; a no-op when sync is off
    pub async fn disable_sync(&self) -> SyncResult<()> {
        let session = self.sync.lock().await.take();
        if let Some(session) = session {
            session.stop().await?;
            info!(peer_id = %self.peer_id, "Sync disabled");
        }
        Ok(())
    }

    pub async fn status(&self) -> SyncStatus {
        let sync = self.sync.lock().await;
        match sync.as_ref() {
            Some(session) => SyncStatus {
                enabled: true,
                topic: Some(session.topic().to_hex()),
                transport: Some(session.transport_name()),
                peers: session.connected_peers(),
                listen_addr: session.local_addr().await,
            },
            None => SyncStatus {
                enabled: false,
                topic: None,
                transport: None,
                peers: Vec::new(),
                listen_addr: None,
            },
        }
    }

    /// Address peers can dial, when syncing over a listening backend
    pub async fn listen_addr(&self) -> Option<SocketAddr> {
        match self.sync.lock().await.as_ref() {
            Some(session) => session.local_addr().await,
            None => None,
        }
    }

    /// Stop sync, flush the store and end every subscription
    pub async fn close(&self) -> DatabaseResult<()> {
        if let Err(e) = self.disable_sync().await {
            warn!(error = %e, "Sync did not stop cleanly");
        }
        self.store.close()?;
        self.broadcaster.close();
        info!(peer_id = %self.peer_id, "Database closed");
        Ok(())
    }
}

fn load_or_create_replica_id(data_dir: &Path) -> StoreResult<String> {
    let path = data_dir.join(REPLICA_ID_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let id = contents.trim();
            if id.is_empty() {
                return Err(StoreError::CorruptedData(format!("{} is empty", path.display())));
            }
            Ok(id.to_string())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = uuid::Uuid::new_v4().to_string();
            std::fs::write(&path, &id)?;
            info!(peer_id = %id, "Created replica id");
            Ok(id)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_sync::TransportMode;
    use crate::events::ChangeEvent;
    use crate::test_utils::payload;
    use tempfile::TempDir;

    const KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn local_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.store.data_dir = dir.path().to_path_buf();
        config.sync.mode = TransportMode::Disabled;
        config
    }

    #[tokio::test]
    async fn test_crud_and_events() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(local_config(&dir)).unwrap();
        let mut events = db.subscribe();

        db.put("note-1", payload(&[("v", 1)])).unwrap();
        db.put_with("note-2", payload(&[("v", 2)]), RecordMeta::with_type("note")).unwrap();
        assert_eq!(db.list().unwrap().len(), 2);
        assert_eq!(db.list_by_type("note").unwrap().len(), 1);

        db.delete("note-1").unwrap();
        assert!(db.get("note-1").unwrap().is_none());
        assert!(matches!(db.delete("note-1"), Err(StoreError::NotFound(_))));

        let first = events.next().await.unwrap();
        assert_eq!(first.record_id(), Some("note-1"));
        assert!(matches!(first, ChangeEvent::NodeUpsert { .. }));
    }

    #[tokio::test]
    async fn test_replica_id_persists() {
        let dir = TempDir::new().unwrap();
        let first = Database::open(local_config(&dir)).unwrap();
        let id = first.peer_id().to_string();
        first.close().await.unwrap();

        let second = Database::open(local_config(&dir)).unwrap();
        assert_eq!(second.peer_id(), id);

        let mut pinned = local_config(&dir);
        pinned.store.replica_id = Some("fixed".to_string());
        second.close().await.unwrap();
        assert_eq!(Database::open(pinned).unwrap().peer_id(), "fixed");
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_before_transport() {
        let dir = TempDir::new().unwrap();
        let mut config = local_config(&dir);
        // Would fail to build if it got that far
        config.sync.mode = TransportMode::Relay;
        config.sync.relay_address = Some("127.0.0.1:1".to_string());
        let db = Database::open(config).unwrap();

        assert!(matches!(db.enable_sync("nope").await, Err(SyncError::InvalidKey(_))));
        assert!(!db.status().await.enabled);
    }

    #[tokio::test]
    async fn test_disabled_sync_lifecycle() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(local_config(&dir)).unwrap();

        let topic = db.enable_sync(KEY).await.unwrap();
        let status = db.status().await;
        assert!(status.enabled);
        assert_eq!(status.topic, Some(topic.to_hex()));
        assert_eq!(status.transport, Some("disabled"));
        assert!(status.peers.is_empty());

        assert!(matches!(db.enable_sync(KEY).await, Err(SyncError::AlreadyEnabled(_))));

        db.disable_sync().await.unwrap();
        assert!(!db.status().await.enabled);
        db.disable_sync().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_relay_leaves_no_session() {
        let dir = TempDir::new().unwrap();
        let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let mut config = local_config(&dir);
        config.sync.mode = TransportMode::Relay;
        config.sync.relay_address = Some(format!("127.0.0.1:{}", port));
        config.sync.timeout_ms = 500;
        let db = Database::open(config).unwrap();

        let result = db.enable_sync(KEY).await;
        assert!(matches!(result, Err(SyncError::TransportUnavailable(_))));
        assert!(!db.status().await.enabled);
    }

    #[tokio::test]
    async fn test_close_ends_store_and_subscriptions() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(local_config(&dir)).unwrap();
        let mut events = db.subscribe();

        db.close().await.unwrap();
        assert!(matches!(db.get("x"), Err(StoreError::NotReady(_))));
        assert!(events.next().await.is_none());
    }
}
