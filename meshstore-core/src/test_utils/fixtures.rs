//! Test fixtures: payloads and throwaway replicas

use crate::core_store::model::{Value, ValueMap};
use crate::core_store::node_store::NodeStore;
use crate::core_store::store::DurableStoreOptions;
use crate::core_sync::mesh::MeshProtocol;
use crate::events::EventBroadcaster;
use std::sync::Arc;
use tempfile::TempDir;

/// Map payload from integer fields
pub fn payload(fields: &[(&str, i64)]) -> Value {
    let map: ValueMap = fields
        .iter()
        .map(|(key, value)| (key.to_string(), Value::Int(*value)))
        .collect();
    Value::Map(map)
}

/// A node store in a temporary directory, with its broadcaster and mesh handle
pub struct TestReplica {
    pub store: Arc<NodeStore>,
    pub broadcaster: EventBroadcaster,
    mesh: MeshProtocol,
    _dir: TempDir,
}

impl TestReplica {
    pub fn new(replica_id: &str) -> Self {
        Self::with_event_capacity(replica_id, 256)
    }

    /// Replica whose subscribers fall behind after `capacity` unread events
    pub fn with_event_capacity(replica_id: &str, capacity: usize) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let broadcaster = EventBroadcaster::new(capacity);
        let store = Arc::new(NodeStore::new(
            dir.path(),
            replica_id,
            broadcaster.clone(),
            DurableStoreOptions::default(),
        ));
        store.initialize().expect("store init");
        let mesh = MeshProtocol::new(replica_id, store.clone(), broadcaster.clone());
        TestReplica { store, broadcaster, mesh, _dir: dir }
    }

    pub fn id(&self) -> &str {
        self.store.replica_id()
    }

    pub fn mesh(&self) -> MeshProtocol {
        self.mesh.clone()
    }

    pub fn mesh_peers(&self) -> Vec<String> {
        self.mesh.connected_peers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_builds_map() {
        let value = payload(&[("a", 1), ("b", 2)]);
        assert_eq!(value.get("a"), Some(&Value::Int(1)));
        assert_eq!(value.as_map().map(|m| m.len()), Some(2));
    }

    #[test]
    fn test_replica_is_ready() {
        let replica = TestReplica::new("r1");
        assert!(replica.store.is_ready());
        assert_eq!(replica.id(), "r1");
        assert!(replica.mesh_peers().is_empty());
    }
}
