//! Mesh wire messages
//!
//! One JSON object per transport message, discriminated by `"type"`:
//!
//! ```json
//! { "type": "put", "originId": "peer-a", "node": { "id": "x", "data": {}, "timestamp": 1, "vectorClock": {} } }
//! { "type": "delete", "originId": "peer-a", "id": "x", "timestamp": 2, "vectorClock": { "peer-a": 2 } }
//! { "type": "sync_request", "originId": "peer-a" }
//! ```
//!
//! `originId` names the peer that authored the change and is kept as the
//! change is gossiped onward, so no peer echoes a change back to its author.

use crate::core_store::crdt::VectorClock;
use crate::core_store::model::Record;
use crate::core_sync::errors::{SyncError, SyncResult};
use crate::events::{ChangeEvent, EventSource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MeshMessage {
    Put {
        #[serde(rename = "originId", default, skip_serializing_if = "Option::is_none")]
        origin_id: Option<String>,
        node: Record,
    },
    Delete {
        #[serde(rename = "originId", default, skip_serializing_if = "Option::is_none")]
        origin_id: Option<String>,
        id: String,
        /// Tombstone version; absent from peers that send bare deletes
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
        #[serde(rename = "vectorClock", default, skip_serializing_if = "Option::is_none")]
        vector_clock: Option<VectorClock>,
    },
    SyncRequest {
        #[serde(rename = "originId", default, skip_serializing_if = "Option::is_none")]
        origin_id: Option<String>,
    },
}

impl MeshMessage {
    /// Message carrying a stored version: `Put` for live records, `Delete` for tombstones
    pub fn for_record(origin_id: Option<String>, record: Record) -> Self {
        if record.is_tombstone() {
            MeshMessage::Delete {
                origin_id,
                id: record.id,
                timestamp: Some(record.timestamp),
                vector_clock: Some(record.vector_clock),
            }
        } else {
            MeshMessage::Put { origin_id, node: record }
        }
    }

    /// Translate a change event into the message to gossip.
    ///
    /// Local changes are stamped with `local_peer`; remote ones keep their
    /// author. Peer lifecycle events have no wire form.
    pub fn from_event(event: &ChangeEvent, local_peer: &str) -> Option<Self> {
        let origin = |source: &EventSource| match source {
            EventSource::Local => Some(local_peer.to_string()),
            EventSource::Remote { via, origin_id } => {
                origin_id.clone().or_else(|| Some(via.clone()))
            }
        };

        match event {
            ChangeEvent::NodeUpsert { record, source } => {
                Some(MeshMessage::for_record(origin(source), record.clone()))
            }
            ChangeEvent::NodeDelete { tombstone, source, .. } => {
                Some(MeshMessage::for_record(origin(source), tombstone.clone()))
            }
            ChangeEvent::PeerConnected { .. } | ChangeEvent::PeerDisconnected { .. } => None,
        }
    }

    pub fn origin_id(&self) -> Option<&str> {
        match self {
            MeshMessage::Put { origin_id, .. }
            | MeshMessage::Delete { origin_id, .. }
            | MeshMessage::SyncRequest { origin_id } => origin_id.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MeshMessage::Put { .. } => "put",
            MeshMessage::Delete { .. } => "delete",
            MeshMessage::SyncRequest { .. } => "sync_request",
        }
    }

    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| SyncError::Parse(e.to_string()))
    }
}
