/*
    record.rs - The versioned unit of replication

    A record is identified by `id` across every replica. Its content version
    is the pair (timestamp, vector clock); `data` is the payload tree.

    Deletions are kept as tombstones: a record with `deleted = true` and an
    empty payload that merges like any other version, so a stale write from a
    peer that never saw the delete cannot resurrect it.
*/

use super::value::Value;
use crate::core_store::crdt::VectorClock;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Replicated record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Stable identity across all replicas
    pub id: String,

    /// Payload tree
    #[serde(default)]
    pub data: Value,

    /// Consumer-defined classification, not interpreted by the store
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,

    /// Opaque embedding carried through merges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,

    /// Wall-clock write time, LWW tie-breaker
    pub timestamp: u64,

    /// Logical time of this version
    #[serde(default)]
    pub vector_clock: VectorClock,

    /// Tombstone marker
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

impl Record {
    /// Create a live record with an empty clock
    pub fn new(id: impl Into<String>, data: Value, timestamp: u64) -> Self {
        Record {
            id: id.into(),
            data,
            record_type: None,
            vector: None,
            timestamp,
            vector_clock: VectorClock::new(),
            deleted: false,
        }
    }

    /// Create a tombstone for `id`
    pub fn tombstone(id: impl Into<String>, timestamp: u64, vector_clock: VectorClock) -> Self {
        Record {
            id: id.into(),
            data: Value::empty_map(),
            record_type: None,
            vector: None,
            timestamp,
            vector_clock,
            deleted: true,
        }
    }

    pub fn with_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_clock(mut self, vector_clock: VectorClock) -> Self {
        self.vector_clock = vector_clock;
        self
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted
    }

    /// Whether the record is visible to `get`/`list`
    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}
