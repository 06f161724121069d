/*
    traits.rs - Core CRDT trait definitions

    Defines the interface replicated state implements:
    - Merge with another replica's version
    - Expose the vector clock for causal ordering
*/

use super::merge::merge;
use super::vector_clock::VectorClock;
use crate::core_store::model::Record;
use crate::core_store::store::errors::{StoreError, StoreResult};

/// Core trait for replicated state
pub trait Crdt: Clone + Send + Sync {
    /// Merge another replica's state into this one
    /// This is called when receiving state from a remote peer
    fn merge(&mut self, other: &Self) -> StoreResult<()>;

    /// Get the vector clock for causal ordering
    fn vector_clock(&self) -> &VectorClock;
}

impl Crdt for Record {
    fn merge(&mut self, other: &Self) -> StoreResult<()> {
        if self.id != other.id {
            return Err(StoreError::InvalidOperation(format!(
                "cannot merge record {} with record {}",
                self.id, other.id
            )));
        }
        *self = merge(self, other);
        Ok(())
    }

    fn vector_clock(&self) -> &VectorClock {
        &self.vector_clock
    }
}
