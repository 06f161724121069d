/*
    vector_clock.rs - Vector clock implementation for causal ordering

    A vector clock tracks the logical time of a record across replicas.
    Each actor (replica/process) owns one counter that only ever grows.
    Used to determine causal relationships between record versions:
    - Happened-before
    - Concurrent
    - Happened-after

    Serialized as a plain `{ "<actor>": <counter> }` map on the wire.
*/

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Actor identifier for vector clock entries
pub type ActorId = String;

/// Vector clock for tracking causal order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    /// Map from actor ID to logical counter
    clock: BTreeMap<ActorId, u64>,
}

impl VectorClock {
    /// Create a new empty vector clock
    pub fn new() -> Self {
        VectorClock { clock: BTreeMap::new() }
    }

    /// Increment the counter for a given actor, returning the new value
    pub fn increment(&mut self, actor: &str) -> u64 {
        let counter = self.clock.entry(actor.to_string()).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    /// Get the counter for an actor
    pub fn get(&self, actor: &str) -> u64 {
        self.clock.get(actor).copied().unwrap_or(0)
    }

    /// Raise the counter for an actor; never lowers an existing entry
    pub fn observe(&mut self, actor: &str, counter: u64) {
        let current = self.clock.entry(actor.to_string()).or_insert(0);
        *current = (*current).max(counter);
    }

    /// Merge two vector clocks (take maximum of each entry)
    pub fn merge(&mut self, other: &VectorClock) {
        for (actor, &counter) in &other.clock {
            let current = self.clock.entry(actor.clone()).or_insert(0);
            *current = (*current).max(counter);
        }
    }

    /// Key-wise maximum of two clocks without mutating either
    pub fn merged(&self, other: &VectorClock) -> VectorClock {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Check if this clock happened before another
    /// Returns true if all entries in self <= other and at least one is strictly less
    pub fn happened_before(&self, other: &VectorClock) -> bool {
        let mut strictly_less = false;

        for (actor, &self_counter) in &self.clock {
            let other_counter = other.get(actor);
            if self_counter > other_counter {
                return false;
            }
            if self_counter < other_counter {
                strictly_less = true;
            }
        }

        for (actor, &other_counter) in &other.clock {
            if !self.clock.contains_key(actor) && other_counter > 0 {
                strictly_less = true;
            }
        }

        strictly_less
    }

    /// Check if two clocks are concurrent (neither happened before the other)
    pub fn is_concurrent(&self, other: &VectorClock) -> bool {
        !self.happened_before(other) && !other.happened_before(self) && self != other
    }

    /// Compare two vector clocks; `None` means concurrent
    pub fn causal_cmp(&self, other: &VectorClock) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.happened_before(other) {
            Some(Ordering::Less)
        } else if other.happened_before(self) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }

    /// Iterate over `(actor, counter)` entries in actor order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.clock.iter().map(|(actor, counter)| (actor.as_str(), *counter))
    }

    /// Check if clock is empty
    pub fn is_empty(&self) -> bool {
        self.clock.is_empty()
    }

    /// Get the number of actors tracked
    pub fn len(&self) -> usize {
        self.clock.len()
    }
}

impl<const N: usize> From<[(&str, u64); N]> for VectorClock {
    fn from(entries: [(&str, u64); N]) -> Self {
        let mut vc = VectorClock::new();
        for (actor, counter) in entries {
            vc.observe(actor, counter);
        }
        vc
    }
}
