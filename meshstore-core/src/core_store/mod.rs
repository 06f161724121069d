/*
    core_store - Replicated record state

    Handles:
    - Record model and the dynamic payload value
    - CRDT merge of concurrent versions
    - Local persistence (commit log + snapshots)
    - The node store façade used by consumers and the mesh protocol
*/

pub mod crdt;
pub mod model;
pub mod node_store;
pub mod store;

#[cfg(test)]
pub mod tests;

// Re-export commonly used types
pub use crdt::{merge, Crdt, VectorClock};
pub use model::{Record, Value, ValueMap};
pub use node_store::{NodeStore, RecordMeta};
pub use store::{DurableStore, DurableStoreOptions, StoreError, StoreResult, StoreStats};
