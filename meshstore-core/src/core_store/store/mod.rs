/*
    Store subsystem - Persistence layer
*/

pub mod commit_log;
pub mod durable_store;
pub mod errors;
pub mod snapshot;

pub use commit_log::{CommitLog, LogEntry};
pub use durable_store::{DurableStore, DurableStoreOptions, StoreStats};
pub use errors::*;
pub use snapshot::{Snapshot, SnapshotManager, SnapshotMetadata};
