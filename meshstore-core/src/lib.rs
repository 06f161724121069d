//! Local-first replicated record store
//!
//! Records live in a durable local store and replicate to every peer that
//! shares the database's sync key. Concurrent edits converge through a
//! state-based merge; no peer coordinates with any other.
//!
//! ```no_run
//! use meshstore_core::{Config, Database, Value};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open(Config::default())?;
//! db.put("note-1", Value::from(serde_json::json!({ "title": "hello" })))?;
//! db.enable_sync(meshstore_core::SyncKey::generate().as_str()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core_store;
pub mod core_sync;
pub mod database;
pub mod events;
pub mod logging;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use core_store::{Record, RecordMeta, StoreError, StoreResult, Value};
pub use core_sync::{derive_topic, SyncError, SyncKey, SyncResult, Topic, TransportMode};
pub use database::{Database, DatabaseError, DatabaseResult, SyncStatus};
pub use events::{ChangeEvent, EventSource, Subscription};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
