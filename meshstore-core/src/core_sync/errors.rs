/*
    errors.rs - Error types for the sync subsystem

    Initialization errors (invalid key, unavailable transport, timeout) fail
    the enable call. Per-connection errors never escape the connection task.
*/

use crate::core_store::store::StoreError;
use crate::core_sync::transport::TransportError;
use thiserror::Error;

/// Errors that can occur while enabling or running sync
#[derive(Debug, Error)]
pub enum SyncError {
    /// Sync key is not 64 lowercase hex characters
    #[error("Invalid sync key: {0}")]
    InvalidKey(String),

    /// Selected backend cannot run here
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A peer connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed inbound payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Operation exceeded the configured timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Sync is already running for this database
    #[error("Sync already enabled on topic {0}")]
    AlreadyEnabled(String),

    /// Store failure underneath sync
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable(msg) => SyncError::TransportUnavailable(msg),
            TransportError::Timeout(msg) => SyncError::Timeout(msg),
            other => SyncError::Connection(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}
