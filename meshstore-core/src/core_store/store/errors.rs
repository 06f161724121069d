/*
    errors.rs - Error types for the store subsystem

    Defines all error types that can occur in:
    - Node store operations (readiness, missing records)
    - Durable storage I/O
    - Commit log / snapshot decoding
*/

use thiserror::Error;

/// Errors that can occur in the store subsystem
#[derive(Debug, Error)]
pub enum StoreError {
    /// Operation invoked before the store finished initializing (or after close)
    #[error("Store not ready: {0}")]
    NotReady(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage I/O error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Corrupted data detected
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NotFound("record-1".to_string());
        assert_eq!(err.to_string(), "Not found: record-1");

        let err = StoreError::NotReady("put".to_string());
        assert_eq!(err.to_string(), "Store not ready: put");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: StoreError = io.into();
        assert!(matches!(err, StoreError::Storage(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<u64>("not json").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
