//! Error types for the coordination store.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for coordination store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur talking to the coordination store.
///
/// Backend failures are passed through to the caller as-is; nothing in
/// this crate retries them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("invalid key component {component:?}: {reason}")]
    InvalidKey {
        component: String,
        reason: &'static str,
    },

    /// Another holder kept the lock for the whole wait.
    #[error("cannot acquire lock {key} within {timeout:?}")]
    LockTimeout { key: String, timeout: Duration },

    /// The lease expired or was taken over before it could be refreshed.
    #[error("lock {key} is no longer held by this lease")]
    LockLost { key: String },
}
