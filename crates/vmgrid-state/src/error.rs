//! Error types for the cluster state layer.

use thiserror::Error;
use vmgrid_store::StoreError;

/// Result type alias for cluster state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors surfaced by cluster state operations.
///
/// A missing object is never an error here: lookups return `None` and
/// listings return empty sequences.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),

    #[error("ip manager error: {0}")]
    IpManager(String),

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("mac address {0} is already allocated")]
    MacAddressInUse(String),
}

impl StateError {
    /// True when the operation gave up waiting for a lock.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, StateError::Store(StoreError::LockTimeout { .. }))
    }
}
