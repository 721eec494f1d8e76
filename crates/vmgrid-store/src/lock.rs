//! Named, TTL-leased mutual exclusion.
//!
//! A lock is a record in the store's lock table. Whoever creates the record
//! owns the lock until the lease runs out; refreshing pushes the expiry
//! back. A holder that crashes simply stops refreshing, and the next
//! acquirer takes over once the lease has lapsed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::key::ObjectKey;
use crate::retry::{retry_until, Backoff};
use crate::store::CoordinationStore;

/// Opaque proof of ownership handed out by a successful claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(String);

impl LeaseId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is asking for a lock. Recorded for operators only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub node: String,
    pub pid: u32,
    pub operation: Option<String>,
}

impl LockHolder {
    /// The current process on `node`.
    pub fn for_process(node: &str) -> Self {
        Self {
            node: node.to_string(),
            pid: std::process::id(),
            operation: None,
        }
    }

    pub fn with_operation(mut self, operation: Option<&str>) -> Self {
        self.operation = operation.map(str::to_string);
        self
    }
}

/// A lock as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub key: String,
    pub lease: LeaseId,
    pub holder: LockHolder,
    pub acquired_at: f64,
    pub expires_at: f64,
}

/// Objects that can be locked by identity alone.
pub trait Lockable {
    fn object_type(&self) -> &'static str;
    fn unique_label(&self) -> &str;
}

/// Blocking lock acquisition on top of the store's single-shot claim.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn CoordinationStore>,
    node: String,
    backoff: Backoff,
}

impl LockManager {
    pub fn new(store: Arc<dyn CoordinationStore>, node: &str) -> Self {
        Self {
            store,
            node: node.to_string(),
            backoff: Backoff::default(),
        }
    }

    /// Acquire `(object_type, subtype, name)`, waiting up to `timeout`.
    ///
    /// Fails with [`StoreError::LockTimeout`] if the lock is still held
    /// when the wait runs out. Store errors end the wait immediately.
    pub fn get_lock(
        &self,
        object_type: &str,
        subtype: Option<&str>,
        name: &str,
        ttl: Duration,
        timeout: Duration,
        operation: Option<&str>,
    ) -> StoreResult<Lock> {
        let key = ObjectKey::new(object_type, subtype, name)?;
        let holder = LockHolder::for_process(&self.node).with_operation(operation);

        let lease = retry_until(timeout, self.backoff, || self.store.try_lock(&key, &holder, ttl))?;
        match lease {
            Some(lease) => {
                debug!(%key, %lease, ?operation, "lock acquired");
                Ok(Lock {
                    store: self.store.clone(),
                    key,
                    lease,
                    ttl,
                    released: false,
                })
            }
            None => {
                warn!(%key, ?timeout, ?operation, "lock acquisition timed out");
                Err(StoreError::LockTimeout {
                    key: key.encode(),
                    timeout,
                })
            }
        }
    }

    /// Lock named after the object itself, so every operation on one object
    /// serializes against every other.
    pub fn get_object_lock(
        &self,
        object: &impl Lockable,
        ttl: Duration,
        timeout: Duration,
        operation: Option<&str>,
    ) -> StoreResult<Lock> {
        self.get_lock(object.object_type(), None, object.unique_label(), ttl, timeout, operation)
    }
}

/// A held lock. Released on drop if not released explicitly.
pub struct Lock {
    store: Arc<dyn CoordinationStore>,
    key: ObjectKey,
    lease: LeaseId,
    ttl: Duration,
    released: bool,
}

impl Lock {
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Push the expiry out by another full TTL.
    pub fn refresh(&self) -> StoreResult<()> {
        if self.store.refresh_lock(&self.key, &self.lease, self.ttl)? {
            debug!(key = %self.key, "lock refreshed");
            Ok(())
        } else {
            Err(StoreError::LockLost {
                key: self.key.encode(),
            })
        }
    }

    /// Returns `false` if the lease had already lapsed.
    pub fn release(mut self) -> StoreResult<bool> {
        self.released = true;
        let released = self.store.release_lock(&self.key, &self.lease)?;
        debug!(key = %self.key, released, "lock released");
        Ok(released)
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("key", &self.key)
            .field("lease", &self.lease)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.release_lock(&self.key, &self.lease) {
            // The lease will lapse on its own.
            warn!(key = %self.key, error = %e, "failed to release lock on drop");
        }
    }
}
