//! The coordination store contract.
//!
//! Everything above this crate talks to cluster state through
//! [`CoordinationStore`]. Values are untyped JSON at this seam; the
//! [`StoreExt`] helpers layer serde typing on top for callers.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::key::ObjectKey;
use crate::lock::{LeaseId, LockHolder, LockRecord};
use crate::queue::QueueHandle;

/// A consistent key-value store with TTL expiry, leased locks and
/// claimable FIFO queues.
///
/// Implementations must make `create`, `try_lock` and `dequeue` atomic with
/// respect to every other caller of the same store.
pub trait CoordinationStore: Send + Sync {
    fn get(&self, key: &ObjectKey) -> StoreResult<Option<Value>>;

    /// Unconditional write. `ttl` of `None` never expires.
    fn put(&self, key: &ObjectKey, value: &Value, ttl: Option<Duration>) -> StoreResult<()>;

    /// Put-if-absent. Returns `false` when a live value already exists.
    fn create(&self, key: &ObjectKey, value: &Value, ttl: Option<Duration>) -> StoreResult<bool>;

    /// Returns `true` if a live value was removed.
    fn delete(&self, key: &ObjectKey) -> StoreResult<bool>;

    /// Every live `(name, value)` in one scope, in ascending name order.
    fn get_all(&self, object_type: &str, subtype: Option<&str>) -> StoreResult<Vec<(String, Value)>>;

    fn delete_all(&self, object_type: &str, subtype: Option<&str>) -> StoreResult<usize>;

    /// One attempt at claiming a lock. `None` means someone else holds it.
    fn try_lock(&self, key: &ObjectKey, holder: &LockHolder, ttl: Duration) -> StoreResult<Option<LeaseId>>;

    /// Extend a lease. `false` if the lease expired or belongs to someone else.
    fn refresh_lock(&self, key: &ObjectKey, lease: &LeaseId, ttl: Duration) -> StoreResult<bool>;

    fn release_lock(&self, key: &ObjectKey, lease: &LeaseId) -> StoreResult<bool>;

    /// Unexpired lock records, for operators.
    fn existing_locks(&self) -> StoreResult<Vec<LockRecord>>;

    /// Remove expired lock records. Returns how many were removed.
    fn clear_stale_locks(&self) -> StoreResult<usize>;

    fn enqueue(&self, queue: &str, item: &Value) -> StoreResult<()>;

    /// Claim the oldest unclaimed item without waiting.
    fn dequeue(&self, queue: &str) -> StoreResult<Option<(Value, QueueHandle)>>;

    /// Permanently remove a claimed item. `false` if the claim is unknown.
    fn resolve(&self, queue: &str, handle: &QueueHandle) -> StoreResult<bool>;

    /// Unresolved items, claimed or not.
    fn queue_length(&self, queue: &str) -> StoreResult<usize>;

    /// Drop every claim marker so unresolved items can be dequeued again.
    fn restart_queues(&self) -> StoreResult<usize>;
}

/// Serde-typed convenience layer over any [`CoordinationStore`].
pub trait StoreExt: CoordinationStore {
    fn get_as<T: DeserializeOwned>(&self, key: &ObjectKey) -> StoreResult<Option<T>> {
        self.get(key)?.map(from_value).transpose()
    }

    fn put_as<T: Serialize>(&self, key: &ObjectKey, value: &T, ttl: Option<Duration>) -> StoreResult<()> {
        self.put(key, &to_value(value)?, ttl)
    }

    fn create_as<T: Serialize>(&self, key: &ObjectKey, value: &T, ttl: Option<Duration>) -> StoreResult<bool> {
        self.create(key, &to_value(value)?, ttl)
    }

    fn get_all_as<T: DeserializeOwned>(
        &self,
        object_type: &str,
        subtype: Option<&str>,
    ) -> StoreResult<Vec<(String, T)>> {
        self.get_all(object_type, subtype)?
            .into_iter()
            .map(|(name, value)| Ok((name, from_value(value)?)))
            .collect()
    }

    fn enqueue_as<T: Serialize>(&self, queue: &str, item: &T) -> StoreResult<()> {
        self.enqueue(queue, &to_value(item)?)
    }
}

impl<S: CoordinationStore + ?Sized> StoreExt for S {}

pub(crate) fn to_value<T: Serialize>(value: &T) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialize(e.to_string()))
}

pub(crate) fn from_value<T: DeserializeOwned>(value: Value) -> StoreResult<T> {
    serde_json::from_value(value).map_err(|e| StoreError::Deserialize(e.to_string()))
}
