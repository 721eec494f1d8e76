//! ClusterDb — the cluster object layer over the coordination store.
//!
//! Holds the injected store client, this node's config and a clock. The
//! entity operations live in sibling modules as further `impl ClusterDb`
//! blocks; this module owns the shared plumbing, most importantly
//! [`ClusterDb::update_object`], the single compare-and-set path every
//! mutator goes through.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use vmgrid_core::{ClusterConfig, SharedClock, SystemClock};
use vmgrid_store::{CoordinationStore, Lock, LockManager, LockRecord, Lockable, ObjectKey, StoreExt};

use crate::error::StateResult;
use crate::types::Timestamp;

/// Handle to cluster state. Cheap to clone.
#[derive(Clone)]
pub struct ClusterDb {
    store: Arc<dyn CoordinationStore>,
    locks: LockManager,
    config: Arc<ClusterConfig>,
    clock: SharedClock,
}

impl ClusterDb {
    pub fn new(store: Arc<dyn CoordinationStore>, config: ClusterConfig) -> Self {
        let locks = LockManager::new(store.clone(), &config.node_name);
        Self {
            store,
            locks,
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for every timestamp this handle writes.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // ── Locks ──────────────────────────────────────────────────────

    /// Acquire a named lock, waiting up to `timeout`.
    pub fn get_lock(
        &self,
        object_type: &str,
        subtype: Option<&str>,
        name: &str,
        ttl: Duration,
        timeout: Duration,
        operation: Option<&str>,
    ) -> StateResult<Lock> {
        Ok(self
            .locks
            .get_lock(object_type, subtype, name, ttl, timeout, operation)?)
    }

    /// Acquire the lock named after `object`.
    pub fn get_object_lock(
        &self,
        object: &impl Lockable,
        ttl: Duration,
        timeout: Duration,
        operation: Option<&str>,
    ) -> StateResult<Lock> {
        Ok(self.locks.get_object_lock(object, ttl, timeout, operation)?)
    }

    /// Extend a held lock by its TTL.
    pub fn refresh_lock(&self, lock: &Lock) -> StateResult<()> {
        Ok(lock.refresh()?)
    }

    pub fn clear_stale_locks(&self) -> StateResult<usize> {
        Ok(self.store.clear_stale_locks()?)
    }

    pub fn get_existing_locks(&self) -> StateResult<Vec<LockRecord>> {
        Ok(self.store.existing_locks()?)
    }

    /// Lock with this node's default TTL and timeout.
    pub(crate) fn default_lock(
        &self,
        object_type: &str,
        subtype: Option<&str>,
        name: &str,
        operation: &str,
    ) -> StateResult<Lock> {
        self.get_lock(
            object_type,
            subtype,
            name,
            self.config.lock_ttl(),
            self.config.lock_timeout(),
            Some(operation),
        )
    }

    // ── Plain records ──────────────────────────────────────────────

    pub(crate) fn read<T: DeserializeOwned>(&self, object_type: &str, subtype: Option<&str>, name: &str) -> StateResult<Option<T>> {
        let key = ObjectKey::new(object_type, subtype, name)?;
        Ok(self.store.get_as(&key)?)
    }

    pub(crate) fn write<T: Serialize>(
        &self,
        object_type: &str,
        subtype: Option<&str>,
        name: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> StateResult<()> {
        let key = ObjectKey::new(object_type, subtype, name)?;
        Ok(self.store.put_as(&key, value, ttl)?)
    }

    pub(crate) fn remove(&self, object_type: &str, subtype: Option<&str>, name: &str) -> StateResult<bool> {
        let key = ObjectKey::new(object_type, subtype, name)?;
        Ok(self.store.delete(&key)?)
    }

    pub(crate) fn read_all<T: DeserializeOwned>(&self, object_type: &str, subtype: Option<&str>) -> StateResult<Vec<T>> {
        Ok(self
            .store
            .get_all_as::<T>(object_type, subtype)?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    // ── Compare-and-set ────────────────────────────────────────────

    /// Apply `mutate` to one unscoped record, writing only if it changed.
    ///
    /// `mutate` receives the record and the current time and returns
    /// whether it changed anything. It runs once against an unlocked read:
    /// if that is a no-op the call ends there with no lock and no write.
    /// Otherwise it runs again against a fresh read under the object's
    /// lock, and the result is written if it still reports a change.
    ///
    /// Returns `None` if the record does not exist.
    pub(crate) fn update_object<T, F>(
        &self,
        object_type: &'static str,
        uuid: &str,
        operation: &str,
        mutate: F,
    ) -> StateResult<Option<Updated<T>>>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: Fn(&mut T, Timestamp) -> bool,
    {
        let Some(current) = self.read::<T>(object_type, None, uuid)? else {
            return Ok(None);
        };
        let mut probe = current.clone();
        if !mutate(&mut probe, self.now()) {
            return Ok(Some(Updated {
                object: current,
                changed: false,
            }));
        }

        let _lock = self.default_lock(object_type, None, uuid, operation)?;
        let Some(mut object) = self.read::<T>(object_type, None, uuid)? else {
            return Ok(None);
        };
        let changed = mutate(&mut object, self.now());
        if changed {
            self.write(object_type, None, uuid, &object, None)?;
            debug!(%object_type, %uuid, %operation, "object updated");
        }
        Ok(Some(Updated { object, changed }))
    }
}

/// Outcome of [`ClusterDb::update_object`].
#[derive(Debug, Clone)]
pub(crate) struct Updated<T> {
    pub object: T,
    pub changed: bool,
}
