#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use vmgrid_core::{ClusterConfig, ManualClock};
use vmgrid_state::{ClusterDb, IpBlockManager};
use vmgrid_store::{
    CoordinationStore, LeaseId, LockHolder, LockRecord, ObjectKey, QueueHandle, RedbStore, StoreResult,
};

pub const T0: f64 = 1_700_000_000.0;

/// Address allocator that only remembers its block and what it handed out.
#[derive(Debug, Clone, PartialEq)]
pub struct TestIpManager {
    pub netblock: String,
    pub in_use: Vec<String>,
}

impl IpBlockManager for TestIpManager {
    type Error = String;

    fn from_cidr(netblock: &str) -> Result<Self, String> {
        if !netblock.contains('/') {
            return Err(format!("{netblock} is not a cidr"));
        }
        Ok(Self {
            netblock: netblock.to_string(),
            in_use: Vec::new(),
        })
    }

    fn save(&self) -> Value {
        json!({"netblock": self.netblock, "in_use": self.in_use})
    }

    fn from_snapshot(snapshot: Value) -> Result<Self, String> {
        let netblock = snapshot["netblock"].as_str().ok_or("missing netblock")?.to_string();
        let in_use = snapshot["in_use"]
            .as_array()
            .ok_or("missing in_use")?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        Ok(Self { netblock, in_use })
    }
}

/// Passes everything through to a [`RedbStore`], counting mutations.
pub struct CountingStore {
    inner: RedbStore,
    writes: AtomicUsize,
    lock_attempts: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: RedbStore) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
            lock_attempts: AtomicUsize::new(0),
        }
    }

    /// `put`, `create`, `delete` and `delete_all` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn lock_attempts(&self) -> usize {
        self.lock_attempts.load(Ordering::SeqCst)
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl CoordinationStore for CountingStore {
    fn get(&self, key: &ObjectKey) -> StoreResult<Option<Value>> {
        self.inner.get(key)
    }

    fn put(&self, key: &ObjectKey, value: &Value, ttl: Option<Duration>) -> StoreResult<()> {
        self.count_write();
        self.inner.put(key, value, ttl)
    }

    fn create(&self, key: &ObjectKey, value: &Value, ttl: Option<Duration>) -> StoreResult<bool> {
        self.count_write();
        self.inner.create(key, value, ttl)
    }

    fn delete(&self, key: &ObjectKey) -> StoreResult<bool> {
        self.count_write();
        self.inner.delete(key)
    }

    fn get_all(&self, object_type: &str, subtype: Option<&str>) -> StoreResult<Vec<(String, Value)>> {
        self.inner.get_all(object_type, subtype)
    }

    fn delete_all(&self, object_type: &str, subtype: Option<&str>) -> StoreResult<usize> {
        self.count_write();
        self.inner.delete_all(object_type, subtype)
    }

    fn try_lock(&self, key: &ObjectKey, holder: &LockHolder, ttl: Duration) -> StoreResult<Option<LeaseId>> {
        self.lock_attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.try_lock(key, holder, ttl)
    }

    fn refresh_lock(&self, key: &ObjectKey, lease: &LeaseId, ttl: Duration) -> StoreResult<bool> {
        self.inner.refresh_lock(key, lease, ttl)
    }

    fn release_lock(&self, key: &ObjectKey, lease: &LeaseId) -> StoreResult<bool> {
        self.inner.release_lock(key, lease)
    }

    fn existing_locks(&self) -> StoreResult<Vec<LockRecord>> {
        self.inner.existing_locks()
    }

    fn clear_stale_locks(&self) -> StoreResult<usize> {
        self.inner.clear_stale_locks()
    }

    fn enqueue(&self, queue: &str, item: &Value) -> StoreResult<()> {
        self.count_write();
        self.inner.enqueue(queue, item)
    }

    fn dequeue(&self, queue: &str) -> StoreResult<Option<(Value, QueueHandle)>> {
        self.inner.dequeue(queue)
    }

    fn resolve(&self, queue: &str, handle: &QueueHandle) -> StoreResult<bool> {
        self.inner.resolve(queue, handle)
    }

    fn queue_length(&self, queue: &str) -> StoreResult<usize> {
        self.inner.queue_length(queue)
    }

    fn restart_queues(&self) -> StoreResult<usize> {
        self.inner.restart_queues()
    }
}

pub struct Harness {
    pub db: ClusterDb,
    pub clock: Arc<ManualClock>,
    pub store: Arc<CountingStore>,
}

pub fn harness() -> Harness {
    harness_for("sf-1")
}

pub fn harness_for(node: &str) -> Harness {
    let clock = Arc::new(ManualClock::at(T0));
    let redb = RedbStore::open_in_memory().unwrap().with_clock(clock.clone());
    let store = Arc::new(CountingStore::new(redb));
    let config = ClusterConfig::for_node(node, "10.0.0.1");
    let db = ClusterDb::new(store.clone(), config).with_clock(clock.clone());
    Harness { db, clock, store }
}
