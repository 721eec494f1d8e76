//! RedbStore — the embedded coordination store backend.
//!
//! Every mutating primitive runs in exactly one redb write transaction.
//! redb serializes write transactions, which is what makes `create`, lock
//! claims and queue claims atomic across threads sharing one store.
//! TTLs are enforced on read against the injected clock. Expired records
//! stay on disk, invisible, until [`RedbStore::purge_expired`] removes them
//! (`vmgrid-admin purge-expired`). An expired lock or `create` target is
//! simply overwritten by the next claim.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use vmgrid_core::{SharedClock, SystemClock};

use crate::error::{StoreError, StoreResult};
use crate::key::{check_component, scope_prefix, ObjectKey};
use crate::lock::{LeaseId, LockHolder, LockRecord};
use crate::queue::{entry_key, queue_prefix, Claim, QueueEntry, QueueHandle};
use crate::store::CoordinationStore;
use crate::tables::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Stored form of an object value.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    value: Value,
    expires_at: Option<f64>,
}

impl Envelope {
    fn is_live(&self, now: f64) -> bool {
        self.expires_at.is_none_or(|t| t > now)
    }
}

/// Thread-safe coordination store backed by redb.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    clock: SharedClock,
}

impl RedbStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            clock: Arc::new(SystemClock),
        };
        store.ensure_tables()?;
        debug!(?path, "coordination store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            clock: Arc::new(SystemClock),
        };
        store.ensure_tables()?;
        debug!("in-memory coordination store opened");
        Ok(store)
    }

    /// Replace the clock used for TTL decisions.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        txn.open_table(LOCKS).map_err(map_err!(Table))?;
        txn.open_table(QUEUES).map_err(map_err!(Table))?;
        txn.open_table(QUEUE_SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn now(&self) -> f64 {
        self.clock.now()
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<f64> {
        ttl.map(|ttl| self.now() + ttl.as_secs_f64())
    }

    /// Physically remove expired objects and locks. Returns how many went.
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let now = self.now();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut purged = 0;
        {
            let mut objects = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            let expired: Vec<String> = scan_prefix(&objects, "")?
                .into_iter()
                .filter_map(|(key, raw)| {
                    let envelope: Envelope = serde_json::from_slice(&raw).ok()?;
                    (!envelope.is_live(now)).then_some(key)
                })
                .collect();
            for key in &expired {
                objects.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            purged += expired.len();
        }
        purged += remove_expired_locks(&txn, now)?;
        txn.commit().map_err(map_err!(Transaction))?;
        if purged > 0 {
            info!(purged, "expired records purged");
        }
        Ok(purged)
    }
}

impl CoordinationStore for RedbStore {
    fn get(&self, key: &ObjectKey) -> StoreResult<Option<Value>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        let envelope = match table.get(key.encode().as_str()).map_err(map_err!(Read))? {
            Some(guard) => decode_envelope(guard.value())?,
            None => return Ok(None),
        };
        Ok(envelope.is_live(self.now()).then_some(envelope.value))
    }

    fn put(&self, key: &ObjectKey, value: &Value, ttl: Option<Duration>) -> StoreResult<()> {
        let encoded = key.encode();
        let raw = encode_envelope(value, self.expiry(ttl))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            table
                .insert(encoded.as_str(), raw.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %encoded, ?ttl, "object stored");
        Ok(())
    }

    fn create(&self, key: &ObjectKey, value: &Value, ttl: Option<Duration>) -> StoreResult<bool> {
        let encoded = key.encode();
        let now = self.now();
        let raw = encode_envelope(value, self.expiry(ttl))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            let occupied = match table.get(encoded.as_str()).map_err(map_err!(Read))? {
                Some(guard) => decode_envelope(guard.value())?.is_live(now),
                None => false,
            };
            if occupied {
                return Ok(false);
            }
            table
                .insert(encoded.as_str(), raw.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %encoded, "object created");
        Ok(true)
    }

    fn delete(&self, key: &ObjectKey) -> StoreResult<bool> {
        let encoded = key.encode();
        let now = self.now();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            existed = match table.remove(encoded.as_str()).map_err(map_err!(Write))? {
                Some(guard) => decode_envelope(guard.value())?.is_live(now),
                None => false,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %encoded, existed, "object deleted");
        Ok(existed)
    }

    fn get_all(&self, object_type: &str, subtype: Option<&str>) -> StoreResult<Vec<(String, Value)>> {
        let prefix = scope_prefix(object_type, subtype)?;
        let now = self.now();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for (key, raw) in scan_prefix(&table, &prefix)? {
            let envelope = decode_envelope(&raw)?;
            if envelope.is_live(now) {
                results.push((key[prefix.len()..].to_string(), envelope.value));
            }
        }
        Ok(results)
    }

    fn delete_all(&self, object_type: &str, subtype: Option<&str>) -> StoreResult<usize> {
        let prefix = scope_prefix(object_type, subtype)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            let keys: Vec<String> = scan_prefix(&table, &prefix)?
                .into_iter()
                .map(|(key, _)| key)
                .collect();
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            count = keys.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%prefix, count, "scope deleted");
        Ok(count)
    }

    fn try_lock(&self, key: &ObjectKey, holder: &LockHolder, ttl: Duration) -> StoreResult<Option<LeaseId>> {
        let encoded = key.encode();
        let now = self.now();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let lease;
        {
            let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
            let current = match table.get(encoded.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(decode::<LockRecord>(guard.value())?),
                None => None,
            };
            if current.is_some_and(|record| record.expires_at > now) {
                return Ok(None);
            }
            lease = LeaseId::generate();
            let record = LockRecord {
                key: encoded.clone(),
                lease: lease.clone(),
                holder: holder.clone(),
                acquired_at: now,
                expires_at: now + ttl.as_secs_f64(),
            };
            let raw = encode(&record)?;
            table
                .insert(encoded.as_str(), raw.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(Some(lease))
    }

    fn refresh_lock(&self, key: &ObjectKey, lease: &LeaseId, ttl: Duration) -> StoreResult<bool> {
        let encoded = key.encode();
        let now = self.now();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
            let current = match table.get(encoded.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(decode::<LockRecord>(guard.value())?),
                None => None,
            };
            let Some(mut record) = current.filter(|r| &r.lease == lease && r.expires_at > now) else {
                return Ok(false);
            };
            record.expires_at = now + ttl.as_secs_f64();
            let raw = encode(&record)?;
            table
                .insert(encoded.as_str(), raw.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(true)
    }

    fn release_lock(&self, key: &ObjectKey, lease: &LeaseId) -> StoreResult<bool> {
        let encoded = key.encode();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
            let owned = match table.get(encoded.as_str()).map_err(map_err!(Read))? {
                Some(guard) => &decode::<LockRecord>(guard.value())?.lease == lease,
                None => false,
            };
            if !owned {
                return Ok(false);
            }
            table.remove(encoded.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(true)
    }

    fn existing_locks(&self) -> StoreResult<Vec<LockRecord>> {
        let now = self.now();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for (_, raw) in scan_prefix(&table, "")? {
            let record: LockRecord = decode(&raw)?;
            if record.expires_at > now {
                results.push(record);
            }
        }
        Ok(results)
    }

    fn clear_stale_locks(&self) -> StoreResult<usize> {
        let now = self.now();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let cleared = remove_expired_locks(&txn, now)?;
        txn.commit().map_err(map_err!(Transaction))?;
        if cleared > 0 {
            info!(cleared, "stale locks cleared");
        }
        Ok(cleared)
    }

    fn enqueue(&self, queue: &str, item: &Value) -> StoreResult<()> {
        check_component(queue)?;
        let entry = QueueEntry {
            item: item.clone(),
            enqueued_at: self.now(),
            claim: None,
        };
        let raw = encode(&entry)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let key;
        {
            let mut sequences = txn.open_table(QUEUE_SEQUENCES).map_err(map_err!(Table))?;
            let sequence = sequences
                .get(queue)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            sequences
                .insert(queue, sequence + 1)
                .map_err(map_err!(Write))?;

            key = entry_key(queue, sequence);
            let mut table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), raw.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%queue, %key, "item enqueued");
        Ok(())
    }

    fn dequeue(&self, queue: &str) -> StoreResult<Option<(Value, QueueHandle)>> {
        check_component(queue)?;
        let prefix = queue_prefix(queue);
        let now = self.now();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let claimed;
        {
            let mut table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
            let mut next = None;
            for (key, raw) in scan_prefix(&table, &prefix)? {
                let entry: QueueEntry = decode(&raw)?;
                if entry.claim.is_none() {
                    next = Some((key, entry));
                    break;
                }
            }
            let Some((key, mut entry)) = next else {
                return Ok(None);
            };

            let claim_id = uuid::Uuid::new_v4().to_string();
            entry.claim = Some(Claim {
                id: claim_id.clone(),
                claimed_at: now,
            });
            let raw = encode(&entry)?;
            table
                .insert(key.as_str(), raw.as_slice())
                .map_err(map_err!(Write))?;
            claimed = (
                entry.item,
                QueueHandle {
                    entry: key,
                    claim: claim_id,
                },
            );
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%queue, entry = %claimed.1.entry, "item claimed");
        Ok(Some(claimed))
    }

    fn resolve(&self, queue: &str, handle: &QueueHandle) -> StoreResult<bool> {
        if !handle.entry.starts_with(&queue_prefix(queue)) {
            return Ok(false);
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
            let owned = match table.get(handle.entry.as_str()).map_err(map_err!(Read))? {
                Some(guard) => decode::<QueueEntry>(guard.value())?
                    .claim
                    .is_some_and(|claim| claim.id == handle.claim),
                None => false,
            };
            if !owned {
                return Ok(false);
            }
            table
                .remove(handle.entry.as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%queue, entry = %handle.entry, "item resolved");
        Ok(true)
    }

    fn queue_length(&self, queue: &str) -> StoreResult<usize> {
        check_component(queue)?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
        Ok(scan_prefix(&table, &queue_prefix(queue))?.len())
    }

    fn restart_queues(&self) -> StoreResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut restarted = 0;
        {
            let mut table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
            for (key, raw) in scan_prefix(&table, "")? {
                let mut entry: QueueEntry = decode(&raw)?;
                if entry.claim.take().is_none() {
                    continue;
                }
                let raw = encode(&entry)?;
                table
                    .insert(key.as_str(), raw.as_slice())
                    .map_err(map_err!(Write))?;
                restarted += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(restarted, "queue claims cleared");
        Ok(restarted)
    }
}

/// Every `(key, raw value)` whose key starts with `prefix`, in key order.
fn scan_prefix<T>(table: &T, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.range(prefix..).map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        results.push((key.to_string(), value.value().to_vec()));
    }
    Ok(results)
}

fn remove_expired_locks(txn: &redb::WriteTransaction, now: f64) -> StoreResult<usize> {
    let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
    let mut expired = Vec::new();
    for (key, raw) in scan_prefix(&table, "")? {
        let record: LockRecord = decode(&raw)?;
        if record.expires_at <= now {
            expired.push(key);
        }
    }
    for key in &expired {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(expired.len())
}

fn encode_envelope(value: &Value, expires_at: Option<f64>) -> StoreResult<Vec<u8>> {
    encode(&Envelope {
        value: value.clone(),
        expires_at,
    })
}

fn decode_envelope(raw: &[u8]) -> StoreResult<Envelope> {
    decode(raw)
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: for<'de> Deserialize<'de>>(raw: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(raw).map_err(map_err!(Deserialize))
}
