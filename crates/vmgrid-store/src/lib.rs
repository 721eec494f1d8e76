//! vmgrid-store — the coordination store facade for vmgrid.
//!
//! Every piece of shared cluster state, and every cross-process
//! coordination primitive, goes through [`CoordinationStore`]:
//!
//! - scoped `get`/`put`/`delete`/`create`/`get_all`/`delete_all` over
//!   `(type, subtype, name)` keys with optional TTL
//! - TTL-leased locks ([`LockManager`], [`Lock`])
//! - claimable per-name FIFO queues
//!
//! [`RedbStore`] is the embedded backend. It is `Clone` + `Send` + `Sync`
//! (backed by `Arc<Database>`) and can be shared across threads and tasks.

pub mod error;
pub mod key;
pub mod lock;
pub mod queue;
pub mod redb_store;
pub mod retry;
pub mod store;
pub mod tables;

pub use error::{StoreError, StoreResult};
pub use key::ObjectKey;
pub use lock::{LeaseId, Lock, LockHolder, LockManager, LockRecord, Lockable};
pub use queue::QueueHandle;
pub use redb_store::RedbStore;
pub use retry::{retry_until, Backoff};
pub use store::{CoordinationStore, StoreExt};
