//! vmgrid-state — the cluster object layer for vmgrid.
//!
//! Gives every orchestrator component the same view of nodes, networks,
//! instances and network interfaces, plus the coordination built on top of
//! them: unique id allocation, per-node task queues, audit events, metrics
//! and GC of terminal objects.
//!
//! # Architecture
//!
//! Everything goes through an injected [`CoordinationStore`]; nothing is
//! cached in process. [`ClusterDb`] is a thin synchronous handle over it.
//! Each entity module adds its operations as an `impl ClusterDb` block.
//!
//! State changes are compare-and-set under the object's lock and write
//! nothing when the target state is already current. Multi-step deletes
//! are deliberately not atomic: each step is idempotent, and [`Reaper`]
//! finishes whatever a crash left behind.
//!
//! [`CoordinationStore`]: vmgrid_store::CoordinationStore

pub mod allocation;
pub mod db;
pub mod documents;
pub mod error;
pub mod events;
pub mod gc;
pub mod instances;
pub mod interfaces;
pub mod ipmanager;
pub mod metrics;
pub mod networks;
pub mod nodes;
pub mod snapshots;
pub mod tasks;
pub mod types;

pub use allocation::MAX_VXID;
pub use db::ClusterDb;
pub use error::{StateError, StateResult};
pub use gc::{Reaper, SweepReport};
pub use ipmanager::IpBlockManager;
pub use tasks::{dispatch, QueueItem, Task, TaskHandler};
pub use types::*;
