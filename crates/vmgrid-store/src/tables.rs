//! redb table definitions for the coordination store.
//!
//! Keys are `&str`, values are JSON unless noted. Object keys follow
//! `{type}/{subtype}/{name}` with an empty subtype segment when absent;
//! queue entries are `{queue}/{sequence:020}` so key order is FIFO order.

use redb::TableDefinition;

/// Scoped objects wrapped in an expiry envelope.
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");

/// Lock leases keyed by the encoded object key they protect.
pub const LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("locks");

/// Queue entries keyed by `{queue}/{sequence}`.
pub const QUEUES: TableDefinition<&str, &[u8]> = TableDefinition::new("queues");

/// Next sequence number per queue name.
pub const QUEUE_SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("queue_sequences");
