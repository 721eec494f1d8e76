//! Claimable FIFO queue entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Receipt for a dequeued item. Needed to resolve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHandle {
    pub(crate) entry: String,
    pub(crate) claim: String,
}

impl QueueHandle {
    /// Store key of the claimed entry.
    pub fn entry(&self) -> &str {
        &self.entry
    }
}

/// A queue entry as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct QueueEntry {
    pub item: Value,
    pub enqueued_at: f64,
    pub claim: Option<Claim>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Claim {
    pub id: String,
    pub claimed_at: f64,
}

pub(crate) fn entry_key(queue: &str, sequence: u64) -> String {
    format!("{queue}/{sequence:020}")
}

pub(crate) fn queue_prefix(queue: &str) -> String {
    format!("{queue}/")
}
