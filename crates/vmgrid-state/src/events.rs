//! Audit trail.
//!
//! Events are filed per object under a name derived from their timestamp,
//! so a scope scan replays them in order. They are only ever removed with
//! the object they describe.

use tracing::debug;

use vmgrid_store::{ObjectKey, StoreExt};

use crate::db::ClusterDb;
use crate::error::StateResult;
use crate::types::{Event, Timestamp};

const EVENT: &str = "event";

impl ClusterDb {
    /// Append an event for `(object_type, object_uuid)` stamped now.
    pub fn add_event(
        &self,
        object_type: &str,
        object_uuid: &str,
        operation: &str,
        phase: &str,
        duration: Option<f64>,
        message: Option<&str>,
    ) -> StateResult<Event> {
        let scope = event_scope(object_type, object_uuid);
        let mut event = Event {
            timestamp: self.now(),
            object_type: object_type.to_string(),
            object_uuid: object_uuid.to_string(),
            fqdn: self.node_name().to_string(),
            operation: operation.to_string(),
            phase: phase.to_string(),
            duration,
            message: message.map(str::to_string),
        };

        // Two events in the same microsecond: the later one moves up by one.
        let mut micros = ordered_name(event.timestamp);
        loop {
            let key = ObjectKey::new(EVENT, Some(&scope), format!("{micros:020}"))?;
            if self.store().create_as(&key, &event, None)? {
                break;
            }
            micros += 1;
            event.timestamp = micros as f64 / 1_000_000.0;
        }
        debug!(%object_type, %object_uuid, %operation, %phase, "event recorded");
        Ok(event)
    }

    /// Every event for an object, oldest first.
    pub fn get_events(&self, object_type: &str, object_uuid: &str) -> StateResult<Vec<Event>> {
        self.read_all(EVENT, Some(&event_scope(object_type, object_uuid)))
    }

    pub(crate) fn delete_events(&self, object_type: &str, object_uuid: &str) -> StateResult<usize> {
        Ok(self
            .store()
            .delete_all(EVENT, Some(&event_scope(object_type, object_uuid)))?)
    }
}

fn event_scope(object_type: &str, object_uuid: &str) -> String {
    format!("{object_type}:{object_uuid}")
}

/// Microseconds since the epoch; zero-padded, sorts like the timestamp.
pub(crate) fn ordered_name(timestamp: Timestamp) -> u64 {
    (timestamp.max(0.0) * 1_000_000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use vmgrid_core::{ClusterConfig, ManualClock};
    use vmgrid_store::RedbStore;

    use super::*;

    fn test_db() -> (ClusterDb, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(1_700_000_000.0));
        let store = RedbStore::open_in_memory().unwrap().with_clock(clock.clone());
        let db = ClusterDb::new(Arc::new(store), ClusterConfig::for_node("sf-1", "10.0.0.1")).with_clock(clock.clone());
        (db, clock)
    }

    #[test]
    fn events_replay_in_order() {
        let (db, clock) = test_db();
        db.add_event("instance", "i-1", "create", "start", None, None).unwrap();
        clock.advance(Duration::from_secs(3));
        db.add_event("instance", "i-1", "create", "finish", Some(3.0), Some("ok")).unwrap();
        db.add_event("instance", "i-2", "create", "start", None, None).unwrap();

        let events = db.get_events("instance", "i-1").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].phase, "start");
        assert_eq!(events[1].phase, "finish");
        assert_eq!(events[1].duration, Some(3.0));
        assert_eq!(events[1].fqdn, "sf-1");
    }

    #[test]
    fn same_instant_events_are_both_kept() {
        let (db, _clock) = test_db();
        let first = db.add_event("network", "n-1", "create", "start", None, None).unwrap();
        let second = db.add_event("network", "n-1", "create", "finish", None, None).unwrap();

        assert!(second.timestamp > first.timestamp);
        let events = db.get_events("network", "n-1").unwrap();
        assert_eq!(events.iter().map(|e| e.phase.as_str()).collect::<Vec<_>>(), ["start", "finish"]);
    }

    #[test]
    fn delete_events_clears_one_object() {
        let (db, _clock) = test_db();
        db.add_event("instance", "i-1", "create", "start", None, None).unwrap();
        db.add_event("instance", "i-2", "create", "start", None, None).unwrap();

        assert_eq!(db.delete_events("instance", "i-1").unwrap(), 1);
        assert!(db.get_events("instance", "i-1").unwrap().is_empty());
        assert_eq!(db.get_events("instance", "i-2").unwrap().len(), 1);
    }
}
