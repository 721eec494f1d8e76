//! Instance disk snapshots. Append-only, listed oldest first.

use tracing::info;

use vmgrid_store::{ObjectKey, StoreExt};

use crate::db::ClusterDb;
use crate::error::StateResult;
use crate::events::ordered_name;
use crate::types::{Snapshot, Timestamp};

const SNAPSHOT: &str = "snapshot";

impl ClusterDb {
    pub fn create_snapshot(
        &self,
        snapshot_uuid: &str,
        device: &str,
        instance_uuid: &str,
        created: Timestamp,
    ) -> StateResult<Snapshot> {
        let mut snapshot = Snapshot {
            uuid: snapshot_uuid.to_string(),
            device: device.to_string(),
            instance_uuid: instance_uuid.to_string(),
            created,
        };
        let mut micros = ordered_name(created);
        loop {
            let key = ObjectKey::new(SNAPSHOT, Some(instance_uuid), format!("{micros:020}"))?;
            if self.store().create_as(&key, &snapshot, None)? {
                break;
            }
            micros += 1;
            snapshot.created = micros as f64 / 1_000_000.0;
        }
        info!(uuid = %snapshot_uuid, instance = %instance_uuid, %device, "snapshot recorded");
        Ok(snapshot)
    }

    pub fn get_instance_snapshots(&self, instance_uuid: &str) -> StateResult<Vec<Snapshot>> {
        self.read_all(SNAPSHOT, Some(instance_uuid))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vmgrid_core::ClusterConfig;
    use vmgrid_store::RedbStore;

    use super::*;

    #[test]
    fn snapshots_list_in_creation_order() {
        let store = RedbStore::open_in_memory().unwrap();
        let db = ClusterDb::new(Arc::new(store), ClusterConfig::default());

        db.create_snapshot("snap-2", "vda", "i-1", 2000.0).unwrap();
        db.create_snapshot("snap-1", "vda", "i-1", 1000.0).unwrap();
        db.create_snapshot("snap-3", "vdb", "i-1", 1000.0).unwrap();
        db.create_snapshot("other", "vda", "i-2", 1500.0).unwrap();

        let snapshots = db.get_instance_snapshots("i-1").unwrap();
        let uuids: Vec<&str> = snapshots.iter().map(|s| s.uuid.as_str()).collect();
        assert_eq!(uuids, ["snap-1", "snap-3", "snap-2"]);
    }
}
