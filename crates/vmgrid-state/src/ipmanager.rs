//! Seam to the IP block manager.
//!
//! Address arithmetic is not done here. The cluster layer only needs to
//! construct a manager for a new network and persist or reload its
//! serialized snapshot, keyed by network uuid.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::ClusterDb;
use crate::error::{StateError, StateResult};

const IPMANAGER: &str = "ipmanager";

/// An address allocator for one network block.
pub trait IpBlockManager: Sized {
    type Error: std::fmt::Display;

    fn from_cidr(netblock: &str) -> Result<Self, Self::Error>;
    fn save(&self) -> serde_json::Value;
    fn from_snapshot(snapshot: serde_json::Value) -> Result<Self, Self::Error>;
}

#[derive(Serialize, Deserialize)]
struct StoredIpManager {
    ipmanager: serde_json::Value,
}

impl ClusterDb {
    pub fn get_ipmanager<M: IpBlockManager>(&self, network_uuid: &str) -> StateResult<Option<M>> {
        let Some(stored) = self.read::<StoredIpManager>(IPMANAGER, None, network_uuid)? else {
            return Ok(None);
        };
        M::from_snapshot(stored.ipmanager)
            .map(Some)
            .map_err(|e| StateError::IpManager(e.to_string()))
    }

    pub fn persist_ipmanager<M: IpBlockManager>(&self, network_uuid: &str, manager: &M) -> StateResult<()> {
        let stored = StoredIpManager {
            ipmanager: manager.save(),
        };
        self.write(IPMANAGER, None, network_uuid, &stored, None)?;
        debug!(%network_uuid, "ip manager persisted");
        Ok(())
    }

    pub fn delete_ipmanager(&self, network_uuid: &str) -> StateResult<bool> {
        self.remove(IPMANAGER, None, network_uuid)
    }
}
