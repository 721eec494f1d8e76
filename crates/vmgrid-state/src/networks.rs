//! Network records and their lifecycle.
//!
//! Deleting a network is three separate writes: the state change, the
//! VXLAN id release and the IP manager release. They are not atomic. A
//! crash in between leaves a leaked id that the reaper recovers by running
//! [`ClusterDb::hard_delete_network`], which repeats the releases.

use tracing::{info, warn};

use crate::db::ClusterDb;
use crate::error::{StateError, StateResult};
use crate::ipmanager::IpBlockManager;
use crate::types::{LifecycleState, Network, NetworkState, Tracked, FLOATING_NETWORK};

const NETWORK: &str = Network::OBJECT_TYPE;

impl ClusterDb {
    pub fn get_network(&self, network_uuid: &str) -> StateResult<Option<Network>> {
        self.read(NETWORK, None, network_uuid)
    }

    /// Networks other than the floating pool.
    ///
    /// Deleted networks are skipped unless `include_deleted`.
    pub fn get_networks(&self, include_deleted: bool, namespace: Option<&str>) -> StateResult<Vec<Network>> {
        Ok(self
            .read_all::<Network>(NETWORK, None)?
            .into_iter()
            .filter(|n| n.uuid != FLOATING_NETWORK)
            .filter(|n| include_deleted || n.state != NetworkState::Deleted)
            .filter(|n| namespace.is_none_or(|ns| n.namespace == ns))
            .collect())
    }

    /// Create a network with a fresh uuid, VXLAN id and address block.
    pub fn allocate_network<M: IpBlockManager>(
        &self,
        netblock: &str,
        provide_dhcp: bool,
        provide_nat: bool,
        name: &str,
        namespace: &str,
    ) -> StateResult<Network> {
        // Build the manager first so a bad netblock cannot leak a vxid.
        let manager = M::from_cidr(netblock).map_err(|e| StateError::IpManager(e.to_string()))?;

        let network_uuid = uuid::Uuid::new_v4().to_string();
        let vxid = self.allocate_vxid(&network_uuid)?;
        self.persist_ipmanager(&network_uuid, &manager)?;

        let network = Network {
            uuid: network_uuid,
            vxid,
            netblock: netblock.to_string(),
            provide_dhcp,
            provide_nat,
            namespace: namespace.to_string(),
            floating_gateway: None,
            name: name.to_string(),
            state: NetworkState::Initial,
            state_updated: self.now(),
        };
        self.write(NETWORK, None, &network.uuid, &network, None)?;
        info!(uuid = %network.uuid, vxid, %netblock, %namespace, "network allocated");
        Ok(network)
    }

    /// Register the externally routable pool under the `floating` uuid.
    pub fn create_floating_network<M: IpBlockManager>(&self, netblock: &str) -> StateResult<Network> {
        let manager = M::from_cidr(netblock).map_err(|e| StateError::IpManager(e.to_string()))?;
        self.persist_ipmanager(FLOATING_NETWORK, &manager)?;

        let network = Network {
            uuid: FLOATING_NETWORK.to_string(),
            vxid: 0,
            netblock: netblock.to_string(),
            provide_dhcp: false,
            provide_nat: false,
            namespace: "system".to_string(),
            floating_gateway: None,
            name: FLOATING_NETWORK.to_string(),
            state: NetworkState::Created,
            state_updated: self.now(),
        };
        self.write(NETWORK, None, FLOATING_NETWORK, &network, None)?;
        info!(%netblock, "floating network created");
        Ok(network)
    }

    pub fn get_floating_network(&self) -> StateResult<Option<Network>> {
        self.get_network(FLOATING_NETWORK)
    }

    pub fn set_floating_gateway(&self, network_uuid: &str, gateway: Option<&str>) -> StateResult<Option<Network>> {
        let updated = self.update_object(NETWORK, network_uuid, "set floating gateway", |n: &mut Network, _| {
            if n.floating_gateway.as_deref() == gateway {
                return false;
            }
            n.floating_gateway = gateway.map(str::to_string);
            true
        })?;
        Ok(updated.map(|u| u.object))
    }

    /// Move a network to `state`. A no-op if it is already there.
    ///
    /// Entering `deleted` releases the VXLAN id and then the IP manager.
    pub fn update_network_state(&self, network_uuid: &str, state: NetworkState) -> StateResult<Option<Network>> {
        let Some(updated) = self.update_object(NETWORK, network_uuid, "update network state", |n: &mut Network, now| {
            if n.state == state {
                return false;
            }
            if !n.state.can_transition_to(state) {
                warn!(uuid = %n.uuid, from = ?n.state, to = ?state, "refusing network state transition");
                return false;
            }
            n.state = state;
            n.state_updated = now;
            true
        })?
        else {
            return Ok(None);
        };

        if updated.changed {
            info!(uuid = %network_uuid, ?state, "network state updated");
            if state == NetworkState::Deleted {
                self.release_network_resources(&updated.object)?;
            }
        }
        Ok(Some(updated.object))
    }

    /// Permanently remove a network, its events and its metadata.
    ///
    /// Safe to repeat; also repeats the id and IP manager releases in case
    /// an earlier delete stopped half way.
    pub fn hard_delete_network(&self, network_uuid: &str) -> StateResult<()> {
        if let Some(network) = self.get_network(network_uuid)? {
            self.release_network_resources(&network)?;
        }
        self.remove(NETWORK, None, network_uuid)?;
        self.delete_events(NETWORK, network_uuid)?;
        self.delete_metadata(NETWORK, network_uuid)?;
        info!(uuid = %network_uuid, "network hard deleted");
        Ok(())
    }

    fn release_network_resources(&self, network: &Network) -> StateResult<()> {
        if network.vxid != 0 {
            self.release_vxid(network.vxid, &network.uuid)?;
        }
        self.delete_ipmanager(&network.uuid)?;
        Ok(())
    }
}
