//! Network interface records: one per (instance, network) attachment.

use tracing::{info, warn};

use crate::db::ClusterDb;
use crate::error::StateResult;
use crate::types::{InterfaceState, LifecycleState, NetDesc, NetworkInterface, Tracked};

const INTERFACE: &str = NetworkInterface::OBJECT_TYPE;

impl ClusterDb {
    /// Record an interface, claiming its MAC address first.
    pub fn create_network_interface(
        &self,
        interface_uuid: &str,
        netdesc: &NetDesc,
        instance_uuid: &str,
        order: u32,
    ) -> StateResult<NetworkInterface> {
        let macaddr = self.allocate_macaddr(interface_uuid, netdesc.macaddress.as_deref())?;
        let interface = NetworkInterface {
            uuid: interface_uuid.to_string(),
            network_uuid: netdesc.network_uuid.clone(),
            instance_uuid: instance_uuid.to_string(),
            macaddr,
            ipv4: netdesc.address.clone(),
            order,
            floating: None,
            state: InterfaceState::Initial,
            state_updated: self.now(),
            model: netdesc.model.clone().unwrap_or_else(|| "virtio".to_string()),
        };
        self.write(INTERFACE, None, interface_uuid, &interface, None)?;
        info!(
            uuid = %interface_uuid,
            network = %interface.network_uuid,
            instance = %instance_uuid,
            mac = %interface.macaddr,
            "network interface created"
        );
        Ok(interface)
    }

    pub fn get_interface(&self, interface_uuid: &str) -> StateResult<Option<NetworkInterface>> {
        self.read(INTERFACE, None, interface_uuid)
    }

    /// Every interface of an instance, in attachment order.
    pub fn get_instance_interfaces(&self, instance_uuid: &str) -> StateResult<Vec<NetworkInterface>> {
        let mut interfaces: Vec<NetworkInterface> = self
            .read_all::<NetworkInterface>(INTERFACE, None)?
            .into_iter()
            .filter(|ni| ni.instance_uuid == instance_uuid)
            .collect();
        interfaces.sort_by_key(|ni| ni.order);
        Ok(interfaces)
    }

    pub fn get_network_interfaces(&self, network_uuid: &str) -> StateResult<Vec<NetworkInterface>> {
        Ok(self
            .read_all::<NetworkInterface>(INTERFACE, None)?
            .into_iter()
            .filter(|ni| ni.network_uuid == network_uuid)
            .collect())
    }

    /// Move an interface to `state`. Entering `deleted` frees its MAC.
    pub fn update_network_interface_state(
        &self,
        interface_uuid: &str,
        state: InterfaceState,
    ) -> StateResult<Option<NetworkInterface>> {
        let Some(updated) = self.update_object(
            INTERFACE,
            interface_uuid,
            "update interface state",
            |ni: &mut NetworkInterface, now| {
                if ni.state == state {
                    return false;
                }
                if !ni.state.can_transition_to(state) {
                    warn!(uuid = %ni.uuid, from = ?ni.state, to = ?state, "refusing interface state transition");
                    return false;
                }
                ni.state = state;
                ni.state_updated = now;
                true
            },
        )?
        else {
            return Ok(None);
        };

        if updated.changed {
            info!(uuid = %interface_uuid, ?state, "interface state updated");
            if state == InterfaceState::Deleted {
                self.release_macaddr(&updated.object.macaddr, interface_uuid)?;
            }
        }
        Ok(Some(updated.object))
    }

    pub fn add_floating_to_interface(&self, interface_uuid: &str, address: &str) -> StateResult<Option<NetworkInterface>> {
        let updated = self.update_object(INTERFACE, interface_uuid, "add floating", |ni: &mut NetworkInterface, _| {
            if ni.floating.as_deref() == Some(address) {
                return false;
            }
            ni.floating = Some(address.to_string());
            true
        })?;
        Ok(updated.map(|u| u.object))
    }

    pub fn remove_floating_from_interface(&self, interface_uuid: &str) -> StateResult<Option<NetworkInterface>> {
        let updated = self.update_object(INTERFACE, interface_uuid, "remove floating", |ni: &mut NetworkInterface, _| {
            ni.floating.take().is_some()
        })?;
        Ok(updated.map(|u| u.object))
    }

    /// Permanently remove an interface and its events. Safe to repeat.
    pub fn hard_delete_network_interface(&self, interface_uuid: &str) -> StateResult<()> {
        if let Some(interface) = self.get_interface(interface_uuid)? {
            self.release_macaddr(&interface.macaddr, interface_uuid)?;
        }
        self.remove(INTERFACE, None, interface_uuid)?;
        self.delete_events(INTERFACE, interface_uuid)?;
        self.delete_metadata(INTERFACE, interface_uuid)?;
        info!(uuid = %interface_uuid, "interface hard deleted");
        Ok(())
    }
}
