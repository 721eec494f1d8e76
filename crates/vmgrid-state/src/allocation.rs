//! Unique id registries: VXLAN ids, MAC addresses and console ports.
//!
//! Each id is claimed by a create-if-absent on its own key; losing the
//! race just means trying the next candidate. Records name their owner so
//! a release on behalf of one object can never free an id that has since
//! been handed to another.

use std::net::TcpListener;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vmgrid_store::{ObjectKey, StoreExt};

use crate::db::ClusterDb;
use crate::error::{StateError, StateResult};

const VXLAN: &str = "vxlan";
const MACADDRESS: &str = "macaddress";
const CONSOLE: &str = "console";

/// Largest id a 24-bit VXLAN network identifier can carry.
pub const MAX_VXID: u32 = (1 << 24) - 1;

const MAX_PORT_ATTEMPTS: usize = 1000;
const MAX_MAC_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct VxlanOwner {
    network_uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct MacOwner {
    interface_uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct ConsoleOwner {
    instance_uuid: String,
    port: u16,
}

impl ClusterDb {
    // ── VXLAN ids ──────────────────────────────────────────────────

    /// Claim the lowest free VXLAN id for a network.
    pub fn allocate_vxid(&self, network_uuid: &str) -> StateResult<u32> {
        let owner = VxlanOwner {
            network_uuid: network_uuid.to_string(),
        };
        for vxid in 1..=MAX_VXID {
            let key = ObjectKey::new(VXLAN, None, vxid)?;
            if self.store().create_as(&key, &owner, None)? {
                info!(%network_uuid, vxid, "vxid allocated");
                return Ok(vxid);
            }
        }
        Err(StateError::Allocation("vxlan id space exhausted".to_string()))
    }

    /// Free a VXLAN id, but only if `network_uuid` still owns it.
    pub fn release_vxid(&self, vxid: u32, network_uuid: &str) -> StateResult<bool> {
        let name = vxid.to_string();
        match self.read::<VxlanOwner>(VXLAN, None, &name)? {
            Some(owner) if owner.network_uuid == network_uuid => {
                let released = self.remove(VXLAN, None, &name)?;
                debug!(%network_uuid, vxid, "vxid released");
                Ok(released)
            }
            Some(owner) => {
                warn!(%network_uuid, vxid, owner = %owner.network_uuid, "vxid owned by another network, not releasing");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    // ── MAC addresses ──────────────────────────────────────────────

    /// Claim `requested`, or a random locally administered address.
    pub fn allocate_macaddr(&self, interface_uuid: &str, requested: Option<&str>) -> StateResult<String> {
        let owner = MacOwner {
            interface_uuid: interface_uuid.to_string(),
        };
        if let Some(mac) = requested {
            let key = ObjectKey::new(MACADDRESS, None, mac)?;
            if !self.store().create_as(&key, &owner, None)? {
                return Err(StateError::MacAddressInUse(mac.to_string()));
            }
            return Ok(mac.to_string());
        }

        let mut rng = rand::thread_rng();
        for _ in 0..MAX_MAC_ATTEMPTS {
            let mac = random_macaddr(&mut rng);
            let key = ObjectKey::new(MACADDRESS, None, &mac)?;
            if self.store().create_as(&key, &owner, None)? {
                debug!(%interface_uuid, %mac, "mac address allocated");
                return Ok(mac);
            }
        }
        Err(StateError::Allocation("no free mac address found".to_string()))
    }

    pub fn release_macaddr(&self, macaddr: &str, interface_uuid: &str) -> StateResult<bool> {
        match self.read::<MacOwner>(MACADDRESS, None, macaddr)? {
            Some(owner) if owner.interface_uuid == interface_uuid => {
                let released = self.remove(MACADDRESS, None, macaddr)?;
                debug!(%interface_uuid, %macaddr, "mac address released");
                Ok(released)
            }
            _ => Ok(false),
        }
    }

    // ── Console ports ──────────────────────────────────────────────

    /// Claim a TCP port on this node for an instance console.
    ///
    /// The candidate port is bound for real before it is registered, and
    /// stays bound until registration has been attempted, so a process
    /// outside the cluster cannot grab it in between.
    pub fn allocate_console_port(&self, instance_uuid: &str) -> StateResult<u16> {
        let node = self.node_name().to_string();
        let _lock = self.default_lock(CONSOLE, None, &node, "allocate console port")?;

        let consumed: Vec<u16> = self
            .read_all::<ConsoleOwner>(CONSOLE, Some(&node))?
            .into_iter()
            .map(|owner| owner.port)
            .collect();

        let range = self.config().console_ports();
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_PORT_ATTEMPTS {
            let port = rng.gen_range(range.clone());
            if consumed.contains(&port) {
                continue;
            }
            let Ok(socket) = TcpListener::bind(("0.0.0.0", port)) else {
                continue;
            };

            let owner = ConsoleOwner {
                instance_uuid: instance_uuid.to_string(),
                port,
            };
            let key = ObjectKey::new(CONSOLE, Some(&node), port)?;
            let registered = self.store().create_as(&key, &owner, None)?;
            drop(socket);
            if registered {
                debug!(%instance_uuid, %node, port, "console port allocated");
                return Ok(port);
            }
        }
        Err(StateError::Allocation(format!("no free console port on {node}")))
    }

    /// Free a console port on `node`, but only if `instance_uuid` still owns it.
    pub fn free_console_port(&self, node: &str, port: u16, instance_uuid: &str) -> StateResult<bool> {
        let _lock = self.default_lock(CONSOLE, None, node, "free console port")?;
        let name = port.to_string();
        match self.read::<ConsoleOwner>(CONSOLE, Some(node), &name)? {
            Some(owner) if owner.instance_uuid == instance_uuid => {
                let freed = self.remove(CONSOLE, Some(node), &name)?;
                debug!(%instance_uuid, %node, port, "console port freed");
                Ok(freed)
            }
            Some(owner) => {
                warn!(%instance_uuid, %node, port, owner = %owner.instance_uuid, "console port owned by another instance, not freeing");
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

fn random_macaddr(rng: &mut impl Rng) -> String {
    format!(
        "02:00:00:{:02x}:{:02x}:{:02x}",
        rng.r#gen::<u8>(),
        rng.r#gen::<u8>(),
        rng.r#gen::<u8>()
    )
}
