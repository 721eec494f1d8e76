//! Domain types for the cluster state layer.
//!
//! Each record is a closed struct serialized to JSON in the coordination
//! store. Fields this version does not know about are ignored on read, so
//! newer writers do not break older readers; they are not written back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vmgrid_store::Lockable;

/// Sentinel network uuid for the externally routable address pool.
pub const FLOATING_NETWORK: &str = "floating";

/// Fractional seconds since the unix epoch.
pub type Timestamp = f64;

/// A lifecycle state with terminal members.
pub trait LifecycleState: Copy + PartialEq + std::fmt::Debug {
    /// `deleted` or `error`: eligible for hard delete once old enough.
    fn is_terminal(self) -> bool;

    /// Whether a record in this state may move to `next`.
    fn can_transition_to(self, next: Self) -> bool;
}

/// A record tracked by a lifecycle state plus its last transition time.
pub trait Tracked {
    type State: LifecycleState;
    const OBJECT_TYPE: &'static str;

    fn uuid(&self) -> &str;
    fn state(&self) -> Self::State;
    fn state_updated(&self) -> Timestamp;
}

macro_rules! lifecycle {
    ($name:ident { $($variant:ident),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "kebab-case")]
        pub enum $name {
            $($variant),+
        }

        impl LifecycleState for $name {
            fn is_terminal(self) -> bool {
                matches!(self, $name::Deleted | $name::Error)
            }

            fn can_transition_to(self, next: Self) -> bool {
                match self {
                    $name::Deleted => false,
                    $name::Error => next == $name::Deleted,
                    _ => true,
                }
            }
        }
    };
}

lifecycle!(NetworkState { Initial, Created, Deleting, Deleted, Error });
lifecycle!(InstanceState { Initial, Preflight, Creating, Created, Deleting, Deleted, Error });
lifecycle!(InterfaceState { Initial, Created, Deleted, Error });

// ── Node ──────────────────────────────────────────────────────────

/// Liveness record for a hypervisor node. Absent once its TTL lapses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub fqdn: String,
    pub ip: String,
    pub lastseen: Timestamp,
    pub version: String,
}

// ── Network ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Network {
    pub uuid: String,
    /// VXLAN id. Zero only for the floating pool, which has none.
    pub vxid: u32,
    pub netblock: String,
    pub provide_dhcp: bool,
    pub provide_nat: bool,
    pub namespace: String,
    pub floating_gateway: Option<String>,
    pub name: String,
    pub state: NetworkState,
    pub state_updated: Timestamp,
}

// ── Instance ──────────────────────────────────────────────────────

/// Hypervisor-reported power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerState {
    #[default]
    Unknown,
    On,
    Off,
    Paused,
    Crashed,
    TransitionToOn,
    TransitionToOff,
    TransitionToPaused,
}

impl PowerState {
    /// A user-initiated change that the hypervisor has not confirmed yet.
    pub fn is_transition(self) -> bool {
        matches!(
            self,
            PowerState::TransitionToOn | PowerState::TransitionToOff | PowerState::TransitionToPaused
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiskSpec {
    pub size: Option<u64>,
    pub base: Option<String>,
    pub bus: Option<String>,
    #[serde(rename = "type", default = "default_disk_type")]
    pub kind: String,
}

fn default_disk_type() -> String {
    "disk".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoSpec {
    pub model: String,
    pub memory: u32,
}

impl Default for VideoSpec {
    fn default() -> Self {
        Self {
            model: "cirrus".to_string(),
            memory: 16384,
        }
    }
}

/// What a caller supplies to create an instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceSpec {
    pub name: String,
    pub cpus: u32,
    pub memory_mb: u64,
    pub disk_spec: Vec<DiskSpec>,
    pub ssh_key: Option<String>,
    pub user_data: Option<String>,
    pub namespace: String,
    pub video: VideoSpec,
    pub requested_placement: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub uuid: String,
    pub name: String,
    pub cpus: u32,
    pub memory_mb: u64,
    pub disk_spec: Vec<DiskSpec>,
    pub ssh_key: Option<String>,
    /// Node that currently owns this instance.
    pub node: Option<String>,
    pub console_port: Option<u16>,
    pub vdi_port: Option<u16>,
    /// Node the console and VDI ports are registered on.
    #[serde(default)]
    pub console_node: Option<String>,
    pub user_data: Option<String>,
    /// Opaque block device layout computed by the owning node.
    pub block_devices: Option<serde_json::Value>,
    pub state: InstanceState,
    pub state_updated: Timestamp,
    pub namespace: String,
    pub power_state: PowerState,
    pub power_state_previous: PowerState,
    pub power_state_updated: Timestamp,
    pub video: VideoSpec,
    pub node_history: Vec<String>,
    pub error_message: Option<String>,
    pub requested_placement: Option<String>,
    pub placement_attempts: u32,
    pub enforced_deletes: u32,
}

/// Listing filter for [`crate::ClusterDb::get_instances`].
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub only_node: Option<String>,
    pub include_deleted: bool,
    pub namespace: Option<String>,
}

// ── Network interface ─────────────────────────────────────────────

/// What a caller supplies to attach an instance to a network.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetDesc {
    pub network_uuid: String,
    pub address: Option<String>,
    pub macaddress: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkInterface {
    pub uuid: String,
    pub network_uuid: String,
    pub instance_uuid: String,
    pub macaddr: String,
    pub ipv4: Option<String>,
    pub order: u32,
    pub floating: Option<String>,
    pub state: InterfaceState,
    pub state_updated: Timestamp,
    pub model: String,
}

// ── Snapshot / event / metrics ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub uuid: String,
    pub device: String,
    pub instance_uuid: String,
    pub created: Timestamp,
}

/// One audit trail entry. Never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub timestamp: Timestamp,
    pub object_type: String,
    pub object_uuid: String,
    /// Node that recorded the event.
    pub fqdn: String,
    pub operation: String,
    pub phase: String,
    pub duration: Option<f64>,
    pub message: Option<String>,
}

/// A node's full set of metrics, replaced wholesale on every report.
pub type Metrics = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsRecord {
    pub fqdn: String,
    pub timestamp: Timestamp,
    pub metrics: Metrics,
}

// ── Trait impls ───────────────────────────────────────────────────

impl Tracked for Network {
    type State = NetworkState;
    const OBJECT_TYPE: &'static str = "network";

    fn uuid(&self) -> &str {
        &self.uuid
    }
    fn state(&self) -> NetworkState {
        self.state
    }
    fn state_updated(&self) -> Timestamp {
        self.state_updated
    }
}

impl Tracked for Instance {
    type State = InstanceState;
    const OBJECT_TYPE: &'static str = "instance";

    fn uuid(&self) -> &str {
        &self.uuid
    }
    fn state(&self) -> InstanceState {
        self.state
    }
    fn state_updated(&self) -> Timestamp {
        self.state_updated
    }
}

impl Tracked for NetworkInterface {
    type State = InterfaceState;
    const OBJECT_TYPE: &'static str = "networkinterface";

    fn uuid(&self) -> &str {
        &self.uuid
    }
    fn state(&self) -> InterfaceState {
        self.state
    }
    fn state_updated(&self) -> Timestamp {
        self.state_updated
    }
}

impl Lockable for Network {
    fn object_type(&self) -> &'static str {
        Self::OBJECT_TYPE
    }
    fn unique_label(&self) -> &str {
        &self.uuid
    }
}

impl Lockable for Instance {
    fn object_type(&self) -> &'static str {
        Self::OBJECT_TYPE
    }
    fn unique_label(&self) -> &str {
        &self.uuid
    }
}

impl Lockable for NetworkInterface {
    fn object_type(&self) -> &'static str {
        Self::OBJECT_TYPE
    }
    fn unique_label(&self) -> &str {
        &self.uuid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_serialize_kebab_case() {
        assert_eq!(serde_json::to_string(&InstanceState::Created).unwrap(), "\"created\"");
        assert_eq!(
            serde_json::to_string(&PowerState::TransitionToOn).unwrap(),
            "\"transition-to-on\""
        );
    }

    #[test]
    fn terminal_states() {
        assert!(InstanceState::Deleted.is_terminal());
        assert!(NetworkState::Error.is_terminal());
        assert!(!InterfaceState::Created.is_terminal());
    }

    #[test]
    fn deleted_is_final_and_error_only_leads_to_deleted() {
        assert!(!InstanceState::Deleted.can_transition_to(InstanceState::Created));
        assert!(InstanceState::Error.can_transition_to(InstanceState::Deleted));
        assert!(!InstanceState::Error.can_transition_to(InstanceState::Created));
        assert!(InstanceState::Initial.can_transition_to(InstanceState::Error));
    }

    #[test]
    fn disk_spec_type_field_is_renamed() {
        let disk: DiskSpec = serde_json::from_str(r#"{"size": 8, "base": "debian", "bus": null}"#).unwrap();
        assert_eq!(disk.kind, "disk");
        let json = serde_json::to_value(&disk).unwrap();
        assert_eq!(json["type"], "disk");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = r#"{"fqdn": "sf-1", "ip": "10.0.0.1", "lastseen": 1.0, "version": "0.1.0", "extra": true}"#;
        let node: Node = serde_json::from_str(raw).unwrap();
        assert_eq!(node.fqdn, "sf-1");
    }
}
