//! Instance records and their lifecycle.
//!
//! Besides the usual state field an instance tracks who owns it
//! (`node`, with a placement counter callers use for backoff) and a power
//! state reported by the hypervisor, which is debounced against
//! user-initiated transitions.

use tracing::{debug, info, warn};

use crate::db::ClusterDb;
use crate::error::StateResult;
use crate::types::{Instance, InstanceFilter, InstanceSpec, InstanceState, LifecycleState, PowerState, Tracked};

const INSTANCE: &str = Instance::OBJECT_TYPE;

impl ClusterDb {
    pub fn get_instance(&self, instance_uuid: &str) -> StateResult<Option<Instance>> {
        self.read(INSTANCE, None, instance_uuid)
    }

    pub fn get_instances(&self, filter: &InstanceFilter) -> StateResult<Vec<Instance>> {
        Ok(self
            .read_all::<Instance>(INSTANCE, None)?
            .into_iter()
            .filter(|i| filter.include_deleted || i.state != InstanceState::Deleted)
            .filter(|i| {
                filter
                    .only_node
                    .as_deref()
                    .is_none_or(|node| i.node.as_deref() == Some(node))
            })
            .filter(|i| filter.namespace.as_deref().is_none_or(|ns| i.namespace == ns))
            .collect())
    }

    /// Record a new instance in the `initial` state, not yet placed.
    pub fn create_instance(&self, instance_uuid: &str, spec: InstanceSpec) -> StateResult<Instance> {
        let now = self.now();
        let instance = Instance {
            uuid: instance_uuid.to_string(),
            name: spec.name,
            cpus: spec.cpus,
            memory_mb: spec.memory_mb,
            disk_spec: spec.disk_spec,
            ssh_key: spec.ssh_key,
            node: None,
            console_port: None,
            vdi_port: None,
            console_node: None,
            user_data: spec.user_data,
            block_devices: None,
            state: InstanceState::Initial,
            state_updated: now,
            namespace: spec.namespace,
            power_state: PowerState::Unknown,
            power_state_previous: PowerState::Unknown,
            power_state_updated: now,
            video: spec.video,
            node_history: Vec::new(),
            error_message: None,
            requested_placement: spec.requested_placement,
            placement_attempts: 0,
            enforced_deletes: 0,
        };
        self.write(INSTANCE, None, instance_uuid, &instance, None)?;
        info!(uuid = %instance_uuid, name = %instance.name, namespace = %instance.namespace, "instance created");
        Ok(instance)
    }

    /// Assign an instance to `node`.
    ///
    /// Only an actual change of owner is written; it appends to the node
    /// history and bumps `placement_attempts` by exactly one.
    pub fn place_instance(&self, instance_uuid: &str, node: &str) -> StateResult<Option<Instance>> {
        let updated = self.update_object(INSTANCE, instance_uuid, "place instance", |i: &mut Instance, _| {
            if i.node.as_deref() == Some(node) {
                return false;
            }
            i.node = Some(node.to_string());
            i.node_history.push(node.to_string());
            i.placement_attempts += 1;
            true
        })?;
        if let Some(u) = updated.as_ref().filter(|u| u.changed) {
            info!(uuid = %instance_uuid, %node, attempts = u.object.placement_attempts, "instance placed");
        }
        Ok(updated.map(|u| u.object))
    }

    /// Move an instance to `state`. A no-op if it is already there.
    pub fn update_instance_state(&self, instance_uuid: &str, state: InstanceState) -> StateResult<Option<Instance>> {
        let updated = self.update_object(INSTANCE, instance_uuid, "update instance state", |i: &mut Instance, now| {
            if i.state == state {
                return false;
            }
            if !i.state.can_transition_to(state) {
                warn!(uuid = %i.uuid, from = ?i.state, to = ?state, "refusing instance state transition");
                return false;
            }
            i.state = state;
            i.state_updated = now;
            true
        })?;
        if updated.as_ref().is_some_and(|u| u.changed) {
            info!(uuid = %instance_uuid, ?state, "instance state updated");
        }
        Ok(updated.map(|u| u.object))
    }

    /// Apply a hypervisor power report.
    ///
    /// While the recorded state is `transition-to-X`, a report of the state
    /// from before the transition is dropped if it arrives within the
    /// debounce window of the transition starting. Anything else is applied.
    pub fn update_instance_power_state(&self, instance_uuid: &str, state: PowerState) -> StateResult<Option<Instance>> {
        let window = self.config().power_state_debounce as f64;
        let updated = self.update_object(INSTANCE, instance_uuid, "update power state", |i: &mut Instance, now| {
            if i.power_state == state {
                return false;
            }
            let age = now - i.power_state_updated;
            if i.power_state.is_transition() && i.power_state_previous == state && age < window {
                debug!(uuid = %i.uuid, current = ?i.power_state, reported = ?state, age, "power report debounced");
                return false;
            }
            i.power_state_previous = i.power_state;
            i.power_state = state;
            i.power_state_updated = now;
            true
        })?;
        Ok(updated.map(|u| u.object))
    }

    /// Put an instance into `error`, recording why.
    pub fn update_instance_error_message(&self, instance_uuid: &str, message: &str) -> StateResult<Option<Instance>> {
        let updated = self.update_object(INSTANCE, instance_uuid, "record instance error", |i: &mut Instance, now| {
            let mut changed = false;
            if i.error_message.as_deref() != Some(message) {
                i.error_message = Some(message.to_string());
                changed = true;
            }
            if i.state != InstanceState::Error && i.state.can_transition_to(InstanceState::Error) {
                i.state = InstanceState::Error;
                i.state_updated = now;
                changed = true;
            }
            changed
        })?;
        if updated.as_ref().is_some_and(|u| u.changed) {
            warn!(uuid = %instance_uuid, %message, "instance errored");
        }
        Ok(updated.map(|u| u.object))
    }

    pub fn set_instance_block_devices(
        &self,
        instance_uuid: &str,
        block_devices: serde_json::Value,
    ) -> StateResult<Option<Instance>> {
        let updated = self.update_object(INSTANCE, instance_uuid, "set block devices", |i: &mut Instance, _| {
            if i.block_devices.as_ref() == Some(&block_devices) {
                return false;
            }
            i.block_devices = Some(block_devices.clone());
            true
        })?;
        Ok(updated.map(|u| u.object))
    }

    /// Count one more forced delete. Never decreases.
    pub fn increment_enforced_deletes(&self, instance_uuid: &str) -> StateResult<Option<Instance>> {
        let updated = self.update_object(INSTANCE, instance_uuid, "enforce delete", |i: &mut Instance, _| {
            i.enforced_deletes += 1;
            true
        })?;
        Ok(updated.map(|u| u.object))
    }

    /// Give an instance its console and VDI ports on this node.
    ///
    /// Returns the existing pair if it already has one here. A pair left
    /// on another node by an earlier placement is freed and replaced.
    pub fn allocate_instance_ports(&self, instance_uuid: &str) -> StateResult<Option<(u16, u16)>> {
        let Some(instance) = self.get_instance(instance_uuid)? else {
            return Ok(None);
        };
        let node = self.node_name().to_string();
        if instance.console_node.as_deref() == Some(node.as_str()) {
            if let Some(ports) = instance.console_port.zip(instance.vdi_port) {
                return Ok(Some(ports));
            }
        }
        self.free_instance_ports(&instance)?;

        let console = self.allocate_console_port(instance_uuid)?;
        let vdi = self.allocate_console_port(instance_uuid)?;
        let updated = self.update_object(INSTANCE, instance_uuid, "allocate ports", |i: &mut Instance, _| {
            if i.console_node.as_deref() == Some(node.as_str()) && i.console_port.is_some() && i.vdi_port.is_some() {
                return false;
            }
            i.console_port = Some(console);
            i.vdi_port = Some(vdi);
            i.console_node = Some(node.clone());
            true
        })?;

        match updated {
            Some(u) if u.changed => Ok(Some((console, vdi))),
            other => {
                // Lost a race with another allocator; give ours back.
                self.free_console_port(&node, console, instance_uuid)?;
                self.free_console_port(&node, vdi, instance_uuid)?;
                Ok(other.and_then(|u| u.object.console_port.zip(u.object.vdi_port)))
            }
        }
    }

    /// Release whatever console registrations the instance still holds.
    fn free_instance_ports(&self, instance: &Instance) -> StateResult<()> {
        let Some(node) = &instance.console_node else {
            return Ok(());
        };
        for port in [instance.console_port, instance.vdi_port].into_iter().flatten() {
            self.free_console_port(node, port, &instance.uuid)?;
        }
        Ok(())
    }

    /// Permanently remove an instance, its events and its metadata.
    ///
    /// Frees its console ports first. Safe to repeat.
    pub fn hard_delete_instance(&self, instance_uuid: &str) -> StateResult<()> {
        if let Some(instance) = self.get_instance(instance_uuid)? {
            self.free_instance_ports(&instance)?;
        }
        self.remove(INSTANCE, None, instance_uuid)?;
        self.delete_events(INSTANCE, instance_uuid)?;
        self.delete_metadata(INSTANCE, instance_uuid)?;
        info!(uuid = %instance_uuid, "instance hard deleted");
        Ok(())
    }
}
