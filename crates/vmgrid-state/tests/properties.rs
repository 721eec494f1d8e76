//! Cross-module guarantees of the cluster state layer.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{harness, harness_for, TestIpManager};
use serde_json::json;
use vmgrid_state::*;
use vmgrid_store::{CoordinationStore, ObjectKey};

fn spec(name: &str) -> InstanceSpec {
    InstanceSpec {
        name: name.to_string(),
        cpus: 1,
        memory_mb: 1024,
        namespace: "default".to_string(),
        ..Default::default()
    }
}

#[test]
fn concurrent_create_has_exactly_one_winner() {
    let h = harness();
    let key = ObjectKey::new("race", None, "k").unwrap();
    let store: Arc<dyn CoordinationStore> = h.db.store().clone();

    let threads: Vec<_> = (0..8)
        .map(|n| {
            let store = store.clone();
            let key = key.clone();
            std::thread::spawn(move || store.create(&key, &json!(n), None).unwrap().then_some(n))
        })
        .collect();
    let winners: Vec<i32> = threads.into_iter().filter_map(|t| t.join().unwrap()).collect();

    assert_eq!(winners.len(), 1);
    assert_eq!(store.get(&key).unwrap(), Some(json!(winners[0])));
}

#[test]
fn held_lock_times_out_then_expires() {
    let h = harness();
    let ttl = Duration::from_secs(60);
    let _held = h.db.get_lock("network", None, "n-1", ttl, Duration::from_secs(1), Some("first")).unwrap();

    let err = h
        .db
        .get_lock("network", None, "n-1", ttl, Duration::from_millis(100), Some("second"))
        .unwrap_err();
    assert!(err.is_lock_timeout());

    h.clock.advance(Duration::from_secs(61));
    let lock = h
        .db
        .get_lock("network", None, "n-1", ttl, Duration::from_millis(100), Some("second"))
        .unwrap();
    assert_eq!(h.db.get_existing_locks().unwrap().len(), 1);
    h.db.refresh_lock(&lock).unwrap();
}

#[test]
fn unchanged_state_performs_no_writes() {
    let h = harness();
    h.db.create_instance("i-1", spec("web")).unwrap();

    h.clock.advance(Duration::from_secs(5));
    let instance = h.db.update_instance_state("i-1", InstanceState::Created).unwrap().unwrap();
    assert_eq!(instance.state, InstanceState::Created);
    assert!(instance.state_updated >= common::T0 + 5.0);
    assert_eq!(h.db.get_instance("i-1").unwrap().unwrap().state, InstanceState::Created);

    let writes = h.store.writes();
    let locks = h.store.lock_attempts();
    h.db.update_instance_state("i-1", InstanceState::Created).unwrap();
    assert_eq!(h.store.writes(), writes);
    assert_eq!(h.store.lock_attempts(), locks);
}

#[test]
fn placement_counter_tracks_owner_changes() {
    let h = harness();
    h.db.create_instance("i-1", spec("web")).unwrap();

    let placed = h.db.place_instance("i-1", "sf-2").unwrap().unwrap();
    assert_eq!(placed.placement_attempts, 1);

    let writes = h.store.writes();
    let again = h.db.place_instance("i-1", "sf-2").unwrap().unwrap();
    assert_eq!(again.placement_attempts, 1);
    assert_eq!(h.store.writes(), writes);

    let moved = h.db.place_instance("i-1", "sf-3").unwrap().unwrap();
    assert_eq!(moved.placement_attempts, 2);
    assert_eq!(moved.node.as_deref(), Some("sf-3"));
    assert_eq!(moved.node_history, ["sf-2", "sf-3"]);
}

#[test]
fn power_reports_are_debounced_during_transitions() {
    let h = harness();
    h.db.create_instance("i-1", spec("web")).unwrap();
    h.db.update_instance_power_state("i-1", PowerState::Off).unwrap();
    h.db.update_instance_power_state("i-1", PowerState::TransitionToOn).unwrap();

    h.clock.advance(Duration::from_secs(30));
    let instance = h.db.update_instance_power_state("i-1", PowerState::Off).unwrap().unwrap();
    assert_eq!(instance.power_state, PowerState::TransitionToOn);

    h.clock.advance(Duration::from_secs(50));
    let instance = h.db.update_instance_power_state("i-1", PowerState::Off).unwrap().unwrap();
    assert_eq!(instance.power_state, PowerState::Off);
    assert_eq!(instance.power_state_previous, PowerState::TransitionToOn);
}

#[test]
fn reports_of_other_states_are_applied_immediately() {
    let h = harness();
    h.db.create_instance("i-1", spec("web")).unwrap();
    h.db.update_instance_power_state("i-1", PowerState::Off).unwrap();
    h.db.update_instance_power_state("i-1", PowerState::TransitionToOn).unwrap();

    h.clock.advance(Duration::from_secs(5));
    let instance = h.db.update_instance_power_state("i-1", PowerState::On).unwrap().unwrap();
    assert_eq!(instance.power_state, PowerState::On);
}

#[test]
fn queue_items_are_handed_out_once() {
    let h = harness();
    for n in 0..10 {
        h.db.enqueue_instance_delete("sf-2", &format!("i-{n}")).unwrap();
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let db = h.db.clone();
            let seen = seen.clone();
            std::thread::spawn(move || {
                while let Some((item, handle)) = db.dequeue("sf-2").unwrap() {
                    seen.lock().unwrap().push(item.tasks[0].instance_uuid().to_string());
                    assert!(db.resolve("sf-2", &handle).unwrap());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let seen = seen.lock().unwrap();
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(seen.len(), 10);
    assert_eq!(unique.len(), 10);
    assert_eq!(h.db.get_queue_length("sf-2").unwrap(), 0);
    assert!(h.db.dequeue("sf-2").unwrap().is_none());
}

#[test]
fn stale_instance_boundary() {
    let h = harness();
    let delay = Duration::from_secs(600);

    h.db.create_instance("older", spec("a")).unwrap();
    h.db.update_instance_state("older", InstanceState::Deleted).unwrap();
    h.clock.advance(Duration::from_secs(2));
    h.db.create_instance("newer", spec("b")).unwrap();
    h.db.update_instance_state("newer", InstanceState::Deleted).unwrap();

    // now - delay - 1 for "older", now - delay + 1 for "newer".
    h.clock.advance(Duration::from_secs(599));
    let stale: Vec<String> = h.db.get_stale_instances(delay).unwrap().map(|i| i.uuid).collect();
    assert_eq!(stale, ["older"]);
}

#[test]
fn hard_delete_instance_is_idempotent() {
    let h = harness();
    h.db.create_instance("i-1", spec("web")).unwrap();
    h.db.add_event("instance", "i-1", "create", "start", None, None).unwrap();
    h.db.persist_metadata("instance", "i-1", &json!({"tags": ["a"]})).unwrap();

    h.db.hard_delete_instance("i-1").unwrap();
    h.db.hard_delete_instance("i-1").unwrap();

    assert!(h.db.get_instance("i-1").unwrap().is_none());
    assert!(h.db.get_events("instance", "i-1").unwrap().is_empty());
    assert!(h.db.get_metadata("instance", "i-1").unwrap().is_none());
}

#[test]
fn deleted_network_frees_its_vxid_for_reuse() {
    let h = harness();
    let first = h
        .db
        .allocate_network::<TestIpManager>("10.0.0.0/24", true, true, "net", "default")
        .unwrap();
    assert!(first.vxid > 0);
    let other = h
        .db
        .allocate_network::<TestIpManager>("10.0.1.0/24", true, true, "other", "default")
        .unwrap();
    assert_ne!(other.vxid, first.vxid);

    h.db.update_network_state(&first.uuid, NetworkState::Deleted).unwrap();
    assert!(h.db.get_ipmanager::<TestIpManager>(&first.uuid).unwrap().is_none());

    let again = h
        .db
        .allocate_network::<TestIpManager>("10.0.0.0/24", true, true, "net", "default")
        .unwrap();
    assert_eq!(again.vxid, first.vxid);
    assert_ne!(again.uuid, first.uuid);
}

#[test]
fn nodes_expire_after_their_ttl() {
    let h = harness_for("sf-2");
    h.db.see_this_node().unwrap();
    assert_eq!(h.db.get_nodes().unwrap().len(), 1);

    h.clock.advance(Duration::from_secs(121));
    assert!(h.db.get_node("sf-2").unwrap().is_none());
}
