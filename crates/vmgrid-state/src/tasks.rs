//! Per-node work queues.
//!
//! A queue is named after the node that consumes it. Each item carries a
//! list of [`Task`]s. Consumers poll [`ClusterDb::dequeue`] with their own
//! backoff; a claimed item stays invisible to other consumers until it is
//! resolved, or until an operator runs [`ClusterDb::restart_queues`] after
//! a crash.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use vmgrid_store::{QueueHandle, StoreError, StoreExt};

use crate::db::ClusterDb;
use crate::error::StateResult;

/// Work a node can be asked to do. Closed: add a variant to extend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    DeleteInstance {
        instance_uuid: String,
    },
    ErrorInstance {
        instance_uuid: String,
        error_message: String,
    },
}

impl Task {
    pub fn instance_uuid(&self) -> &str {
        match self {
            Task::DeleteInstance { instance_uuid } | Task::ErrorInstance { instance_uuid, .. } => instance_uuid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub tasks: Vec<Task>,
}

impl QueueItem {
    pub fn single(task: Task) -> Self {
        Self { tasks: vec![task] }
    }
}

/// Executes tasks pulled from a queue.
pub trait TaskHandler {
    type Error;

    fn delete_instance(&mut self, instance_uuid: &str) -> Result<(), Self::Error>;
    fn error_instance(&mut self, instance_uuid: &str, error_message: &str) -> Result<(), Self::Error>;
}

/// Route one task to its handler method.
pub fn dispatch<H: TaskHandler>(handler: &mut H, task: &Task) -> Result<(), H::Error> {
    match task {
        Task::DeleteInstance { instance_uuid } => handler.delete_instance(instance_uuid),
        Task::ErrorInstance {
            instance_uuid,
            error_message,
        } => handler.error_instance(instance_uuid, error_message),
    }
}

impl ClusterDb {
    pub fn enqueue(&self, queue: &str, item: &QueueItem) -> StateResult<()> {
        self.store().enqueue_as(queue, item)?;
        debug!(%queue, tasks = item.tasks.len(), "queue item enqueued");
        Ok(())
    }

    /// One attempt to claim the oldest unclaimed item. Never waits.
    ///
    /// An item that does not decode as a [`QueueItem`] is removed from the
    /// queue and reported as an error.
    pub fn dequeue(&self, queue: &str) -> StateResult<Option<(QueueItem, QueueHandle)>> {
        let Some((value, handle)) = self.store().dequeue(queue)? else {
            return Ok(None);
        };
        let item: QueueItem = match serde_json::from_value(value) {
            Ok(item) => item,
            Err(e) => {
                // No caller could resolve it without the handle.
                self.store().resolve(queue, &handle)?;
                error!(%queue, entry = %handle.entry(), error = %e, "discarded undecodable queue item");
                return Err(StoreError::Deserialize(e.to_string()).into());
            }
        };
        debug!(%queue, entry = %handle.entry(), "queue item claimed");
        Ok(Some((item, handle)))
    }

    pub fn resolve(&self, queue: &str, handle: &QueueHandle) -> StateResult<bool> {
        Ok(self.store().resolve(queue, handle)?)
    }

    pub fn get_queue_length(&self, queue: &str) -> StateResult<usize> {
        Ok(self.store().queue_length(queue)?)
    }

    pub fn restart_queues(&self) -> StateResult<usize> {
        let restarted = self.store().restart_queues()?;
        info!(restarted, "queues restarted");
        Ok(restarted)
    }

    /// Ask `node` to delete an instance.
    pub fn enqueue_instance_delete(&self, node: &str, instance_uuid: &str) -> StateResult<()> {
        self.enqueue(
            node,
            &QueueItem::single(Task::DeleteInstance {
                instance_uuid: instance_uuid.to_string(),
            }),
        )
    }

    /// Ask `node` to put an instance into error.
    pub fn enqueue_instance_error(&self, node: &str, instance_uuid: &str, error_message: &str) -> StateResult<()> {
        self.enqueue(
            node,
            &QueueItem::single(Task::ErrorInstance {
                instance_uuid: instance_uuid.to_string(),
                error_message: error_message.to_string(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vmgrid_core::ClusterConfig;
    use vmgrid_store::RedbStore;

    use super::*;
    use crate::error::StateError;

    fn test_db() -> ClusterDb {
        let store = RedbStore::open_in_memory().unwrap();
        ClusterDb::new(Arc::new(store), ClusterConfig::for_node("sf-1", "10.0.0.1"))
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl TaskHandler for Recorder {
        type Error = String;

        fn delete_instance(&mut self, instance_uuid: &str) -> Result<(), String> {
            self.calls.push(format!("delete {instance_uuid}"));
            Ok(())
        }

        fn error_instance(&mut self, instance_uuid: &str, error_message: &str) -> Result<(), String> {
            self.calls.push(format!("error {instance_uuid}: {error_message}"));
            Ok(())
        }
    }

    #[test]
    fn task_wire_format_is_tagged() {
        let task = Task::ErrorInstance {
            instance_uuid: "i-1".into(),
            error_message: "boom".into(),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "error_instance");
        assert_eq!(json["error_message"], "boom");
        assert_eq!(task.instance_uuid(), "i-1");
    }

    #[test]
    fn unknown_task_kind_is_rejected() {
        let raw = serde_json::json!({"type": "reboot_instance", "instance_uuid": "i-1"});
        assert!(serde_json::from_value::<Task>(raw).is_err());
    }

    #[test]
    fn dispatch_routes_by_variant() {
        let mut recorder = Recorder::default();
        let item = QueueItem {
            tasks: vec![
                Task::DeleteInstance {
                    instance_uuid: "i-1".into(),
                },
                Task::ErrorInstance {
                    instance_uuid: "i-2".into(),
                    error_message: "no capacity".into(),
                },
            ],
        };
        for task in &item.tasks {
            dispatch(&mut recorder, task).unwrap();
        }
        assert_eq!(recorder.calls, ["delete i-1", "error i-2: no capacity"]);
    }

    #[test]
    fn enqueue_dequeue_resolve() {
        let db = test_db();
        db.enqueue_instance_delete("sf-2", "i-1").unwrap();
        db.enqueue_instance_error("sf-2", "i-2", "failed").unwrap();
        assert_eq!(db.get_queue_length("sf-2").unwrap(), 2);

        let (item, handle) = db.dequeue("sf-2").unwrap().unwrap();
        assert_eq!(item.tasks[0].instance_uuid(), "i-1");
        assert!(db.resolve("sf-2", &handle).unwrap());

        let (item, _handle) = db.dequeue("sf-2").unwrap().unwrap();
        assert!(matches!(item.tasks[0], Task::ErrorInstance { .. }));
        assert!(db.dequeue("sf-2").unwrap().is_none());
        assert_eq!(db.get_queue_length("sf-2").unwrap(), 1);
    }

    #[test]
    fn undecodable_item_is_removed_from_the_queue() {
        let db = test_db();
        let unknown = serde_json::json!({"tasks": [{"type": "reboot_instance", "instance_uuid": "i-1"}]});
        db.store().enqueue("sf-2", &unknown).unwrap();
        db.enqueue_instance_delete("sf-2", "i-2").unwrap();

        let err = db.dequeue("sf-2").unwrap_err();
        assert!(matches!(err, StateError::Store(StoreError::Deserialize(_))));
        assert_eq!(db.get_queue_length("sf-2").unwrap(), 1);

        let (item, _handle) = db.dequeue("sf-2").unwrap().unwrap();
        assert_eq!(item.tasks[0].instance_uuid(), "i-2");
    }

    #[test]
    fn restart_returns_claimed_items() {
        let db = test_db();
        db.enqueue_instance_delete("sf-2", "i-1").unwrap();
        let _ = db.dequeue("sf-2").unwrap().unwrap();
        assert!(db.dequeue("sf-2").unwrap().is_none());

        assert_eq!(db.restart_queues().unwrap(), 1);
        assert!(db.dequeue("sf-2").unwrap().is_some());
    }
}
