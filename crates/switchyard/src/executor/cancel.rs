//! Per-task cancellation flags and live event channels.
//!
//! `tasks/cancel` flips the atomic flag and returns immediately; the
//! executor observes it at every safe point (between model turns and tool
//! calls). The broadcast channel carries the task's events to any number of
//! attached streams (`message/stream`, `tasks/resubscribe`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use super::events::ExecutorEvent;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Handle the executor holds while running one task.
#[derive(Clone)]
pub struct TaskHandle {
    pub cancel_flag: Arc<AtomicBool>,
    events: broadcast::Sender<ExecutorEvent>,
}

impl TaskHandle {
    pub fn is_canceled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    /// Publish an event to every attached stream. Lagging or absent
    /// receivers are not an error.
    pub fn emit(&self, event: ExecutorEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.events.subscribe()
    }
}

/// Registry of in-flight tasks.
#[derive(Clone, Default)]
pub struct TaskControl {
    tasks: Arc<Mutex<HashMap<String, TaskHandle>>>,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and get its handle. Idempotent per task id.
    pub fn register(&self, task_id: &str) -> TaskHandle {
        let mut map = match self.tasks.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(task_id.to_string())
            .or_insert_with(|| {
                let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
                TaskHandle {
                    cancel_flag: Arc::new(AtomicBool::new(false)),
                    events,
                }
            })
            .clone()
    }

    /// Signal cancellation. Returns whether the task was live.
    pub fn cancel(&self, task_id: &str) -> bool {
        let map = match self.tasks.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        match map.get(task_id) {
            Some(handle) => {
                handle.cancel_flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Attach to a live task's event stream, if it is still running.
    pub fn subscribe(&self, task_id: &str) -> Option<broadcast::Receiver<ExecutorEvent>> {
        self.tasks
            .lock()
            .ok()
            .and_then(|map| map.get(task_id).map(|h| h.subscribe()))
    }

    /// Drop the handle once the task reached a terminal state.
    pub fn finish(&self, task_id: &str) {
        if let Ok(mut map) = self.tasks.lock() {
            map.remove(task_id);
        }
    }

    pub fn live_count(&self) -> usize {
        self.tasks.lock().map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::WireTask;

    #[test]
    fn cancel_flips_flag_for_live_task() {
        let control = TaskControl::new();
        let handle = control.register("task1");

        assert!(!handle.is_canceled());
        assert!(control.cancel("task1"));
        assert!(handle.is_canceled());

        assert!(!control.cancel("unknown"));
    }

    #[test]
    fn register_is_idempotent() {
        let control = TaskControl::new();
        let first = control.register("task1");
        control.cancel("task1");
        let second = control.register("task1");
        assert!(second.is_canceled());
        assert!(first.is_canceled());
        assert_eq!(control.live_count(), 1);
    }

    #[tokio::test]
    async fn events_reach_subscribers() {
        let control = TaskControl::new();
        let handle = control.register("task1");
        let mut rx = control.subscribe("task1").unwrap();

        handle.emit(ExecutorEvent::Final(WireTask::working("task1", "c1")));

        match rx.recv().await.unwrap() {
            ExecutorEvent::Final(task) => assert_eq!(task.id, "task1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn finish_removes_handle() {
        let control = TaskControl::new();
        control.register("task1");
        control.finish("task1");
        assert!(control.subscribe("task1").is_none());
        assert_eq!(control.live_count(), 0);
    }
}
