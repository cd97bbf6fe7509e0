//! Owner of the live task records of one dispatch.
//!
//! All mutation goes through [`TaskTracker::transition`], which applies the
//! state machine under a lock, then (outside the lock) publishes exactly one
//! event, queues the record for the registry writer and appends to the task
//! log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::event_bus::{EventBus, EventPayload};
use super::run_registry::{RegistryWriter, RunRegistry};
use super::state_machine;
use super::task_log;
use crate::domain::models::{RecordPatch, TaskRecord, TaskStatus};

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    records: HashMap<String, TaskRecord>,
}

pub struct TaskTracker {
    dispatch_id: String,
    inner: Mutex<Inner>,
    bus: Arc<EventBus>,
    writer: RegistryWriter,
}

impl TaskTracker {
    /// Must be called inside a tokio runtime; starts the registry writer.
    pub fn new(dispatch_id: impl Into<String>, bus: Arc<EventBus>, registry: RunRegistry) -> Self {
        Self {
            dispatch_id: dispatch_id.into(),
            inner: Mutex::new(Inner::default()),
            bus,
            writer: RegistryWriter::spawn(registry),
        }
    }

    pub fn dispatch_id(&self) -> &str {
        &self.dispatch_id
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &RunRegistry {
        self.writer.registry()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Track freshly accepted records and queue them as one write.
    pub fn register(&self, records: Vec<TaskRecord>) {
        {
            let mut inner = self.lock();
            for record in &records {
                if !inner.records.contains_key(&record.task_id) {
                    inner.order.push(record.task_id.clone());
                }
                inner.records.insert(record.task_id.clone(), record.clone());
            }
        }
        self.writer.upsert(records);
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.lock().records.get(task_id).cloned()
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.lock().records.get(task_id).map(|r| r.status)
    }

    /// Records in registration order.
    pub fn snapshot(&self) -> Vec<TaskRecord> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect()
    }

    /// Number of tracked tasks currently holding a session.
    pub fn active_count(&self) -> usize {
        self.lock()
            .records
            .values()
            .filter(|r| r.status.is_active())
            .count()
    }

    /// Move a task to `to`. Returns the new record, or `None` when the edge is
    /// not permitted (or the task is unknown), in which case nothing happens.
    pub fn transition(
        &self,
        task_id: &str,
        to: TaskStatus,
        patch: RecordPatch,
    ) -> Option<TaskRecord> {
        let (from, next) = {
            let mut inner = self.lock();
            let current = inner.records.get(task_id)?;
            let from = current.status;
            let Some(next) = state_machine::apply(current, to, patch) else {
                debug!(task_id, %from, %to, "Ignoring transition");
                return None;
            };
            inner.records.insert(task_id.to_string(), next.clone());
            (from, next)
        };

        if let Err(e) = self.bus.publish(
            &self.dispatch_id,
            EventPayload::TaskStatusChanged {
                task_id: task_id.to_string(),
                from,
                to,
                record: Box::new(next.clone()),
            },
        ) {
            warn!(task_id, error = %e, "Failed to publish status change");
        }

        self.writer.upsert(vec![next.clone()]);

        if let Some(ref log_file) = next.log_file {
            let mut line = format!("status: {from} -> {to}");
            if let Some(ref err) = next.error {
                if to.is_terminal() {
                    line.push_str(&format!(" (error: {err})"));
                }
            }
            task_log::append(log_file.as_ref(), &line);
        }

        Some(next)
    }

    /// Publish a non-transition event for this dispatch.
    pub fn emit(&self, payload: EventPayload) {
        if let Err(e) = self.bus.publish(&self.dispatch_id, payload) {
            warn!(dispatch_id = %self.dispatch_id, error = %e, "Failed to publish event");
        }
    }

    /// Re-queue every record and wait for the writer to drain. A write that
    /// failed earlier is repaired here.
    pub async fn flush(&self) {
        self.writer.upsert(self.snapshot());
        self.writer.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn tracker(dir: &TempDir) -> TaskTracker {
        let tracker = TaskTracker::new(
            "d1",
            Arc::new(EventBus::default()),
            RunRegistry::in_state_dir(dir.path()),
        );
        tracker.register(vec![TaskRecord::new("t1", "d1", "build")]);
        tracker
    }

    #[tokio::test]
    async fn test_transition_persists_and_publishes_once() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        let events = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&events);
        tracker
            .bus()
            .subscribe_fn(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(tracker
            .transition("t1", TaskStatus::Queued, RecordPatch::default())
            .is_some());
        assert!(tracker
            .transition("t1", TaskStatus::Queued, RecordPatch::default())
            .is_none());

        assert_eq!(events.load(Ordering::SeqCst), 1);
        tracker.flush().await;
        assert_eq!(
            tracker.registry().read()["t1"].status,
            TaskStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_no_duplicate_terminal_event() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        let terminal = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&terminal);
        tracker
            .bus()
            .subscribe_fn(move |e| {
                if let EventPayload::TaskStatusChanged { to, .. } = &e.payload {
                    if to.is_terminal() {
                        t.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
            .unwrap();

        tracker.transition("t1", TaskStatus::Aborted, RecordPatch::default());
        tracker.transition("t1", TaskStatus::Aborted, RecordPatch::default());
        tracker.transition("t1", TaskStatus::Failed, RecordPatch::error("late"));

        assert_eq!(terminal.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.get("t1").unwrap().error, None);
    }

    #[tokio::test]
    async fn test_unknown_task_is_ignored() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        assert!(tracker
            .transition("nope", TaskStatus::Queued, RecordPatch::default())
            .is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_transitions_do_not_write_on_the_caller() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        // The writer task cannot run until this task yields.
        tracker.transition("t1", TaskStatus::Queued, RecordPatch::default());
        tracker.transition("t1", TaskStatus::Starting, RecordPatch::session("s1"));
        assert!(tracker.registry().read().is_empty());

        tracker.flush().await;
        let stored = &tracker.registry().read()["t1"];
        assert_eq!(stored.status, TaskStatus::Starting);
        assert_eq!(stored.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_flush_restores_lost_write() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        tracker.transition("t1", TaskStatus::Queued, RecordPatch::default());
        tracker.flush().await;
        tracker.registry().write(&Default::default()).unwrap();

        tracker.flush().await;
        assert_eq!(tracker.registry().read()["t1"].status, TaskStatus::Queued);
    }
}
