//! Event-driven dispatch surface.
//!
//! [`SwarmController::dispatch`] returns a run id immediately and runs the
//! dispatch in the background. Live state is built from the event bus, so
//! callers can inspect a run, wait for it or abort it while it executes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::dispatcher::{new_dispatch_id, validate_tasks, DispatchOptions, Dispatcher};
use super::event_bus::{EventBus, EventPayload, ListenerId};
use super::sandbox::{SandboxDetector, SandboxExecutor};
use super::tool_gate::ToolGate;
use crate::domain::errors::{DispatchError, DispatchResult};
use crate::domain::models::{DispatchReport, SwarmState, Task, TaskRecord, TaskStatus};
use crate::domain::ports::{SessionClient, ShellRunner};

struct RunEntry {
    state: SwarmState,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
    report: Option<DispatchReport>,
    error: Option<String>,
}

type Runs = Arc<Mutex<HashMap<String, RunEntry>>>;

fn lock(runs: &Runs) -> MutexGuard<'_, HashMap<String, RunEntry>> {
    runs.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SwarmController {
    session: Arc<dyn SessionClient>,
    shell: Arc<dyn ShellRunner>,
    detector: Arc<SandboxDetector>,
    bus: Arc<EventBus>,
    gate: Arc<ToolGate>,
    options: DispatchOptions,
    runs: Runs,
    listener: Option<ListenerId>,
}

impl SwarmController {
    pub fn new(
        session: Arc<dyn SessionClient>,
        shell: Arc<dyn ShellRunner>,
        detector: Arc<SandboxDetector>,
        options: DispatchOptions,
    ) -> Self {
        let bus = Arc::new(EventBus::default());
        let runs: Runs = Arc::new(Mutex::new(HashMap::new()));

        let sink = Arc::clone(&runs);
        let listener = match bus.subscribe_fn(move |event| {
            if let EventPayload::TaskStatusChanged { ref record, .. } = event.payload {
                if let Some(entry) = lock(&sink).get_mut(&event.dispatch_id) {
                    entry
                        .state
                        .tasks
                        .insert(record.task_id.clone(), TaskRecord::clone(record));
                }
            }
        }) {
            Ok(id) => Some(id),
            Err(e) => {
                error!(error = %e, "Could not attach run state listener");
                None
            }
        };

        Self {
            session,
            shell,
            detector,
            bus,
            gate: Arc::new(ToolGate::new(SandboxExecutor::default(), None)),
            options,
            runs,
            listener,
        }
    }

    pub fn with_tool_gate(mut self, gate: Arc<ToolGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Validate `tasks` and start running them in the background.
    ///
    /// Validation errors are returned here; provisioning errors surface
    /// through [`run_error`](Self::run_error) once the run settles.
    pub fn dispatch(&self, tasks: Vec<Task>) -> DispatchResult<String> {
        validate_tasks(&tasks, &self.options.working_dir)?;

        let run_id = new_dispatch_id();
        let cancel = CancellationToken::new();
        let (done, _) = watch::channel(false);

        let mut state = SwarmState::new(&run_id);
        for task in &tasks {
            state
                .tasks
                .insert(task.id.clone(), TaskRecord::new(&task.id, &run_id, &task.agent));
        }
        lock(&self.runs).insert(
            run_id.clone(),
            RunEntry {
                state,
                cancel: cancel.clone(),
                done,
                report: None,
                error: None,
            },
        );

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.session),
            Arc::clone(&self.shell),
            self.options.clone(),
        )
        .with_detector(Arc::clone(&self.detector))
        .with_event_bus(Arc::clone(&self.bus))
        .with_tool_gate(Arc::clone(&self.gate));

        let id = run_id.clone();
        let handle = tokio::spawn(async move { dispatcher.run(&id, tasks, cancel).await });

        let runs = Arc::clone(&self.runs);
        let id = run_id.clone();
        tokio::spawn(async move {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => Err(DispatchError::Join(e.to_string())),
            };
            settle(&runs, &id, outcome);
        });

        info!(run_id = %run_id, "Run started");
        Ok(run_id)
    }

    pub fn get_state(&self, run_id: &str) -> Option<SwarmState> {
        lock(&self.runs).get(run_id).map(|e| e.state.clone())
    }

    /// Final report, once the run has finished successfully.
    pub fn report(&self, run_id: &str) -> Option<DispatchReport> {
        lock(&self.runs).get(run_id).and_then(|e| e.report.clone())
    }

    /// Why the run failed as a whole (validation or provisioning), if it did.
    pub fn run_error(&self, run_id: &str) -> Option<String> {
        lock(&self.runs).get(run_id).and_then(|e| e.error.clone())
    }

    /// Wait until the run settles or `timeout` elapses.
    pub async fn wait_for_completion(
        &self,
        run_id: &str,
        timeout: Duration,
    ) -> DispatchResult<SwarmState> {
        let mut rx = lock(&self.runs)
            .get(run_id)
            .map(|e| e.done.subscribe())
            .ok_or_else(|| DispatchError::RunNotFound(run_id.to_string()))?;

        let settled = tokio::time::timeout(timeout, rx.wait_for(|done| *done))
            .await
            .is_ok();
        if !settled {
            return Err(DispatchError::WaitTimeout(run_id.to_string()));
        }
        self.get_state(run_id)
            .ok_or_else(|| DispatchError::RunNotFound(run_id.to_string()))
    }

    /// Cancel every non-terminal task of a run. Safe to call repeatedly.
    pub fn abort(&self, run_id: &str) -> DispatchResult<()> {
        let runs = lock(&self.runs);
        let entry = runs
            .get(run_id)
            .ok_or_else(|| DispatchError::RunNotFound(run_id.to_string()))?;
        if !entry.cancel.is_cancelled() {
            warn!(run_id, "Aborting run");
            entry.cancel.cancel();
        }
        Ok(())
    }
}

impl Drop for SwarmController {
    fn drop(&mut self) {
        if let Some(id) = self.listener.take() {
            self.bus.unsubscribe(id);
        }
    }
}

fn settle(runs: &Runs, run_id: &str, outcome: DispatchResult<DispatchReport>) {
    let mut runs = lock(runs);
    let Some(entry) = runs.get_mut(run_id) else {
        return;
    };
    match outcome {
        Ok(report) => {
            for record in &report.records {
                entry
                    .state
                    .tasks
                    .insert(record.task_id.clone(), record.clone());
            }
            info!(run_id, status = entry.state.status().as_str(), "Run finished");
            entry.report = Some(report);
        }
        Err(e) => {
            error!(run_id, error = %e, "Run failed before tasks started");
            // Nothing ran; the tasks end aborted so the derived status settles.
            for record in entry.state.tasks.values_mut() {
                if !record.status.is_terminal() {
                    record.status = TaskStatus::Aborted;
                    record.error = Some(e.to_string());
                }
            }
            entry.error = Some(e.to_string());
        }
    }
    entry.done.send_replace(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::SessionError;
    use crate::domain::models::{
        IsolationMode, MessagePart, PromptOptions, SessionMessage, SessionStatusEntry, SwarmStatus,
    };
    use crate::domain::ports::CommandOutput;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    struct NoShell;

    #[async_trait]
    impl ShellRunner for NoShell {
        async fn run(&self, _: &str, _: &[String], _: &Path) -> std::io::Result<CommandOutput> {
            Ok(CommandOutput::failed(1, "no shell in this test"))
        }
    }

    /// Sessions stay busy until `idle` flips.
    struct SlowClient {
        idle: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SessionClient for SlowClient {
        async fn create_session(&self, title: &str, _: Option<&str>) -> Result<String, SessionError> {
            Ok(format!("ses-{}", title.trim_start_matches("swarm: ")))
        }
        async fn prompt(&self, _: &str, _: Vec<MessagePart>, _: PromptOptions) -> Result<(), SessionError> {
            Ok(())
        }
        async fn status(&self) -> Result<HashMap<String, SessionStatusEntry>, SessionError> {
            let entry = if self.idle.load(std::sync::atomic::Ordering::SeqCst) {
                SessionStatusEntry::idle()
            } else {
                SessionStatusEntry::busy()
            };
            Ok(HashMap::from([
                ("ses-a".to_string(), entry.clone()),
                ("ses-b".to_string(), entry),
            ]))
        }
        async fn abort(&self, _: &str) -> Result<(), SessionError> {
            Ok(())
        }
        async fn list_messages(&self, _: &str) -> Result<Vec<SessionMessage>, SessionError> {
            Ok(vec![SessionMessage::assistant(
                r#"```json
{"status": "complete", "files_changed": ["a.txt"], "summary": "ok"}
```"#,
            )])
        }
    }

    fn controller(dir: &TempDir, client: Arc<SlowClient>) -> SwarmController {
        let mut options = DispatchOptions::new(dir.path());
        options.isolation = IsolationMode::Disabled;
        options.poll_interval = Duration::from_millis(10);
        options.max_concurrency = 1;
        SwarmController::new(
            client,
            Arc::new(NoShell),
            Arc::new(SandboxDetector::fixed(crate::domain::models::SandboxBackend::None)),
            options,
        )
    }

    #[tokio::test]
    async fn test_dispatch_wait_and_report() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(SlowClient {
            idle: std::sync::atomic::AtomicBool::new(true),
        });
        let controller = controller(&dir, client);

        let run_id = controller
            .dispatch(vec![Task::inline("a", "build", "go"), Task::inline("b", "build", "go")])
            .unwrap();
        let state = controller
            .wait_for_completion(&run_id, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(state.status(), SwarmStatus::Completed);
        assert_eq!(state.tasks["a"].status, TaskStatus::Done);
        assert_eq!(controller.report(&run_id).unwrap().totals.succeeded, 2);
        assert!(controller.run_error(&run_id).is_none());
    }

    #[tokio::test]
    async fn test_abort_marks_everything_aborted() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(SlowClient {
            idle: std::sync::atomic::AtomicBool::new(false),
        });
        let controller = controller(&dir, client);

        let run_id = controller
            .dispatch(vec![Task::inline("a", "build", "go"), Task::inline("b", "build", "go")])
            .unwrap();
        assert_eq!(controller.get_state(&run_id).unwrap().status(), SwarmStatus::Running);

        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.abort(&run_id).unwrap();
        controller.abort(&run_id).unwrap();

        let state = controller
            .wait_for_completion(&run_id, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(state.status(), SwarmStatus::Aborted);
        assert!(state.tasks.values().all(|r| r.status == TaskStatus::Aborted));
    }

    #[tokio::test]
    async fn test_unknown_run_and_validation() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(SlowClient {
            idle: std::sync::atomic::AtomicBool::new(true),
        });
        let controller = controller(&dir, client);

        assert!(controller.get_state("nope").is_none());
        assert!(matches!(controller.abort("nope"), Err(DispatchError::RunNotFound(_))));
        assert!(matches!(
            controller.wait_for_completion("nope", Duration::from_millis(10)).await,
            Err(DispatchError::RunNotFound(_))
        ));
        assert!(matches!(
            controller.dispatch(vec![Task::inline("bad id", "build", "go")]),
            Err(DispatchError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_times_out_while_running() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(SlowClient {
            idle: std::sync::atomic::AtomicBool::new(false),
        });
        let controller = controller(&dir, client);
        let run_id = controller.dispatch(vec![Task::inline("a", "build", "go")]).unwrap();

        assert!(matches!(
            controller.wait_for_completion(&run_id, Duration::from_millis(50)).await,
            Err(DispatchError::WaitTimeout(_))
        ));
        controller.abort(&run_id).unwrap();
        controller
            .wait_for_completion(&run_id, Duration::from_secs(10))
            .await
            .unwrap();
    }
}
