//! Dispatch orchestrator.
//!
//! Validates a task set, provisions one worktree and sandbox descriptor per
//! task, then runs the tasks in strict batches of at most `max_concurrency`:
//! batch k+1 starts only once every task of batch k is terminal. Each task
//! gets its own remote session, is polled to completion and is measured for
//! divergence before its final status is recorded.
//!
//! Validation and provisioning failures fail the whole dispatch before any
//! session exists. Everything after that is recorded per task.

pub mod divergence;
pub mod report;
pub mod result_parser;

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use self::result_parser::{parse_result, StructuredResult, RESULT_SCHEMA_PROMPT};
use super::event_bus::{EventBus, EventPayload, ListenerId};
use super::run_registry::RunRegistry;
use super::sandbox::{SandboxDetector, SandboxExecutor};
use super::session_poller::{PollOptions, PollOutcome, SessionPoller};
use super::task_log;
use super::task_tracker::TaskTracker;
use super::tool_gate::{SessionBinding, ToolGate};
use super::worktree_manager::{WorktreeManager, WorktreeManagerConfig};
use crate::domain::errors::{
    DispatchError, DispatchResult, SessionError, ValidationError, WorkspaceError,
};
use crate::domain::models::{
    is_valid_task_id, latest_assistant_text, tool_calls, Config, DispatchReport, IsolationMode,
    MessagePart, PromptOptions, RecordPatch, SandboxDescriptor, SecurityProfile, SessionMessage,
    Task, TaskPayload, TaskRecord, TaskStatus, WorkspaceInfo,
};
use crate::domain::ports::{SessionClient, ShellRunner};

/// Pause between attempts when worktree creation fails transiently.
const PROVISION_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Called with the new record on every status change.
pub type StatusCallback = Arc<dyn Fn(&TaskRecord) + Send + Sync>;

/// Called with the batch index and its task ids when a batch finishes.
pub type BatchCallback = Arc<dyn Fn(usize, &[String]) + Send + Sync>;

/// Caller-controlled knobs of one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Repository root; tasks run here when isolation is disabled.
    pub working_dir: PathBuf,
    /// Correlation id of the session that requested the dispatch.
    pub parent_session_id: Option<String>,
    pub max_concurrency: usize,
    pub poll_interval: Duration,
    pub task_timeout: Duration,
    pub missing_session_retries: u32,
    pub security_profile: SecurityProfile,
    pub isolation: IsolationMode,
    /// Fail provisioning when the host has no sandbox backend.
    pub require_sandbox: bool,
    pub worktree_base_dir: PathBuf,
    pub max_workspaces: usize,
    /// Registry, reports and task logs; relative paths resolve against `working_dir`.
    pub state_dir: PathBuf,
    /// Follow the latest assistant message while a task runs.
    pub stream_output: bool,
}

impl DispatchOptions {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self::from_config(&Config::default(), working_dir)
    }

    pub fn from_config(config: &Config, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            parent_session_id: None,
            max_concurrency: config.max_concurrency,
            poll_interval: config.poll_interval(),
            task_timeout: config.task_timeout(),
            missing_session_retries: config.missing_session_retries,
            security_profile: config.security_profile,
            isolation: config.isolation,
            require_sandbox: config.require_sandbox,
            worktree_base_dir: config.worktree_base_dir.clone(),
            max_workspaces: config.max_workspaces,
            state_dir: config.state_dir.clone(),
            stream_output: false,
        }
    }

    pub fn with_parent_session(mut self, parent_session_id: impl Into<String>) -> Self {
        self.parent_session_id = Some(parent_session_id.into());
        self
    }

    pub fn resolved_state_dir(&self) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            self.working_dir.join(&self.state_dir)
        }
    }

    fn poll_options(&self) -> PollOptions {
        PollOptions {
            interval: self.poll_interval,
            timeout: self.task_timeout,
            missing_retries: self.missing_session_retries,
            capture_latest_message: self.stream_output,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrency == 0 {
            return Err(ValidationError::InvalidOptions(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ValidationError::InvalidOptions(
                "poll interval must be positive".into(),
            ));
        }
        if self.task_timeout.is_zero() {
            return Err(ValidationError::InvalidOptions(
                "task timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Fresh dispatch identifier.
pub fn new_dispatch_id() -> String {
    Uuid::new_v4().to_string()
}

/// Check ids, agents and payloads; returns the instruction text per task.
///
/// Nothing is created or touched when this fails.
pub fn validate_tasks(tasks: &[Task], working_dir: &Path) -> Result<Vec<String>, ValidationError> {
    if tasks.is_empty() {
        return Err(ValidationError::NoTasks);
    }

    let mut seen = HashSet::new();
    for task in tasks {
        if !is_valid_task_id(&task.id) {
            return Err(ValidationError::InvalidTaskId(task.id.clone()));
        }
        if !seen.insert(task.id.as_str()) {
            return Err(ValidationError::DuplicateTaskId(task.id.clone()));
        }
        if task.agent.trim().is_empty() {
            return Err(ValidationError::MissingAgent(task.id.clone()));
        }
    }

    tasks
        .iter()
        .map(|task| {
            let text = match task.payload {
                TaskPayload::Inline { ref instructions } => instructions.clone(),
                TaskPayload::File { .. } => {
                    let path = task.payload.file_path(working_dir).unwrap_or_default();
                    std::fs::read_to_string(&path).map_err(|_| ValidationError::MissingPayload {
                        task_id: task.id.clone(),
                        path: path.clone(),
                    })?
                }
            };
            if text.trim().is_empty() {
                return Err(ValidationError::EmptyPayload(task.id.clone()));
            }
            Ok(text)
        })
        .collect()
}

/// Everything one task needs once provisioning is done.
struct Job {
    task: Task,
    instructions: String,
    workspace: Option<WorkspaceInfo>,
    sandbox: Option<SandboxDescriptor>,
    /// Where the session works: the worktree, or the shared working directory.
    cwd: PathBuf,
}

/// How a session ended, before divergence is known.
enum Completion {
    Succeeded(StructuredResult),
    Failed(RecordPatch),
    TimedOut(RecordPatch),
    Aborted(RecordPatch),
}

fn result_patch(result: &StructuredResult) -> RecordPatch {
    RecordPatch {
        summary: (!result.summary.is_empty()).then(|| result.summary.clone()),
        files_changed: Some(result.files_changed.clone()),
        blockers: Some(result.blockers.clone()),
        ..RecordPatch::default()
    }
}

fn read_result(transcript: Result<Vec<SessionMessage>, SessionError>) -> Completion {
    let messages = match transcript {
        Ok(m) => m,
        Err(e) => {
            return Completion::Failed(RecordPatch::error(format!(
                "failed to read final message: {e}"
            )))
        }
    };
    let text = latest_assistant_text(&messages).unwrap_or_default();

    match parse_result(&text) {
        Ok(result) if result.status.is_success() => Completion::Succeeded(result),
        Ok(result) => Completion::Failed(RecordPatch {
            error: Some(result.failure_reason()),
            ..result_patch(&result)
        }),
        Err(e) => Completion::Failed(
            RecordPatch::error(format!("malformed result: {e}")).with_raw_output(text),
        ),
    }
}

fn payload_message(job: &Job) -> String {
    format!(
        "Working directory: {}\nTask: {}\n\n{}",
        job.cwd.display(),
        job.task.id,
        job.instructions
    )
}

pub struct Dispatcher {
    session: Arc<dyn SessionClient>,
    shell: Arc<dyn ShellRunner>,
    detector: Arc<SandboxDetector>,
    bus: Arc<EventBus>,
    gate: Arc<ToolGate>,
    options: DispatchOptions,
    on_status: Option<StatusCallback>,
    on_batch: Option<BatchCallback>,
}

impl Dispatcher {
    pub fn new(
        session: Arc<dyn SessionClient>,
        shell: Arc<dyn ShellRunner>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            session,
            shell,
            detector: Arc::new(SandboxDetector::system()),
            bus: Arc::new(EventBus::default()),
            gate: Arc::new(ToolGate::new(SandboxExecutor::default(), None)),
            options,
            on_status: None,
            on_batch: None,
        }
    }

    pub fn with_detector(mut self, detector: Arc<SandboxDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_tool_gate(mut self, gate: Arc<ToolGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn on_status_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TaskRecord) + Send + Sync + 'static,
    {
        self.on_status = Some(Arc::new(callback));
        self
    }

    pub fn on_batch_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, &[String]) + Send + Sync + 'static,
    {
        self.on_batch = Some(Arc::new(callback));
        self
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn tool_gate(&self) -> &Arc<ToolGate> {
        &self.gate
    }

    /// Run `tasks` to completion under a fresh dispatch id.
    pub async fn dispatch(&self, tasks: Vec<Task>) -> DispatchResult<DispatchReport> {
        self.run(&new_dispatch_id(), tasks, CancellationToken::new())
            .await
    }

    /// Run `tasks` under `dispatch_id`. Cancelling `cancel` aborts running
    /// sessions and marks tasks that never started as aborted.
    #[instrument(skip(self, tasks, cancel), fields(task_count = tasks.len()))]
    pub async fn run(
        &self,
        dispatch_id: &str,
        tasks: Vec<Task>,
        cancel: CancellationToken,
    ) -> DispatchResult<DispatchReport> {
        let started_at = Utc::now();
        self.options.validate()?;
        let instructions = validate_tasks(&tasks, &self.options.working_dir)?;
        let state_dir = self.options.resolved_state_dir();

        let manager = match self.options.isolation {
            IsolationMode::Worktree => Some(WorktreeManager::new(
                WorktreeManagerConfig {
                    repo_root: self.options.working_dir.clone(),
                    base_dir: self.options.worktree_base_dir.clone(),
                    max_workspaces: self.options.max_workspaces,
                    run_id: dispatch_id.to_string(),
                },
                Arc::clone(&self.shell),
            )),
            IsolationMode::Disabled => None,
        };

        let provisioned = self.provision(&tasks, manager.as_ref()).await?;

        let tracker = TaskTracker::new(
            dispatch_id,
            Arc::clone(&self.bus),
            RunRegistry::in_state_dir(&state_dir),
        );
        let mut records = Vec::with_capacity(tasks.len());
        let mut jobs = Vec::with_capacity(tasks.len());
        for ((task, instructions), (workspace, sandbox)) in
            tasks.into_iter().zip(instructions).zip(provisioned)
        {
            let mut record = TaskRecord::new(&task.id, dispatch_id, &task.agent);
            record.workspace_path = workspace.as_ref().map(|w| w.path.display().to_string());
            record.branch = workspace.as_ref().map(|w| w.branch.clone());
            record.sandbox = sandbox.clone();
            let log = task_log::log_path(&state_dir, dispatch_id, &task.id);
            record.log_file = Some(log.display().to_string());
            task_log::write_header(&log, &record);
            records.push(record);

            let cwd = workspace
                .as_ref()
                .map_or_else(|| self.options.working_dir.clone(), |w| w.path.clone());
            jobs.push(Job {
                task,
                instructions,
                workspace,
                sandbox,
                cwd,
            });
        }
        tracker.register(records);

        let listeners = self.attach_callbacks(dispatch_id);
        tracker.emit(EventPayload::DispatchStarted {
            task_count: jobs.len(),
        });
        info!(
            dispatch_id,
            tasks = jobs.len(),
            max_concurrency = self.options.max_concurrency,
            "Dispatch started"
        );

        for (batch_index, batch) in jobs.chunks(self.options.max_concurrency).enumerate() {
            if cancel.is_cancelled() {
                warn!(dispatch_id, batch_index, "Dispatch aborted; skipping remaining batches");
                break;
            }
            debug!(dispatch_id, batch_index, size = batch.len(), "Starting batch");
            join_all(
                batch
                    .iter()
                    .map(|job| self.run_task(&tracker, job, manager.as_ref(), &cancel)),
            )
            .await;

            tracker.flush().await;
            tracker.emit(EventPayload::BatchCompleted {
                batch_index,
                task_ids: batch.iter().map(|j| j.task.id.clone()).collect(),
            });
        }

        for record in tracker.snapshot() {
            if record.status.is_terminal() {
                continue;
            }
            if let Some(record) = tracker.transition(
                &record.task_id,
                TaskStatus::Aborted,
                RecordPatch::error("dispatch aborted before the task started"),
            ) {
                write_outcome(&record);
            }
        }
        if let Some(ref manager) = manager {
            let removed = manager.remove_all().await;
            if removed > 0 {
                debug!(dispatch_id, removed, "Removed worktrees of tasks that never ran");
            }
        }
        tracker.flush().await;

        let mut report = report::build(
            dispatch_id,
            self.options.parent_session_id.clone(),
            tracker.snapshot(),
            started_at,
        );
        report::persist(&state_dir, &mut report);
        tracker.emit(EventPayload::DispatchCompleted {
            totals: report.totals,
        });
        for id in listeners {
            self.bus.unsubscribe(id);
        }

        info!(
            dispatch_id,
            succeeded = report.totals.succeeded,
            failed = report.totals.failed,
            no_changes = report.totals.no_changes,
            timed_out = report.totals.timed_out,
            aborted = report.totals.aborted,
            duration_ms = report.duration_ms,
            "Dispatch completed"
        );
        Ok(report)
    }

    /// Create worktrees and sandbox descriptors, one task at a time.
    ///
    /// On any failure every worktree created so far is removed.
    async fn provision(
        &self,
        tasks: &[Task],
        manager: Option<&WorktreeManager>,
    ) -> DispatchResult<Vec<(Option<WorkspaceInfo>, Option<SandboxDescriptor>)>> {
        let Some(manager) = manager else {
            return Ok(tasks.iter().map(|_| (None, None)).collect());
        };

        let mut provisioned = Vec::with_capacity(tasks.len());
        for task in tasks {
            let result = match self.create_workspace(manager, &task.id).await {
                Ok(info) => {
                    let descriptor = self
                        .detector
                        .descriptor(self.options.security_profile, &info.path)
                        .await;
                    if self.options.require_sandbox && !descriptor.enforced {
                        Err(DispatchError::SandboxUnavailable(task.id.clone()))
                    } else {
                        Ok((info, descriptor))
                    }
                }
                Err(e) => Err(e),
            };

            match result {
                Ok((info, descriptor)) => provisioned.push((Some(info), Some(descriptor))),
                Err(e) => {
                    let removed = manager.remove_all().await;
                    warn!(task_id = %task.id, error = %e, removed, "Provisioning failed; rolled back worktrees");
                    return Err(e);
                }
            }
        }
        Ok(provisioned)
    }

    /// Retry transient git failures until the breaker opens.
    async fn create_workspace(
        &self,
        manager: &WorktreeManager,
        task_id: &str,
    ) -> DispatchResult<WorkspaceInfo> {
        loop {
            if manager.should_fail_fast() {
                return Err(DispatchError::CircuitOpen);
            }
            match manager.create(task_id).await {
                Ok(info) => return Ok(info),
                Err(source @ (WorkspaceError::Git { .. } | WorkspaceError::Io(_))) => {
                    if manager.should_fail_fast() {
                        warn!(task_id, error = %source, "Worktree creation keeps failing");
                        return Err(DispatchError::CircuitOpen);
                    }
                    warn!(task_id, error = %source, "Worktree creation failed; retrying");
                    tokio::time::sleep(PROVISION_RETRY_DELAY).await;
                }
                Err(source) => {
                    return Err(DispatchError::Provisioning {
                        task_id: task_id.to_string(),
                        source,
                    })
                }
            }
        }
    }

    fn attach_callbacks(&self, dispatch_id: &str) -> Vec<ListenerId> {
        let mut ids = Vec::new();
        if let Some(ref callback) = self.on_status {
            let callback = Arc::clone(callback);
            let dispatch_id = dispatch_id.to_string();
            match self.bus.subscribe_fn(move |event| {
                if event.dispatch_id != dispatch_id {
                    return;
                }
                if let EventPayload::TaskStatusChanged { ref record, .. } = event.payload {
                    callback(&**record);
                }
            }) {
                Ok(id) => ids.push(id),
                Err(e) => warn!(error = %e, "Could not register status callback"),
            }
        }
        if let Some(ref callback) = self.on_batch {
            let callback = Arc::clone(callback);
            let dispatch_id = dispatch_id.to_string();
            match self.bus.subscribe_fn(move |event| {
                if event.dispatch_id != dispatch_id {
                    return;
                }
                if let EventPayload::BatchCompleted {
                    batch_index,
                    ref task_ids,
                } = event.payload
                {
                    callback(batch_index, task_ids);
                }
            }) {
                Ok(id) => ids.push(id),
                Err(e) => warn!(error = %e, "Could not register batch callback"),
            }
        }
        ids
    }

    /// Drive one task to a terminal status. Never fails; every problem ends
    /// up in the task's record.
    #[instrument(skip_all, fields(task_id = %job.task.id, agent = %job.task.agent))]
    async fn run_task(
        &self,
        tracker: &TaskTracker,
        job: &Job,
        manager: Option<&WorktreeManager>,
        cancel: &CancellationToken,
    ) {
        let task_id = job.task.id.as_str();
        tracker.transition(task_id, TaskStatus::Queued, RecordPatch::default());

        let completion = if cancel.is_cancelled() {
            Completion::Aborted(RecordPatch::error("dispatch aborted"))
        } else {
            self.drive_session(tracker, job, cancel).await
        };

        self.finish(tracker, job, manager, completion).await;
    }

    async fn drive_session(
        &self,
        tracker: &TaskTracker,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Completion {
        let task_id = job.task.id.as_str();
        let title = format!("swarm: {task_id}");
        let session_id = match self
            .session
            .create_session(&title, self.options.parent_session_id.as_deref())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(task_id, error = %e, "Failed to create session");
                return Completion::Failed(RecordPatch::error(format!(
                    "session creation failed: {e}"
                )));
            }
        };

        tracker.transition(task_id, TaskStatus::Starting, RecordPatch::session(&session_id));
        self.gate
            .bind(
                &session_id,
                SessionBinding {
                    task_id: task_id.to_string(),
                    workspace: job.cwd.clone(),
                    sandbox: job.sandbox.clone(),
                },
            )
            .await;

        let completion = self.converse(tracker, job, &session_id, cancel).await;
        self.gate.unbind(&session_id).await;
        completion
    }

    async fn converse(
        &self,
        tracker: &TaskTracker,
        job: &Job,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Completion {
        let task_id = job.task.id.as_str();
        let agent = Some(job.task.agent.clone());

        // The payload goes in silently; the result request starts the work.
        if let Err(e) = self
            .session
            .prompt(
                session_id,
                vec![MessagePart::text(payload_message(job))],
                PromptOptions {
                    agent: agent.clone(),
                    no_reply: true,
                },
            )
            .await
        {
            return Completion::Failed(RecordPatch::error(format!(
                "failed to deliver task payload: {e}"
            )));
        }
        if let Err(e) = self
            .session
            .prompt(
                session_id,
                vec![MessagePart::text(RESULT_SCHEMA_PROMPT)],
                PromptOptions {
                    agent,
                    no_reply: false,
                },
            )
            .await
        {
            return Completion::Failed(RecordPatch::error(format!(
                "failed to deliver result instructions: {e}"
            )));
        }
        tracker.transition(task_id, TaskStatus::Running, RecordPatch::default());

        let poller = SessionPoller::new(Arc::clone(&self.session), self.options.poll_options());
        let task_cancel = cancel.child_token();
        let outcome = poller
            .wait_for_idle(session_id, &task_cancel, |text| {
                tracker.transition(task_id, TaskStatus::Streaming, RecordPatch::default());
                tracker.emit(EventPayload::TaskOutput {
                    task_id: task_id.to_string(),
                    text,
                });
            })
            .await;

        if outcome == PollOutcome::Cancelled {
            if let Err(e) = self.session.abort(session_id).await {
                warn!(task_id, error = %e, "Failed to abort session");
            }
        }

        // Audited whatever the outcome.
        let transcript = self.session.list_messages(session_id).await;
        match transcript {
            Ok(ref messages) => self.audit_tool_calls(task_id, session_id, messages).await,
            Err(ref e) => debug!(task_id, error = %e, "Transcript unavailable for tool audit"),
        }

        match outcome {
            PollOutcome::Idle => read_result(transcript),
            PollOutcome::Timeout => Completion::TimedOut(RecordPatch::error(format!(
                "session did not go idle within {}s",
                self.options.task_timeout.as_secs()
            ))),
            PollOutcome::Error(reason) => {
                Completion::Failed(RecordPatch::error(format!("session error: {reason}")))
            }
            PollOutcome::Cancelled => Completion::Aborted(RecordPatch::error("dispatch aborted")),
        }
    }

    /// Pass each tool call of the transcript through the gate once.
    async fn audit_tool_calls(
        &self,
        task_id: &str,
        session_id: &str,
        messages: &[SessionMessage],
    ) {
        let mut seen = HashSet::new();
        for call in tool_calls(messages) {
            if !call.call_id.is_empty() && !seen.insert(call.call_id.clone()) {
                continue;
            }
            if let Err(e) = self.gate.authorize(session_id, &call.tool, &call.input).await {
                warn!(task_id, tool = %call.tool, error = %e, "Tool call not authorized");
            }
        }
    }

    /// Tear down the worktree (auto-committing leftovers), measure divergence
    /// and record the terminal status.
    async fn finish(
        &self,
        tracker: &TaskTracker,
        job: &Job,
        manager: Option<&WorktreeManager>,
        completion: Completion,
    ) {
        let task_id = job.task.id.as_str();

        let divergence = match (manager, job.workspace.as_ref()) {
            (Some(manager), Some(workspace)) => {
                if let Err(e) = manager.remove(task_id).await {
                    warn!(task_id, error = %e, "Failed to remove task worktree");
                }
                if matches!(completion, Completion::Aborted(_)) {
                    None
                } else {
                    match divergence::compute(
                        self.shell.as_ref(),
                        &self.options.working_dir,
                        &workspace.base_ref,
                        &workspace.branch,
                    )
                    .await
                    {
                        Ok(d) => Some(d),
                        Err(e) => {
                            warn!(task_id, error = %manager.sanitize(&e.to_string()), "Failed to measure branch divergence");
                            None
                        }
                    }
                }
            }
            _ => None,
        };

        let (status, patch) = match completion {
            Completion::Succeeded(result) => {
                let changed = match divergence {
                    Some(ref d) => d.has_changes(),
                    None => !result.files_changed.is_empty(),
                };
                let status = if changed {
                    TaskStatus::Done
                } else {
                    TaskStatus::NoChanges
                };
                (status, result_patch(&result))
            }
            Completion::Failed(patch) => (TaskStatus::Failed, patch),
            Completion::TimedOut(patch) => (TaskStatus::Timeout, patch),
            Completion::Aborted(patch) => (TaskStatus::Aborted, patch),
        };

        match tracker.transition(task_id, status, patch.with_divergence(divergence)) {
            Some(record) => {
                info!(task_id, status = %record.status, duration_ms = ?record.duration_ms, "Task finished");
                write_outcome(&record);
            }
            None => debug!(task_id, %status, "Task already terminal"),
        }
    }
}

fn write_outcome(record: &TaskRecord) {
    if let Some(ref log) = record.log_file {
        task_log::write_outcome(Path::new(log), record);
    }
}
