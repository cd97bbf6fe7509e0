//! Common test utilities for integration tests
//!
//! Provides temporary git repositories, a scripted agent session server and a
//! recording shell runner shared across the integration test files.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use swarm_dispatch::domain::errors::SessionError;
use swarm_dispatch::domain::models::{
    MessagePart, MessageRole, PromptOptions, SessionMessage, SessionStatusEntry, TaskRecord,
    TaskStatus,
};
use swarm_dispatch::domain::ports::{CommandOutput, SessionClient, ShellRunner};
use swarm_dispatch::infrastructure::TokioShellRunner;

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Whether a usable `git` binary is on PATH.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// Run git in `path` and return trimmed stdout, panicking on failure.
pub fn git(path: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Setup a git repository in a temp directory for testing
///
/// Creates an initialized git repo with one commit containing a README.
/// Returns the TempDir (for lifetime management) and the canonical repo path.
pub fn setup_test_git_repo() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir for git repo");
    let path = std::fs::canonicalize(dir.path()).expect("Failed to canonicalize temp dir");

    git(&path, &["init", "-q"]);
    git(&path, &["config", "user.email", "test@test.com"]);
    git(&path, &["config", "user.name", "Test User"]);
    git(&path, &["config", "commit.gpgsign", "false"]);
    std::fs::write(path.join("README.md"), "# fixture\n").expect("Failed to write README");
    std::fs::write(path.join(".gitignore"), ".swarm/\n").expect("Failed to write .gitignore");
    git(&path, &["add", "."]);
    git(&path, &["commit", "-q", "-m", "initial commit"]);

    (dir, path)
}

/// What a scripted session does once it is asked for its result.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write `files` into the working directory, then report `complete`.
    Complete { files: Vec<(String, String)> },
    /// Report `complete` without touching anything.
    CompleteNoChanges,
    /// Finish with this exact final message.
    Reply(String),
    /// Stay busy forever.
    NeverIdle,
    /// Report an error in the status entry.
    StatusError(String),
    /// Refuse to create the session.
    FailCreate,
}

impl Behavior {
    pub fn writes(name: &str, content: &str) -> Self {
        Self::Complete {
            files: vec![(name.to_string(), content.to_string())],
        }
    }
}

#[derive(Debug)]
struct FakeSession {
    task_id: String,
    behavior: Behavior,
    cwd: Option<PathBuf>,
    working: bool,
    polls: u32,
    finished: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: usize,
    sessions: HashMap<String, FakeSession>,
    created: Vec<String>,
    parents: Vec<Option<String>>,
    aborts: Vec<String>,
    prompts: Vec<(String, PromptOptions, String)>,
}

/// Scripted stand-in for the agent session server.
///
/// Sessions are matched to tasks through their title (`swarm: <task id>`).
/// The working directory is read from the payload preamble, which is where
/// `Complete` behaviors write their files.
pub struct FakeSessionClient {
    behaviors: HashMap<String, Behavior>,
    default_behavior: Behavior,
    busy_polls: u32,
    create_delay: Duration,
    state: Mutex<FakeState>,
}

impl FakeSessionClient {
    pub fn new(default_behavior: Behavior) -> Self {
        Self {
            behaviors: HashMap::new(),
            default_behavior,
            busy_polls: 1,
            create_delay: Duration::ZERO,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn with_task(mut self, task_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(task_id.to_string(), behavior);
        self
    }

    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Task ids in session-creation order.
    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn parents(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().parents.clone()
    }

    /// Number of abort calls for the session of `task_id`.
    pub fn abort_count(&self, task_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .aborts
            .iter()
            .filter(|sid| state.sessions.get(*sid).is_some_and(|s| s.task_id == task_id))
            .count()
    }

    pub fn prompts(&self) -> Vec<(String, PromptOptions, String)> {
        self.state.lock().unwrap().prompts.clone()
    }

    fn behavior_for(&self, task_id: &str) -> Behavior {
        self.behaviors
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| self.default_behavior.clone())
    }
}

fn message(role: MessageRole, parts: Vec<MessagePart>) -> SessionMessage {
    SessionMessage {
        role,
        parts,
        tokens: None,
    }
}

fn result_message(files: &[String]) -> String {
    let body = serde_json::json!({
        "status": "complete",
        "files_changed": files,
        "summary": "did the work",
        "blockers": [],
    });
    format!("All done.\n```json\n{body}\n```\n")
}

#[async_trait]
impl SessionClient for FakeSessionClient {
    async fn create_session(
        &self,
        title: &str,
        parent_id: Option<&str>,
    ) -> Result<String, SessionError> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        let task_id = title.trim_start_matches("swarm: ").to_string();
        let behavior = self.behavior_for(&task_id);
        if matches!(behavior, Behavior::FailCreate) {
            return Err(SessionError::Api {
                status: 500,
                message: "session server unavailable".into(),
            });
        }

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("ses_{:04}", state.next_id);
        state.created.push(task_id.clone());
        state.parents.push(parent_id.map(str::to_string));
        state.sessions.insert(
            id.clone(),
            FakeSession {
                task_id,
                behavior,
                cwd: None,
                working: false,
                polls: 0,
                finished: false,
            },
        );
        Ok(id)
    }

    async fn prompt(
        &self,
        session_id: &str,
        parts: Vec<MessagePart>,
        options: PromptOptions,
    ) -> Result<(), SessionError> {
        let text = parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut state = self.state.lock().unwrap();
        state
            .prompts
            .push((session_id.to_string(), options.clone(), text.clone()));
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if let Some(dir) = text
            .lines()
            .next()
            .and_then(|l| l.strip_prefix("Working directory: "))
        {
            session.cwd = Some(PathBuf::from(dir));
        }
        if !options.no_reply {
            session.working = true;
        }
        Ok(())
    }

    async fn status(&self) -> Result<HashMap<String, SessionStatusEntry>, SessionError> {
        let busy_polls = self.busy_polls;
        let mut state = self.state.lock().unwrap();
        let mut map = HashMap::new();
        for (id, session) in &mut state.sessions {
            let entry = match session.behavior {
                Behavior::NeverIdle => SessionStatusEntry::busy(),
                Behavior::StatusError(ref msg) => SessionStatusEntry::failed(msg.clone()),
                _ if session.finished => SessionStatusEntry::idle(),
                _ if !session.working => SessionStatusEntry::busy(),
                _ => {
                    session.polls += 1;
                    if session.polls <= busy_polls {
                        SessionStatusEntry::busy()
                    } else {
                        if let (Behavior::Complete { files }, Some(cwd)) =
                            (&session.behavior, &session.cwd)
                        {
                            for (name, content) in files {
                                std::fs::write(cwd.join(name), content)
                                    .expect("fake session failed to write file");
                            }
                        }
                        session.finished = true;
                        SessionStatusEntry::idle()
                    }
                }
            };
            map.insert(id.clone(), entry);
        }
        Ok(map)
    }

    async fn abort(&self, session_id: &str) -> Result<(), SessionError> {
        self.state.lock().unwrap().aborts.push(session_id.to_string());
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<SessionMessage>, SessionError> {
        let state = self.state.lock().unwrap();
        let session = state
            .sessions
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        let text = match session.behavior {
            Behavior::Complete { ref files } => {
                // Real transcripts interleave tool calls and end with a step
                // marker that carries no text.
                let names: Vec<String> = files.iter().map(|(n, _)| n.clone()).collect();
                let writes = files
                    .iter()
                    .enumerate()
                    .map(|(i, (name, content))| {
                        MessagePart::tool(
                            format!("call_{i}"),
                            "write",
                            serde_json::json!({ "filePath": name, "content": content }),
                        )
                    })
                    .chain([MessagePart::tool(
                        "call_read",
                        "read",
                        serde_json::json!({ "filePath": "README.md" }),
                    )])
                    .collect();
                return Ok(vec![
                    message(MessageRole::Assistant, writes),
                    SessionMessage::assistant(result_message(&names)),
                    message(MessageRole::Assistant, vec![MessagePart::Other]),
                ]);
            }
            Behavior::CompleteNoChanges => result_message(&[]),
            Behavior::Reply(ref text) => text.clone(),
            _ => String::new(),
        };
        Ok(vec![SessionMessage::assistant(text)])
    }
}

/// Real shell runner that records calls and the peak number of overlapping
/// `git worktree` operations.
#[derive(Default)]
pub struct RecordingShell {
    inner: TokioShellRunner,
    calls: Mutex<Vec<Vec<String>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl RecordingShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stretch every worktree operation so overlaps would be visible.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn count(&self, subcommand: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.first().map(String::as_str) == Some(subcommand))
            .count()
    }
}

#[async_trait]
impl ShellRunner for RecordingShell {
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> std::io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(args.to_vec());
        let is_worktree = args.first().map(String::as_str) == Some("worktree");
        if is_worktree {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
        let result = self.inner.run(program, args, cwd).await;
        if is_worktree {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }
}

/// Tracks the number of tasks holding a session at once, and every status
/// change in the order it was observed.
#[derive(Default)]
pub struct ActiveTracker {
    active: Mutex<HashSet<String>>,
    peak: AtomicUsize,
    events: Mutex<Vec<(String, TaskStatus)>>,
}

impl ActiveTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn observe(&self, record: &TaskRecord) {
        let mut active = self.active.lock().unwrap();
        if record.status.is_active() {
            active.insert(record.task_id.clone());
        } else {
            active.remove(&record.task_id);
        }
        self.peak.fetch_max(active.len(), Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push((record.task_id.clone(), record.status));
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<(String, TaskStatus)> {
        self.events.lock().unwrap().clone()
    }

    /// Position of the first event for `task_id` matching `pred`.
    pub fn position(&self, task_id: &str, pred: impl Fn(TaskStatus) -> bool) -> Option<usize> {
        self.events()
            .iter()
            .position(|(id, status)| id == task_id && pred(*status))
    }

    pub fn terminal_order(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|(_, status)| status.is_terminal())
            .map(|(id, _)| id)
            .collect()
    }
}

/// Status of every record, keyed by task id.
pub fn statuses(records: &[TaskRecord]) -> HashMap<String, TaskStatus> {
    records
        .iter()
        .map(|r| (r.task_id.clone(), r.status))
        .collect()
}

/// Poll `condition` until it holds, panicking after `timeout`.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
