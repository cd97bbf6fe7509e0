//! Mutable per-task record and its lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::sandbox::SandboxDescriptor;

/// Lifecycle status of a dispatched task.
///
/// `Pending → Queued → Starting → Running → Streaming → {Done, Failed,
/// NoChanges, Timeout}`, with `Aborted` reachable from every non-terminal
/// state. See [`crate::services::state_machine`] for the full edge table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Accepted into a dispatch, not yet scheduled.
    #[default]
    Pending,
    /// Scheduled into a batch, waiting for its session.
    Queued,
    /// Remote session created, payload being injected.
    Starting,
    /// Payload injected, waiting for the session to go idle.
    Running,
    /// Session is producing output.
    Streaming,
    /// Completed with a durable change.
    Done,
    /// Failed (session error, malformed result, reported failure).
    Failed,
    /// Completed successfully but produced no change.
    NoChanges,
    /// Session did not go idle before the deadline.
    Timeout,
    /// Cancelled explicitly.
    Aborted,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 10] = [
        Self::Pending,
        Self::Queued,
        Self::Starting,
        Self::Running,
        Self::Streaming,
        Self::Done,
        Self::Failed,
        Self::NoChanges,
        Self::Timeout,
        Self::Aborted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Streaming => "streaming",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::NoChanges => "no-changes",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
        }
    }

    /// Terminal statuses admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::NoChanges | Self::Timeout | Self::Aborted
        )
    }

    /// Active statuses hold a remote session.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Streaming)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `git diff --shortstat` numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffStat {
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

/// Difference between a task branch and the revision it was created from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Divergence {
    /// Revision the workspace branched from.
    pub base: String,
    /// Commits on the task branch not reachable from `base`.
    pub commit_count: u32,
    /// Tip revision of the task branch.
    pub tip: Option<String>,
    /// Diff statistics between `base` and the tip.
    pub diff: DiffStat,
}

impl Divergence {
    pub fn has_changes(&self) -> bool {
        self.commit_count > 0
    }
}

/// Mutable state of one task within a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub dispatch_id: String,
    pub agent: String,
    pub status: TaskStatus,
    pub session_id: Option<String>,
    pub workspace_path: Option<String>,
    pub branch: Option<String>,
    pub sandbox: Option<SandboxDescriptor>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    pub divergence: Option<Divergence>,
    /// Raw final message, kept when it could not be parsed.
    pub raw_output: Option<String>,
    pub log_file: Option<String>,
}

impl TaskRecord {
    /// Create a pending record for a newly accepted task.
    pub fn new(
        task_id: impl Into<String>,
        dispatch_id: impl Into<String>,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            dispatch_id: dispatch_id.into(),
            agent: agent.into(),
            status: TaskStatus::Pending,
            session_id: None,
            workspace_path: None,
            branch: None,
            sandbox: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error: None,
            summary: None,
            files_changed: Vec::new(),
            blockers: Vec::new(),
            divergence: None,
            raw_output: None,
            log_file: None,
        }
    }
}

/// Optional field updates applied together with a status transition.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub session_id: Option<String>,
    pub error: Option<String>,
    pub summary: Option<String>,
    pub files_changed: Option<Vec<String>>,
    pub blockers: Option<Vec<String>>,
    pub divergence: Option<Divergence>,
    pub raw_output: Option<String>,
}

impl RecordPatch {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }

    pub fn with_divergence(mut self, divergence: Option<Divergence>) -> Self {
        self.divergence = divergence;
        self
    }
}
