//! Audit trail for tool invocations made by remote sessions
//!
//! One JSON line per file-mutating tool call or sandboxed command, tying the
//! session to the workspace and sandbox it was bound to. Writing is best
//! effort: a failed audit write is logged and never fails the tool call.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::secret_scrubbing::SecretScrubber;
use crate::domain::models::{SandboxBackend, SandboxDescriptor, SecurityProfile};

/// File name of the audit trail inside the state directory.
pub const AUDIT_FILE: &str = "audit.jsonl";

/// Characters of the session id kept in audit lines.
pub const SESSION_PREFIX_LEN: usize = 8;

/// Audit logger for tool invocations
#[derive(Clone)]
pub struct AuditLogger {
    path: PathBuf,
    log_file: Arc<Mutex<File>>,
    scrubber: SecretScrubber,
}

/// Audit event types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A file-mutating tool was invoked
    ToolInvoked,
    /// A shell command ran under the sandbox
    CommandExecuted,
    /// A tool call was refused (unknown session, no sandbox)
    ToolRefused,
}

/// Outcome of an audited operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Refused,
}

/// Sandbox context recorded with each event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditSandbox {
    pub backend: SandboxBackend,
    pub profile: SecurityProfile,
    pub enforced: bool,
}

impl From<&SandboxDescriptor> for AuditSandbox {
    fn from(descriptor: &SandboxDescriptor) -> Self {
        Self {
            backend: descriptor.backend,
            profile: descriptor.profile,
            enforced: descriptor.enforced,
        }
    }
}

/// Complete audit event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// Tool name (`write`, `edit`, `bash`, ...)
    pub tool: String,
    /// Leading characters of the session id
    pub session: String,
    pub task_id: Option<String>,
    pub workspace: Option<String>,
    pub sandbox: Option<AuditSandbox>,
    pub outcome: AuditOutcome,
    pub metadata: Option<Value>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, tool: &str, session_id: &str, outcome: AuditOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            tool: tool.to_string(),
            session: session_prefix(session_id),
            task_id: None,
            workspace: None,
            sandbox: None,
            outcome,
            metadata: None,
        }
    }
}

/// Shorten a session id for audit lines.
pub fn session_prefix(session_id: &str) -> String {
    session_id.chars().take(SESSION_PREFIX_LEN).collect()
}

impl AuditLogger {
    /// Open (or create) the audit file in append mode
    ///
    /// Creates parent directories if they don't exist
    pub async fn new(log_path: impl AsRef<Path>) -> Result<Self> {
        let log_path = log_path.as_ref();

        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create audit log directory")?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .context("failed to open audit log file")?;

        Ok(Self {
            path: log_path.to_path_buf(),
            log_file: Arc::new(Mutex::new(file)),
            scrubber: SecretScrubber,
        })
    }

    /// Audit file in a state directory
    pub async fn in_state_dir(state_dir: &Path) -> Result<Self> {
        Self::new(state_dir.join(AUDIT_FILE)).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one event as a JSON line
    ///
    /// String metadata is scrubbed of credentials first.
    pub async fn log_event(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(metadata) = event.metadata.take() {
            event.metadata = Some(self.scrub_value(metadata));
        }
        let json = serde_json::to_string(&event).context("failed to serialize audit event")?;

        {
            let mut file = self
                .log_file
                .lock()
                .map_err(|e| anyhow::anyhow!("audit log mutex poisoned: {}", e))?;

            writeln!(file, "{}", json).context("failed to write audit event")?;
            file.flush().context("failed to flush audit log")?;
        }

        info!(
            event_type = ?event.event_type,
            tool = %event.tool,
            session = %event.session,
            task_id = ?event.task_id,
            outcome = ?event.outcome,
            "audit event"
        );

        Ok(())
    }

    /// Like [`log_event`](Self::log_event) but never fails
    pub async fn record(&self, event: AuditEvent) {
        let tool = event.tool.clone();
        if let Err(e) = self.log_event(event).await {
            warn!(error = %e, tool = %tool, path = %self.path.display(), "Failed to write audit event");
        }
    }

    fn scrub_value(&self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.scrubber.scrub(&s)),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.scrub_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.scrub_value(v)))
                    .collect(),
            ),
            other => other,
        }
    }
}
