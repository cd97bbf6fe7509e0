//! Per-session tool gating.
//!
//! Each remote session is bound to its task's workspace and sandbox for its
//! lifetime. Tool calls from unbound sessions are refused. File-mutating
//! tools leave an audit line, and shell commands run through the sandbox
//! executor inside the bound workspace.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::models::{SandboxDescriptor, SandboxResult};
use crate::infrastructure::logging::{
    AuditEvent, AuditEventType, AuditLogger, AuditOutcome, AuditSandbox,
};
use crate::services::sandbox::SandboxExecutor;

/// Tools that can change files.
pub const MUTATING_TOOLS: &[&str] = &["write", "edit", "patch", "bash", "multiedit"];

/// Default deadline for a gated shell command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Whether `tool` can change files.
pub fn is_mutating(tool: &str) -> bool {
    let tool = tool.to_ascii_lowercase();
    MUTATING_TOOLS.contains(&tool.as_str())
}

/// What a session is allowed to touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBinding {
    pub task_id: String,
    pub workspace: PathBuf,
    /// `None` when isolation is disabled.
    pub sandbox: Option<SandboxDescriptor>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolGateError {
    #[error("Session {0} is not bound to a task workspace")]
    UnknownSession(String),

    #[error("Session {0} has no sandbox; refusing to run shell commands")]
    NoSandbox(String),
}

pub struct ToolGate {
    bindings: RwLock<HashMap<String, SessionBinding>>,
    executor: SandboxExecutor,
    audit: Option<AuditLogger>,
    command_timeout: Duration,
}

impl ToolGate {
    pub fn new(executor: SandboxExecutor, audit: Option<AuditLogger>) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            executor,
            audit,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub async fn bind(&self, session_id: &str, binding: SessionBinding) {
        debug!(session_id, task_id = %binding.task_id, "Binding session to workspace");
        self.bindings
            .write()
            .await
            .insert(session_id.to_string(), binding);
    }

    /// Forget a session. Returns whether it was bound.
    pub async fn unbind(&self, session_id: &str) -> bool {
        self.bindings.write().await.remove(session_id).is_some()
    }

    pub async fn binding(&self, session_id: &str) -> Option<SessionBinding> {
        self.bindings.read().await.get(session_id).cloned()
    }

    pub async fn bound_count(&self) -> usize {
        self.bindings.read().await.len()
    }

    /// Check a tool call before it runs.
    ///
    /// Returns the session's binding. Mutating tools are audited.
    pub async fn authorize(
        &self,
        session_id: &str,
        tool: &str,
        args: &Value,
    ) -> Result<SessionBinding, ToolGateError> {
        let Some(binding) = self.binding(session_id).await else {
            warn!(session_id, tool, "Tool call from unbound session refused");
            self.audit(AuditEventType::ToolRefused, tool, session_id, None, AuditOutcome::Refused, None)
                .await;
            return Err(ToolGateError::UnknownSession(session_id.to_string()));
        };

        if is_mutating(tool) {
            self.audit(
                AuditEventType::ToolInvoked,
                tool,
                session_id,
                Some(&binding),
                AuditOutcome::Success,
                Some(json!({ "args": args })),
            )
            .await;
        }
        Ok(binding)
    }

    /// Run a shell command for a session inside its workspace sandbox.
    pub async fn run_command(
        &self,
        session_id: &str,
        command: &str,
        env: &[(String, String)],
    ) -> Result<SandboxResult, ToolGateError> {
        let binding = self.authorize(session_id, "bash", &json!({ "command": command })).await?;
        let Some(ref descriptor) = binding.sandbox else {
            self.audit(
                AuditEventType::ToolRefused,
                "bash",
                session_id,
                Some(&binding),
                AuditOutcome::Refused,
                Some(json!({ "command": command })),
            )
            .await;
            return Err(ToolGateError::NoSandbox(session_id.to_string()));
        };

        let argv = vec!["sh".to_string(), "-c".to_string(), command.to_string()];
        let result = self
            .executor
            .execute(&argv, descriptor, self.command_timeout, &binding.workspace, env)
            .await;

        let outcome = if result.success() {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        };
        self.audit(
            AuditEventType::CommandExecuted,
            "bash",
            session_id,
            Some(&binding),
            outcome,
            Some(json!({
                "command": command,
                "exit_code": result.exit_code,
                "timed_out": result.timed_out,
                "warnings": result.warnings,
            })),
        )
        .await;
        Ok(result)
    }

    async fn audit(
        &self,
        event_type: AuditEventType,
        tool: &str,
        session_id: &str,
        binding: Option<&SessionBinding>,
        outcome: AuditOutcome,
        metadata: Option<Value>,
    ) {
        let Some(ref audit) = self.audit else {
            return;
        };
        let mut event = AuditEvent::new(event_type, tool, session_id, outcome);
        if let Some(binding) = binding {
            event.task_id = Some(binding.task_id.clone());
            event.workspace = Some(binding.workspace.display().to_string());
            event.sandbox = binding.sandbox.as_ref().map(AuditSandbox::from);
        }
        event.metadata = metadata;
        audit.record(event).await;
    }
}
