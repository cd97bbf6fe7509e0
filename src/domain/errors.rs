//! Domain errors for the dispatch engine.

use std::path::PathBuf;
use thiserror::Error;

/// Input problems detected before any resource is touched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No tasks to dispatch")]
    NoTasks,

    #[error("Invalid task id {0:?}: only letters, digits, '-' and '_' are allowed")]
    InvalidTaskId(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(String),

    #[error("Task {0} has no agent selector")]
    MissingAgent(String),

    #[error("Task {task_id}: instructions file {} does not exist", path.display())]
    MissingPayload { task_id: String, path: PathBuf },

    #[error("Task {0}: instructions are empty")]
    EmptyPayload(String),

    #[error("Invalid dispatch options: {0}")]
    InvalidOptions(String),
}

/// Failures of the workspace manager.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Invalid task id {0:?}")]
    InvalidTaskId(String),

    #[error("Workspace path for {0} escapes the base directory")]
    PathEscape(String),

    #[error("Workspace limit reached ({max} tracked)")]
    LimitExceeded { max: usize },

    #[error("Workspace for {0} already exists")]
    AlreadyExists(String),

    #[error("git {operation} failed: {message}")]
    Git { operation: String, message: String },

    #[error("Workspace I/O error: {0}")]
    Io(String),
}

/// Failures talking to the remote session service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session transport error: {0}")]
    Transport(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Malformed session response: {0}")]
    Decode(String),
}

/// Failures writing persisted state.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that invalidate a whole dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Provisioning failed for task {task_id}: {source}")]
    Provisioning {
        task_id: String,
        #[source]
        source: WorkspaceError,
    },

    #[error("No sandbox backend available for task {0}; refusing to run unconfined")]
    SandboxUnavailable(String),

    #[error("Workspace provisioning is failing repeatedly; giving up")]
    CircuitOpen,

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Timed out waiting for run {0}")]
    WaitTimeout(String),

    #[error("Dispatch task panicked: {0}")]
    Join(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
