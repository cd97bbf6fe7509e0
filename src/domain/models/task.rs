//! Task input model.
//!
//! A [`Task`] is one unit of work handed to a remote agent session. Tasks are
//! immutable once accepted into a dispatch; all mutable state lives in
//! [`TaskRecord`](super::record::TaskRecord).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Maximum length of a task identifier.
pub const MAX_TASK_ID_LEN: usize = 64;

fn task_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("task id pattern is valid"))
}

/// Check a task identifier against the safe charset.
///
/// Only ASCII alphanumerics, `-` and `_` are accepted. Anything else
/// (dots, slashes, whitespace, shell metacharacters) is rejected so the id
/// can be embedded in paths, branch names and session titles verbatim.
pub fn is_valid_task_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_TASK_ID_LEN && task_id_pattern().is_match(id)
}

/// Instructions carried by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskPayload {
    /// Instructions given inline.
    Inline {
        /// Instruction text sent as the first message of the session.
        instructions: String,
    },
    /// Instructions read from a file, resolved against the dispatch working directory.
    File {
        /// Path to the instructions file.
        instructions_file: PathBuf,
    },
}

impl TaskPayload {
    /// Resolve a file payload against `working_dir`; inline payloads return `None`.
    pub fn file_path(&self, working_dir: &Path) -> Option<PathBuf> {
        match self {
            Self::Inline { .. } => None,
            Self::File { instructions_file } if instructions_file.is_absolute() => {
                Some(instructions_file.clone())
            }
            Self::File { instructions_file } => Some(working_dir.join(instructions_file)),
        }
    }
}

/// A unit of work dispatched to one remote agent session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier, unique within a dispatch.
    pub id: String,
    /// Agent (role) selector forwarded to the session.
    pub agent: String,
    /// Instructions for the agent.
    #[serde(flatten)]
    pub payload: TaskPayload,
}

impl Task {
    /// Create a task with inline instructions.
    pub fn inline(
        id: impl Into<String>,
        agent: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            payload: TaskPayload::Inline {
                instructions: instructions.into(),
            },
        }
    }

    /// Create a task whose instructions live in a file.
    pub fn from_file(
        id: impl Into<String>,
        agent: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            payload: TaskPayload::File {
                instructions_file: path.into(),
            },
        }
    }
}
