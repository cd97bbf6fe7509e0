//! Plain-text per-task log files.
//!
//! One file per task under `<state_dir>/logs/<dispatch_id>/<task_id>.log`.
//! Writing is best effort: failures are logged and otherwise ignored.

use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::domain::models::TaskRecord;

pub fn log_path(state_dir: &Path, dispatch_id: &str, task_id: &str) -> PathBuf {
    state_dir
        .join("logs")
        .join(dispatch_id)
        .join(format!("{task_id}.log"))
}

/// Append one timestamped line.
pub fn append(path: &Path, line: &str) {
    if let Err(e) = try_append(path, line) {
        warn!(path = %path.display(), error = %e, "Failed to write task log");
    }
}

fn try_append(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "[{}] {}", Utc::now().to_rfc3339(), line)
}

/// Write the header block describing a task.
pub fn write_header(path: &Path, record: &TaskRecord) {
    let mut header = format!(
        "task: {}\ndispatch: {}\nagent: {}",
        record.task_id, record.dispatch_id, record.agent
    );
    if let Some(ref ws) = record.workspace_path {
        header.push_str(&format!("\nworkspace: {ws}"));
    }
    if let Some(ref branch) = record.branch {
        header.push_str(&format!("\nbranch: {branch}"));
    }
    if let Some(ref sandbox) = record.sandbox {
        header.push_str(&format!(
            "\nsandbox: {} ({}, enforced={})",
            sandbox.backend, sandbox.profile, sandbox.enforced
        ));
    }
    append(path, &header);
}

/// Write the outcome block of a finished task.
pub fn write_outcome(path: &Path, record: &TaskRecord) {
    let mut out = format!("outcome: {}", record.status);
    if let Some(ref summary) = record.summary {
        out.push_str(&format!("\nsummary: {summary}"));
    }
    if !record.files_changed.is_empty() {
        out.push_str(&format!("\nfiles: {}", record.files_changed.join(", ")));
    }
    if let Some(ref div) = record.divergence {
        out.push_str(&format!(
            "\ndiff: {} commit(s), {} file(s) changed, +{} -{}",
            div.commit_count, div.diff.files_changed, div.diff.insertions, div.diff.deletions
        ));
    }
    if let Some(ref err) = record.error {
        out.push_str(&format!("\nerror: {err}"));
    }
    if let Some(ref raw) = record.raw_output {
        out.push_str(&format!("\nraw output:\n{raw}"));
    }
    append(path, &out);
}
