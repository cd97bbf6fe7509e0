//! Dispatch report assembly and persistence.

use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::domain::models::{DispatchReport, ReportTotals, TaskRecord, TaskStatus};
use crate::infrastructure::fs::write_json_atomic;

pub fn report_path(state_dir: &Path, dispatch_id: &str) -> PathBuf {
    state_dir.join("reports").join(format!("{dispatch_id}.json"))
}

/// Records that should be merged: done, with a branch that has commits.
fn mergeable(records: &[TaskRecord]) -> Vec<&TaskRecord> {
    records
        .iter()
        .filter(|r| r.status == TaskStatus::Done)
        .filter(|r| r.branch.is_some())
        .filter(|r| r.divergence.as_ref().is_some_and(|d| d.has_changes()))
        .collect()
}

/// Human-readable steps for reviewing and merging successful branches.
///
/// Only tasks that finished `done` with real commits are listed. In the
/// shared-directory configuration there are no branches and the instructions
/// point at the reported files instead.
pub fn merge_instructions(records: &[TaskRecord]) -> String {
    let branches = mergeable(records);
    let unmeasured: Vec<&TaskRecord> = records
        .iter()
        .filter(|r| r.status == TaskStatus::Done && r.branch.is_some() && r.divergence.is_none())
        .collect();
    let in_place: Vec<&TaskRecord> = records
        .iter()
        .filter(|r| r.status == TaskStatus::Done && r.branch.is_none())
        .collect();

    if branches.is_empty() && unmeasured.is_empty() && in_place.is_empty() {
        return "No task produced changes to merge.".to_string();
    }

    let mut out = String::new();
    if !branches.is_empty() {
        out.push_str("Review and merge the task branches:\n");
        for record in &branches {
            let branch = record.branch.as_deref().unwrap_or_default();
            let base = record
                .divergence
                .as_ref()
                .map_or("HEAD", |d| d.base.as_str());
            let _ = write!(out, "\n# {} ({})", record.task_id, record.agent);
            if let Some(ref summary) = record.summary {
                let _ = write!(out, ": {summary}");
            }
            let _ = writeln!(
                out,
                "\ngit log --oneline {base}..{branch}\ngit diff --stat {base}...{branch}\ngit merge --no-ff {branch}"
            );
        }
        out.push_str(
            "\nBranches are kept after merging. Delete them with `git branch -d <branch>` once reviewed.\n",
        );
    }
    if !unmeasured.is_empty() {
        out.push_str("\nBranches whose divergence could not be measured; inspect before merging:\n");
        for record in &unmeasured {
            let branch = record.branch.as_deref().unwrap_or_default();
            let _ = writeln!(out, "\n# {} ({})", record.task_id, record.agent);
            let _ = writeln!(out, "git log --oneline -n 20 {branch}\ngit merge --no-ff {branch}");
        }
    }
    if !in_place.is_empty() {
        out.push_str("\nChanges made directly in the working directory:\n");
        for record in &in_place {
            let _ = writeln!(out, "- {}: {}", record.task_id, record.files_changed.join(", "));
        }
    }
    out
}

pub fn build(
    dispatch_id: &str,
    parent_session_id: Option<String>,
    records: Vec<TaskRecord>,
    started_at: DateTime<Utc>,
) -> DispatchReport {
    let completed_at = Utc::now();
    DispatchReport {
        dispatch_id: dispatch_id.to_string(),
        parent_session_id,
        totals: ReportTotals::from_records(&records),
        merge_instructions: merge_instructions(&records),
        records,
        started_at,
        completed_at,
        duration_ms: (completed_at - started_at).num_milliseconds(),
        report_path: None,
    }
}

/// Write the report atomically. On failure the report keeps `report_path: None`.
pub fn persist(state_dir: &Path, report: &mut DispatchReport) {
    let path = report_path(state_dir, &report.dispatch_id);
    report.report_path = Some(path.display().to_string());
    match write_json_atomic(&path, report) {
        Ok(()) => info!(dispatch_id = %report.dispatch_id, path = %path.display(), "Dispatch report written"),
        Err(e) => {
            report.report_path = None;
            warn!(dispatch_id = %report.dispatch_id, error = %e, "Failed to persist dispatch report");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Divergence;
    use tempfile::TempDir;

    fn record(id: &str, status: TaskStatus, commits: u32) -> TaskRecord {
        let mut r = TaskRecord::new(id, "d1", "build");
        r.status = status;
        r.branch = Some(format!("swarm/d1/{id}"));
        r.divergence = Some(Divergence {
            base: "base0".into(),
            commit_count: commits,
            ..Divergence::default()
        });
        r
    }

    #[test]
    fn test_instructions_only_for_done_with_changes() {
        let records = vec![
            record("shipped", TaskStatus::Done, 2),
            record("idle", TaskStatus::NoChanges, 0),
            record("broken", TaskStatus::Failed, 1),
        ];
        let text = merge_instructions(&records);
        assert!(text.contains("git merge --no-ff swarm/d1/shipped"));
        assert!(text.contains("base0..swarm/d1/shipped"));
        assert!(!text.contains("idle"));
        assert!(!text.contains("broken"));
    }

    #[test]
    fn test_no_changes_message() {
        let text = merge_instructions(&[record("idle", TaskStatus::NoChanges, 0)]);
        assert_eq!(text, "No task produced changes to merge.");
    }

    #[test]
    fn test_in_place_changes_listed() {
        let mut r = TaskRecord::new("shared", "d1", "build");
        r.status = TaskStatus::Done;
        r.files_changed = vec!["README.md".into()];
        let text = merge_instructions(&[r]);
        assert!(text.contains("- shared: README.md\n"));
    }

    #[test]
    fn test_branch_without_divergence_still_listed() {
        let mut r = record("unmeasured", TaskStatus::Done, 0);
        r.divergence = None;
        let text = merge_instructions(&[r, record("idle", TaskStatus::NoChanges, 0)]);
        assert_ne!(text, "No task produced changes to merge.");
        assert!(text.contains("could not be measured"));
        assert!(text.contains("git merge --no-ff swarm/d1/unmeasured"));
        assert!(!text.contains("idle"));
    }

    #[test]
    fn test_build_and_persist() {
        let dir = TempDir::new().unwrap();
        let started = Utc::now();
        let mut report = build(
            "d1",
            Some("parent".into()),
            vec![
                record("a", TaskStatus::Done, 1),
                record("b", TaskStatus::Timeout, 0),
            ],
            started,
        );
        assert_eq!(report.totals.succeeded, 1);
        assert_eq!(report.totals.timed_out, 1);
        assert!(report.duration_ms >= 0);

        persist(dir.path(), &mut report);
        let path = report_path(dir.path(), "d1");
        assert_eq!(report.report_path.as_deref(), Some(path.display().to_string().as_str()));
        let back: DispatchReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.records.len(), 2);
    }

    #[test]
    fn test_persist_failure_clears_path() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("state");
        std::fs::write(&blocker, "not a directory").unwrap();

        let mut report = build("d2", None, vec![], Utc::now());
        persist(&blocker, &mut report);
        assert_eq!(report.report_path, None);
    }
}
