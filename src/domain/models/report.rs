//! Aggregated outcome of one dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{TaskRecord, TaskStatus};

/// Counts of terminal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportTotals {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub no_changes: usize,
    pub timed_out: usize,
    pub aborted: usize,
}

impl ReportTotals {
    pub fn from_records(records: &[TaskRecord]) -> Self {
        let mut totals = Self {
            total: records.len(),
            ..Self::default()
        };
        for record in records {
            match record.status {
                TaskStatus::Done => totals.succeeded += 1,
                TaskStatus::Failed => totals.failed += 1,
                TaskStatus::NoChanges => totals.no_changes += 1,
                TaskStatus::Timeout => totals.timed_out += 1,
                TaskStatus::Aborted => totals.aborted += 1,
                _ => {}
            }
        }
        totals
    }
}

/// Immutable result of a dispatch, produced once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub dispatch_id: String,
    pub parent_session_id: Option<String>,
    pub totals: ReportTotals,
    pub records: Vec<TaskRecord>,
    /// How to inspect and merge branches that produced changes.
    pub merge_instructions: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// Where the report was persisted, if persisting succeeded.
    pub report_path: Option<String>,
}

impl DispatchReport {
    pub fn record(&self, task_id: &str) -> Option<&TaskRecord> {
        self.records.iter().find(|r| r.task_id == task_id)
    }
}
