//! Task status transitions.
//!
//! The transition table is a fixed DAG. [`apply`] never mutates its input: it
//! returns a new snapshot for a permitted edge and `None` for anything else,
//! so duplicate or out-of-order updates from concurrent pollers are no-ops.

use chrono::Utc;

use crate::domain::models::{RecordPatch, TaskRecord, TaskStatus};

/// Statuses reachable from `from` in one step.
pub fn allowed_transitions(from: TaskStatus) -> &'static [TaskStatus] {
    use TaskStatus::*;
    match from {
        Pending => &[Queued, Aborted],
        Queued => &[Starting, Failed, Aborted],
        Starting => &[Running, Failed, Timeout, Aborted],
        Running => &[Streaming, Done, Failed, NoChanges, Timeout, Aborted],
        Streaming => &[Done, Failed, NoChanges, Timeout, Aborted],
        Done | Failed | NoChanges | Timeout | Aborted => &[],
    }
}

pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Apply a transition and its field updates.
///
/// Stamps `started_at` the first time the task becomes active and
/// `completed_at`/`duration_ms` when it becomes terminal.
pub fn apply(record: &TaskRecord, to: TaskStatus, patch: RecordPatch) -> Option<TaskRecord> {
    if !can_transition(record.status, to) {
        return None;
    }

    let now = Utc::now();
    let mut next = record.clone();
    next.status = to;

    if to.is_active() && next.started_at.is_none() {
        next.started_at = Some(now);
    }
    if to.is_terminal() {
        next.completed_at = Some(now);
        let since = next.started_at.unwrap_or(next.queued_at);
        next.duration_ms = Some((now - since).num_milliseconds().max(0));
    }

    let RecordPatch {
        session_id,
        error,
        summary,
        files_changed,
        blockers,
        divergence,
        raw_output,
    } = patch;
    if session_id.is_some() {
        next.session_id = session_id;
    }
    if error.is_some() {
        next.error = error;
    }
    if summary.is_some() {
        next.summary = summary;
    }
    if let Some(files) = files_changed {
        next.files_changed = files;
    }
    if let Some(blockers) = blockers {
        next.blockers = blockers;
    }
    if divergence.is_some() {
        next.divergence = divergence;
    }
    if raw_output.is_some() {
        next.raw_output = raw_output;
    }

    Some(next)
}
