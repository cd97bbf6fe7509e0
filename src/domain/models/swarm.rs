//! Swarm-level state for the event-driven dispatch surface.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::record::{TaskRecord, TaskStatus};

/// Overall status of a run, always derived from its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

impl SwarmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Derive the swarm status from task statuses.
///
/// Running while any task is non-terminal; aborted when every task was
/// aborted; failed when any task failed or timed out; otherwise completed.
pub fn derive_status<'a>(statuses: impl IntoIterator<Item = &'a TaskStatus>) -> SwarmStatus {
    let mut any = false;
    let mut all_aborted = true;
    let mut any_failed = false;

    for status in statuses {
        any = true;
        if !status.is_terminal() {
            return SwarmStatus::Running;
        }
        if *status != TaskStatus::Aborted {
            all_aborted = false;
        }
        if matches!(status, TaskStatus::Failed | TaskStatus::Timeout) {
            any_failed = true;
        }
    }

    if any && all_aborted {
        SwarmStatus::Aborted
    } else if any_failed {
        SwarmStatus::Failed
    } else {
        SwarmStatus::Completed
    }
}

/// Live view of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmState {
    pub run_id: String,
    pub tasks: BTreeMap<String, TaskRecord>,
}

impl SwarmState {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            tasks: BTreeMap::new(),
        }
    }

    pub fn status(&self) -> SwarmStatus {
        derive_status(self.tasks.values().map(|r| &r.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn test_derive_status() {
        assert_eq!(derive_status(&[Done, Running]), SwarmStatus::Running);
        assert_eq!(derive_status(&[Aborted, Aborted]), SwarmStatus::Aborted);
        assert_eq!(derive_status(&[Done, Aborted]), SwarmStatus::Completed);
        assert_eq!(derive_status(&[Done, Timeout]), SwarmStatus::Failed);
        assert_eq!(derive_status(&[NoChanges, Failed, Aborted]), SwarmStatus::Failed);
        assert_eq!(derive_status(&[Done, NoChanges]), SwarmStatus::Completed);
        assert_eq!(derive_status(&[Pending]), SwarmStatus::Running);
    }

    #[test]
    fn test_empty_swarm_is_completed() {
        assert_eq!(SwarmState::new("r").status(), SwarmStatus::Completed);
    }
}
