//! Branch divergence: what a task's branch added on top of its base revision.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::domain::errors::WorkspaceError;
use crate::domain::models::{DiffStat, Divergence};
use crate::domain::ports::ShellRunner;

fn shortstat_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d+) files? changed(?:, (\d+) insertions?\(\+\))?(?:, (\d+) deletions?\(-\))?")
            .expect("shortstat pattern is valid")
    })
}

/// Parse `git diff --shortstat` output. Empty output means no diff.
pub fn parse_shortstat(output: &str) -> DiffStat {
    let Some(caps) = shortstat_pattern().captures(output) else {
        return DiffStat::default();
    };
    let num = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    DiffStat {
        files_changed: num(1),
        insertions: num(2),
        deletions: num(3),
    }
}

/// Measure `branch` against `base` in `repo_root`.
pub async fn compute(
    shell: &dyn ShellRunner,
    repo_root: &Path,
    base: &str,
    branch: &str,
) -> Result<Divergence, WorkspaceError> {
    let range = format!("{base}..{branch}");
    let count = git(shell, repo_root, &["rev-list", "--count", &range], "rev-list").await?;
    let commit_count = count.parse().map_err(|_| WorkspaceError::Git {
        operation: "rev-list".into(),
        message: format!("unexpected commit count {count:?}"),
    })?;

    let tip = git(shell, repo_root, &["rev-parse", branch], "rev-parse").await.ok();

    let diff_range = format!("{base}...{branch}");
    let diff = git(shell, repo_root, &["diff", "--shortstat", &diff_range], "diff")
        .await
        .map(|out| parse_shortstat(&out))
        .unwrap_or_default();

    Ok(Divergence {
        base: base.to_string(),
        commit_count,
        tip,
        diff,
    })
}

async fn git(
    shell: &dyn ShellRunner,
    cwd: &Path,
    args: &[&str],
    operation: &str,
) -> Result<String, WorkspaceError> {
    let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
    let output = shell
        .run("git", &args, cwd)
        .await
        .map_err(|e| WorkspaceError::Git {
            operation: operation.to_string(),
            message: e.to_string(),
        })?;
    if !output.success() {
        return Err(WorkspaceError::Git {
            operation: operation.to_string(),
            message: output.stderr.trim().to_string(),
        });
    }
    Ok(output.text().to_string())
}
