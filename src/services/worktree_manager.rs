//! Worktree Manager
//!
//! Provides git worktree management for task isolation.
//! Each dispatched task gets its own worktree and branch, created from the
//! repository's current HEAD, so tasks can run in parallel without touching
//! each other's files.
//!
//! # Worktree Naming Convention
//!
//! - Worktree path: `<base_dir>/swarm-<run>-<task_id>`
//! - Branch: `swarm/<run>/<task_id>`
//!
//! `<run>` is a short run-scoped identifier, so repeated dispatches of the same
//! task ids never collide.
//!
//! Every mutating git call (add, remove, prune, list for cleanup) runs while
//! holding the tracked-workspace lock. Concurrent `git worktree` invocations
//! against the same repository race on shared metadata; the lock orders them.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::circuit_breaker::CircuitBreaker;
use crate::domain::errors::WorkspaceError;
use crate::domain::models::{is_valid_task_id, parse_worktree_list, WorkspaceInfo};
use crate::domain::ports::ShellRunner;

/// Prefix shared by every managed worktree directory.
pub const WORKTREE_PREFIX: &str = "swarm-";

/// Message used for commits made on behalf of a task before teardown.
pub const AUTO_COMMIT_MESSAGE: &str = "swarm(auto): preserve uncommitted task changes";

#[derive(Debug, Clone)]
pub struct WorktreeManagerConfig {
    /// Repository the worktrees belong to.
    pub repo_root: PathBuf,
    /// Directory holding worktrees; relative paths resolve against `repo_root`.
    pub base_dir: PathBuf,
    /// Maximum number of tracked worktrees.
    pub max_workspaces: usize,
    /// Run identifier; its first eight alphanumerics name worktrees and branches.
    pub run_id: String,
}

pub struct WorktreeManager {
    repo_root: PathBuf,
    base_dir: PathBuf,
    run_short_id: String,
    max_workspaces: usize,
    shell: Arc<dyn ShellRunner>,
    workspaces: Mutex<HashMap<String, WorkspaceInfo>>,
    breaker: CircuitBreaker,
}

impl WorktreeManager {
    pub fn new(config: WorktreeManagerConfig, shell: Arc<dyn ShellRunner>) -> Self {
        let base_dir = if config.base_dir.is_absolute() {
            config.base_dir
        } else {
            config.repo_root.join(config.base_dir)
        };
        let run_short_id: String = config
            .run_id
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(8)
            .collect();
        Self {
            repo_root: config.repo_root,
            base_dir: normalize(&base_dir),
            run_short_id,
            max_workspaces: config.max_workspaces,
            shell,
            workspaces: Mutex::new(HashMap::new()),
            breaker: CircuitBreaker::default(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn run_short_id(&self) -> &str {
        &self.run_short_id
    }

    /// Directory-name prefix of the worktrees created by this manager's run.
    pub fn run_prefix(&self) -> String {
        format!("{WORKTREE_PREFIX}{}-", self.run_short_id)
    }

    pub fn branch_for(&self, task_id: &str) -> String {
        format!("swarm/{}/{}", self.run_short_id, task_id)
    }

    pub fn path_for(&self, task_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}{}", self.run_prefix(), task_id))
    }

    /// True once workspace creation has failed three times in a row.
    pub fn should_fail_fast(&self) -> bool {
        self.breaker.should_fail_fast()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn get(&self, task_id: &str) -> Option<WorkspaceInfo> {
        self.workspaces.lock().await.get(task_id).cloned()
    }

    pub async fn tracked_count(&self) -> usize {
        self.workspaces.lock().await.len()
    }

    /// Create the worktree for a task.
    #[instrument(skip(self), fields(run = %self.run_short_id))]
    pub async fn create(&self, task_id: &str) -> Result<WorkspaceInfo, WorkspaceError> {
        let result = self.create_inner(task_id).await;
        match &result {
            Ok(info) => {
                self.breaker.record_success();
                info!(
                    task_id,
                    branch = %info.branch,
                    workspace = %info.path.display(),
                    "Task worktree created"
                );
            }
            Err(e) => {
                self.breaker.record_failure(e.to_string());
                error!(task_id, error = %e, "Failed to create task worktree");
            }
        }
        result
    }

    async fn create_inner(&self, task_id: &str) -> Result<WorkspaceInfo, WorkspaceError> {
        if !is_valid_task_id(task_id) {
            return Err(WorkspaceError::InvalidTaskId(task_id.to_string()));
        }

        let path = self.path_for(task_id);
        if !is_strict_subpath(&self.base_dir, &path) {
            return Err(WorkspaceError::PathEscape(task_id.to_string()));
        }

        let mut workspaces = self.workspaces.lock().await;
        if workspaces.contains_key(task_id) {
            return Err(WorkspaceError::AlreadyExists(task_id.to_string()));
        }
        if workspaces.len() >= self.max_workspaces {
            return Err(WorkspaceError::LimitExceeded {
                max: self.max_workspaces,
            });
        }

        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| WorkspaceError::Io(self.sanitize(&e.to_string())))?;

        let base_ref = self
            .git(&self.repo_root, &["rev-parse", "HEAD"], "rev-parse")
            .await?;
        let branch = self.branch_for(task_id);
        let path_arg = path.to_string_lossy().into_owned();

        self.git(
            &self.repo_root,
            &["worktree", "add", "-b", &branch, &path_arg, &base_ref],
            "worktree add",
        )
        .await?;

        let info = WorkspaceInfo {
            task_id: task_id.to_string(),
            path,
            branch,
            base_ref,
        };
        workspaces.insert(task_id.to_string(), info.clone());
        Ok(info)
    }

    /// Auto-commit and remove a task's worktree. The branch is kept.
    ///
    /// Unknown task ids are not ours to remove and are ignored.
    #[instrument(skip(self), fields(run = %self.run_short_id))]
    pub async fn remove(&self, task_id: &str) -> Result<(), WorkspaceError> {
        let mut workspaces = self.workspaces.lock().await;
        let Some(info) = workspaces.get(task_id).cloned() else {
            debug!(task_id, "No tracked worktree to remove");
            return Ok(());
        };

        self.teardown(&info).await?;
        workspaces.remove(task_id);
        Ok(())
    }

    /// Remove every tracked worktree, continuing past failures.
    ///
    /// Returns how many were removed.
    #[instrument(skip(self), fields(run = %self.run_short_id))]
    pub async fn remove_all(&self) -> usize {
        let mut workspaces = self.workspaces.lock().await;
        let mut ids: Vec<String> = workspaces.keys().cloned().collect();
        ids.sort();

        let mut removed = 0;
        for id in ids {
            let Some(info) = workspaces.get(&id).cloned() else {
                continue;
            };
            match self.teardown(&info).await {
                Ok(()) => {
                    workspaces.remove(&id);
                    removed += 1;
                }
                Err(e) => warn!(task_id = %id, error = %e, "Failed to remove worktree"),
            }
        }
        removed
    }

    /// Remove leftover worktrees from earlier runs.
    ///
    /// Considers worktrees under the base directory whose directory name
    /// starts with `prefix`, skipping any this manager still tracks. Each is
    /// auto-committed and force-removed; branches are preserved for review.
    #[instrument(skip(self), fields(run = %self.run_short_id))]
    pub async fn cleanup_orphaned(&self, prefix: &str) -> Result<usize, WorkspaceError> {
        let workspaces = self.workspaces.lock().await;
        let listing = self
            .git(
                &self.repo_root,
                &["worktree", "list", "--porcelain"],
                "worktree list",
            )
            .await?;

        let canonical_base = std::fs::canonicalize(&self.base_dir).ok();
        let tracked: Vec<&Path> = workspaces.values().map(|w| w.path.as_path()).collect();

        let mut removed = 0;
        for entry in parse_worktree_list(&listing) {
            let under_base = entry.path.starts_with(&self.base_dir)
                || canonical_base
                    .as_ref()
                    .is_some_and(|base| entry.path.starts_with(base));
            let name_matches = entry
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix));
            if !under_base || !name_matches {
                continue;
            }
            if tracked.iter().any(|t| same_path(t, &entry.path)) {
                continue;
            }

            self.auto_commit(&entry.path, "orphan").await;
            let path_arg = entry.path.to_string_lossy().into_owned();
            match self
                .git(
                    &self.repo_root,
                    &["worktree", "remove", "--force", &path_arg],
                    "worktree remove",
                )
                .await
            {
                Ok(_) => {
                    removed += 1;
                    info!(workspace = %self.sanitize(&path_arg), branch = ?entry.branch, "Removed orphaned worktree");
                }
                Err(e) => warn!(workspace = %self.sanitize(&path_arg), error = %e, "Failed to remove orphaned worktree"),
            }
        }

        self.prune().await;
        Ok(removed)
    }

    /// Caller must hold the workspace lock.
    async fn teardown(&self, info: &WorkspaceInfo) -> Result<(), WorkspaceError> {
        self.auto_commit(&info.path, &info.task_id).await;

        let path_arg = info.path.to_string_lossy().into_owned();
        let result = self
            .git(
                &self.repo_root,
                &["worktree", "remove", "--force", &path_arg],
                "worktree remove",
            )
            .await;

        match result {
            Ok(_) => {}
            Err(e) if !info.path.exists() => {
                debug!(task_id = %info.task_id, error = %e, "Worktree directory already gone");
            }
            Err(e) => return Err(e),
        }

        self.prune().await;
        info!(task_id = %info.task_id, branch = %info.branch, "Task worktree removed");
        Ok(())
    }

    async fn prune(&self) {
        if let Err(e) = self
            .git(&self.repo_root, &["worktree", "prune"], "worktree prune")
            .await
        {
            warn!(error = %e, "git worktree prune failed");
        }
    }

    /// Commit any uncommitted changes in a worktree. Best effort.
    async fn auto_commit(&self, path: &Path, task_id: &str) {
        if !path.exists() {
            debug!(task_id, "Worktree directory missing, skipping auto-commit");
            return;
        }

        let status = match self
            .git(path, &["status", "--porcelain"], "status")
            .await
        {
            Ok(s) => s,
            Err(e) => {
                warn!(task_id, error = %e, "Auto-commit status check failed");
                return;
            }
        };
        if status.is_empty() {
            return;
        }

        if let Err(e) = self.git(path, &["add", "-A"], "add").await {
            warn!(task_id, error = %e, "Auto-commit staging failed");
            return;
        }
        let message = format!("{AUTO_COMMIT_MESSAGE} ({task_id})");
        match self
            .git(path, &["commit", "--no-verify", "-m", &message], "commit")
            .await
        {
            Ok(_) => info!(task_id, "Auto-committed uncommitted changes"),
            Err(e) => warn!(task_id, error = %e, "Auto-commit failed"),
        }
    }

    async fn git(&self, cwd: &Path, args: &[&str], operation: &str) -> Result<String, WorkspaceError> {
        let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        let output = self
            .shell
            .run("git", &args, cwd)
            .await
            .map_err(|e| WorkspaceError::Git {
                operation: operation.to_string(),
                message: self.sanitize(&e.to_string()),
            })?;

        if !output.success() {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim()
            } else {
                output.stderr.trim()
            };
            return Err(WorkspaceError::Git {
                operation: operation.to_string(),
                message: self.sanitize(detail),
            });
        }
        Ok(output.text().to_string())
    }

    /// Strip the absolute project path from a message.
    pub fn sanitize(&self, message: &str) -> String {
        let root = self.repo_root.to_string_lossy();
        if root.is_empty() || root == "/" {
            return message.to_string();
        }
        message.replace(root.as_ref(), "<project>")
    }
}

/// Resolve `.` and `..` lexically.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True when `candidate` lies strictly inside `base`.
pub fn is_strict_subpath(base: &Path, candidate: &Path) -> bool {
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
    {
        return false;
    }
    let base = normalize(base);
    let candidate = normalize(candidate);
    candidate != base && candidate.starts_with(&base)
}

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CommandOutput;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct ScriptedShell {
        calls: StdMutex<Vec<Vec<String>>>,
        fail_worktree_add: bool,
    }

    #[async_trait]
    impl ShellRunner for ScriptedShell {
        async fn run(
            &self,
            _program: &str,
            args: &[String],
            _cwd: &Path,
        ) -> std::io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            let out = match args.first().map(String::as_str) {
                Some("rev-parse") => CommandOutput::ok("abc123\n"),
                Some("worktree") if args[1] == "add" && self.fail_worktree_add => {
                    CommandOutput::failed(128, "fatal: /secret/project/.git is locked")
                }
                _ => CommandOutput::ok(""),
            };
            Ok(out)
        }
    }

    fn manager(shell: Arc<ScriptedShell>, max: usize) -> WorktreeManager {
        WorktreeManager::new(
            WorktreeManagerConfig {
                repo_root: PathBuf::from("/secret/project"),
                base_dir: PathBuf::from(".swarm/worktrees"),
                max_workspaces: max,
                run_id: "1a2b3c4d-5e6f".to_string(),
            },
            shell,
        )
    }

    #[test]
    fn test_naming() {
        let mgr = manager(Arc::new(ScriptedShell::default()), 4);
        assert_eq!(mgr.run_short_id(), "1a2b3c4d");
        assert_eq!(mgr.branch_for("fix"), "swarm/1a2b3c4d/fix");
        assert_eq!(
            mgr.path_for("fix"),
            PathBuf::from("/secret/project/.swarm/worktrees/swarm-1a2b3c4d-fix")
        );
    }

    #[test]
    fn test_strict_subpath() {
        let base = Path::new("/repo/.swarm/worktrees");
        assert!(is_strict_subpath(base, Path::new("/repo/.swarm/worktrees/a")));
        assert!(!is_strict_subpath(base, base));
        assert!(!is_strict_subpath(base, Path::new("/repo/.swarm/worktrees/../x")));
        assert!(!is_strict_subpath(base, Path::new("/repo/.swarm/other")));
    }

    #[tokio::test]
    async fn test_invalid_ids_never_reach_git() {
        let shell = Arc::new(ScriptedShell::default());
        let mgr = manager(Arc::clone(&shell), 4);
        for id in ["../escape", "a/b", "a b", "a.b", ".."] {
            assert!(matches!(
                mgr.create(id).await,
                Err(WorkspaceError::InvalidTaskId(_))
            ));
        }
        assert!(shell.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_limit_and_duplicates() {
        let dir = tempfile::TempDir::new().unwrap();
        let shell = Arc::new(ScriptedShell::default());
        let mgr = WorktreeManager::new(
            WorktreeManagerConfig {
                repo_root: dir.path().to_path_buf(),
                base_dir: PathBuf::from("wt"),
                max_workspaces: 1,
                run_id: "run1".into(),
            },
            Arc::clone(&shell) as Arc<dyn ShellRunner>,
        );
        let info = mgr.create("a").await.unwrap();
        assert_eq!(info.base_ref, "abc123");
        assert!(matches!(
            mgr.create("a").await,
            Err(WorkspaceError::AlreadyExists(_))
        ));
        assert!(matches!(
            mgr.create("b").await,
            Err(WorkspaceError::LimitExceeded { max: 1 })
        ));
    }

    #[tokio::test]
    async fn test_git_errors_are_sanitized_and_trip_breaker() {
        let shell = Arc::new(ScriptedShell {
            fail_worktree_add: true,
            ..Default::default()
        });
        let dir = tempfile::TempDir::new().unwrap();
        let mgr = WorktreeManager::new(
            WorktreeManagerConfig {
                repo_root: PathBuf::from("/secret/project"),
                base_dir: dir.path().to_path_buf(),
                max_workspaces: 8,
                run_id: "run1".into(),
            },
            Arc::clone(&shell) as Arc<dyn ShellRunner>,
        );

        for id in ["a", "b", "c"] {
            let err = mgr.create(id).await.unwrap_err().to_string();
            assert!(!err.contains("/secret/project"), "{err}");
            assert!(err.contains("<project>"), "{err}");
        }
        assert!(mgr.should_fail_fast());
        assert_eq!(mgr.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_untracked_is_noop() {
        let shell = Arc::new(ScriptedShell::default());
        let mgr = manager(Arc::clone(&shell), 4);
        mgr.remove("ghost").await.unwrap();
        assert!(shell.calls.lock().unwrap().is_empty());
    }
}
