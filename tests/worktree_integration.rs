//! Worktree manager against real git repositories.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{git, git_available, setup_test_git_repo, RecordingShell};
use swarm_dispatch::domain::errors::WorkspaceError;
use swarm_dispatch::services::{WorktreeManager, WorktreeManagerConfig};
use swarm_dispatch::TokioShellRunner;

fn manager(repo: &Path, run_id: &str, shell: Arc<RecordingShell>) -> WorktreeManager {
    WorktreeManager::new(
        WorktreeManagerConfig {
            repo_root: repo.to_path_buf(),
            base_dir: ".swarm/worktrees".into(),
            max_workspaces: 16,
            run_id: run_id.to_string(),
        },
        shell,
    )
}

#[tokio::test]
async fn create_and_remove_keeps_branch_with_auto_commit() {
    if !git_available() {
        return;
    }
    let (_dir, repo) = setup_test_git_repo();
    let shell = Arc::new(RecordingShell::new());
    let mgr = manager(&repo, "run00001", Arc::clone(&shell));

    let info = mgr.create("feature").await.unwrap();
    assert!(info.path.join("README.md").exists());
    assert_eq!(info.branch, "swarm/run00001/feature");
    assert_eq!(info.base_ref, git(&repo, &["rev-parse", "HEAD"]));

    std::fs::write(info.path.join("new.txt"), "uncommitted\n").unwrap();
    mgr.remove("feature").await.unwrap();

    assert!(!info.path.exists());
    assert_eq!(mgr.tracked_count().await, 0);
    let files = git(&repo, &["ls-tree", "-r", "--name-only", &info.branch]);
    assert!(files.lines().any(|f| f == "new.txt"));
    let subject = git(&repo, &["log", "-1", "--format=%s", &info.branch]);
    assert!(subject.starts_with("swarm(auto)"));
}

#[tokio::test]
async fn concurrent_creates_and_removes_never_overlap_in_git() {
    if !git_available() {
        return;
    }
    let (_dir, repo) = setup_test_git_repo();
    let shell = Arc::new(RecordingShell::with_delay(Duration::from_millis(30)));
    let mgr = Arc::new(manager(&repo, "parallel", Arc::clone(&shell)));

    let creates: Vec<_> = (0..5)
        .map(|i| {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.create(&format!("t{i}")).await })
        })
        .collect();
    for handle in creates {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(mgr.tracked_count().await, 5);

    let removes: Vec<_> = (0..5)
        .map(|i| {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.remove(&format!("t{i}")).await })
        })
        .collect();
    for handle in removes {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(shell.max_in_flight(), 1);
    assert_eq!(mgr.tracked_count().await, 0);
    let listing = git(&repo, &["worktree", "list", "--porcelain"]);
    assert_eq!(listing.matches("worktree ").count(), 1);
}

#[tokio::test]
async fn traversal_ids_are_rejected_without_running_git() {
    let dir = tempfile::tempdir().unwrap();
    let shell = Arc::new(RecordingShell::new());
    let mgr = manager(dir.path(), "run", Arc::clone(&shell));

    for id in ["../escape", "a/b", "..", "", "with space"] {
        let err = mgr.create(id).await.unwrap_err();
        assert!(
            matches!(err, WorkspaceError::InvalidTaskId(_) | WorkspaceError::PathEscape(_)),
            "unexpected error for {id:?}: {err}"
        );
    }
    assert!(shell.calls().is_empty());
}

#[tokio::test]
async fn repeated_failures_open_the_breaker_until_a_success() {
    if !git_available() {
        return;
    }
    // A repository without commits has no HEAD to branch from.
    let dir = tempfile::tempdir().unwrap();
    let repo = std::fs::canonicalize(dir.path()).unwrap();
    git(&repo, &["init", "-q"]);
    git(&repo, &["config", "user.email", "test@test.com"]);
    git(&repo, &["config", "user.name", "Test User"]);
    git(&repo, &["config", "commit.gpgsign", "false"]);

    let mgr = WorktreeManager::new(
        WorktreeManagerConfig {
            repo_root: repo.clone(),
            base_dir: ".swarm/worktrees".into(),
            max_workspaces: 8,
            run_id: "breaker".into(),
        },
        Arc::new(TokioShellRunner::new()),
    );

    for id in ["a", "b", "c"] {
        let err = mgr.create(id).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Git { .. }));
        assert!(!err.to_string().contains(repo.to_string_lossy().as_ref()));
    }
    assert!(mgr.should_fail_fast());

    std::fs::write(repo.join("README.md"), "# now with history\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "first"]);

    mgr.create("d").await.unwrap();
    assert!(!mgr.should_fail_fast());
    assert_eq!(mgr.breaker().consecutive_failures(), 0);
    assert_eq!(mgr.remove_all().await, 1);
}

#[tokio::test]
async fn orphan_cleanup_removes_worktrees_but_keeps_branches() {
    if !git_available() {
        return;
    }
    let (_dir, repo) = setup_test_git_repo();

    // An interrupted run leaves its worktree behind.
    let crashed = manager(&repo, "crashed1", Arc::new(RecordingShell::new()));
    let left = crashed.create("left").await.unwrap();
    std::fs::write(left.path.join("work.txt"), "half done\n").unwrap();
    drop(crashed);

    // A worktree outside the managed prefix must survive.
    let foreign = repo.join(".swarm/worktrees/other-checkout");
    git(
        &repo,
        &["worktree", "add", "-b", "other", foreign.to_str().unwrap()],
    );

    let current = manager(&repo, "current1", Arc::new(RecordingShell::new()));
    let mine = current.create("mine").await.unwrap();

    let removed = current.cleanup_orphaned("swarm-").await.unwrap();
    assert_eq!(removed, 1);
    assert!(!left.path.exists());
    assert!(mine.path.exists());
    assert!(foreign.exists());

    let branches = git(&repo, &["branch", "--list", "swarm/*"]);
    assert!(branches.contains(&left.branch));
    let files = git(&repo, &["ls-tree", "-r", "--name-only", &left.branch]);
    assert!(files.lines().any(|f| f == "work.txt"));

    current.remove_all().await;
}
