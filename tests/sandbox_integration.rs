//! Sandboxed command execution on the host's real backend.
//!
//! Tests that need a backend skip themselves when none is usable, for example
//! inside containers that forbid user namespaces.

use std::path::Path;
use std::time::Duration;

use swarm_dispatch::domain::models::{SandboxBackend, SandboxDescriptor, SecurityProfile};
use swarm_dispatch::services::{SandboxDetector, SandboxExecutor};

fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".into(), "-c".into(), script.into()]
}

/// A descriptor for `workspace`, or None when sandboxing cannot run here.
async fn usable_descriptor(profile: SecurityProfile, workspace: &Path) -> Option<SandboxDescriptor> {
    let descriptor = SandboxDetector::system().descriptor(profile, workspace).await;
    if descriptor.backend == SandboxBackend::None {
        eprintln!("skipping: no sandbox backend on this host");
        return None;
    }
    let trial = SandboxExecutor::default()
        .execute(&sh("true"), &descriptor, Duration::from_secs(10), workspace, &[])
        .await;
    if !trial.success() {
        eprintln!("skipping: sandbox backend present but unusable: {}", trial.stderr);
        return None;
    }
    Some(descriptor)
}

#[tokio::test]
async fn missing_backend_refuses_instead_of_running_unconfined() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let descriptor = SandboxDetector::fixed(SandboxBackend::None)
        .descriptor(SecurityProfile::Default, dir.path())
        .await;

    let result = SandboxExecutor::default()
        .execute(
            &sh(&format!("touch {}", marker.display())),
            &descriptor,
            Duration::from_secs(5),
            dir.path(),
            &[],
        )
        .await;

    assert!(!descriptor.enforced);
    assert_eq!(result.exit_code, None);
    assert!(!result.warnings.is_empty());
    assert!(!marker.exists());
}

#[tokio::test]
async fn default_profile_writes_inside_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = std::fs::canonicalize(dir.path()).unwrap();
    let Some(descriptor) = usable_descriptor(SecurityProfile::Default, &workspace).await else {
        return;
    };

    let result = SandboxExecutor::default()
        .execute(
            &sh("echo built > out.txt && cat out.txt"),
            &descriptor,
            Duration::from_secs(10),
            &workspace,
            &[],
        )
        .await;

    assert!(result.success(), "stderr: {}", result.stderr);
    assert_eq!(result.stdout.trim(), "built");
    assert!(workspace.join("out.txt").exists());
}

#[tokio::test]
async fn readonly_profile_cannot_write_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = std::fs::canonicalize(dir.path()).unwrap();
    let Some(descriptor) = usable_descriptor(SecurityProfile::Readonly, &workspace).await else {
        return;
    };

    let result = SandboxExecutor::default()
        .execute(
            &sh("echo nope > blocked.txt"),
            &descriptor,
            Duration::from_secs(10),
            &workspace,
            &[],
        )
        .await;

    assert!(!result.success());
    assert!(!workspace.join("blocked.txt").exists());
}

#[tokio::test]
async fn env_files_are_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = std::fs::canonicalize(dir.path()).unwrap();
    std::fs::write(workspace.join(".env"), "API_KEY=secret\n").unwrap();
    let Some(descriptor) = usable_descriptor(SecurityProfile::Default, &workspace).await else {
        return;
    };

    let result = SandboxExecutor::default()
        .execute(
            &sh("cat .env 2>/dev/null; true"),
            &descriptor,
            Duration::from_secs(10),
            &workspace,
            &[],
        )
        .await;

    assert!(!result.stdout.contains("secret"));
}

#[tokio::test]
async fn env_prefixed_variants_are_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = std::fs::canonicalize(dir.path()).unwrap();
    std::fs::write(workspace.join(".envrc"), "export TOKEN=direnv-secret\n").unwrap();
    std::fs::create_dir_all(workspace.join("deploy")).unwrap();
    std::fs::write(workspace.join("deploy/.env_prod"), "DB_PASS=prod-secret\n").unwrap();
    std::fs::write(workspace.join("notes.txt"), "visible\n").unwrap();
    let Some(descriptor) = usable_descriptor(SecurityProfile::Default, &workspace).await else {
        return;
    };

    let result = SandboxExecutor::default()
        .execute(
            &sh("cat .envrc deploy/.env_prod notes.txt 2>/dev/null; true"),
            &descriptor,
            Duration::from_secs(10),
            &workspace,
            &[],
        )
        .await;

    assert!(result.stdout.contains("visible"));
    assert!(!result.stdout.contains("direnv-secret"));
    assert!(!result.stdout.contains("prod-secret"));
}

#[tokio::test]
async fn caller_env_reaches_the_command_but_host_secrets_do_not() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = std::fs::canonicalize(dir.path()).unwrap();
    let Some(descriptor) = usable_descriptor(SecurityProfile::Default, &workspace).await else {
        return;
    };

    let result = temp_env::async_with_vars(
        [("SWARM_TEST_HOST_SECRET", Some("leaked"))],
        SandboxExecutor::default().execute(
            &sh("echo \"task=$TASK_VALUE host=$SWARM_TEST_HOST_SECRET\""),
            &descriptor,
            Duration::from_secs(10),
            &workspace,
            &[("TASK_VALUE".to_string(), "given".to_string())],
        ),
    )
    .await;

    assert_eq!(result.stdout.trim(), "task=given host=");
}
