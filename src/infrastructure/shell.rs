//! Process runner backed by `tokio::process`.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::domain::ports::{CommandOutput, ShellRunner};

/// Runs programs directly (no shell) and captures their output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioShellRunner;

impl TokioShellRunner {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ShellRunner for TokioShellRunner {
    #[instrument(skip(self, args), fields(cwd = %cwd.display()))]
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> std::io::Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(program, status = ?result.status, "Command finished");
        Ok(result)
    }
}
