//! Sandbox CLI commands.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::output::{format_duration_ms, output, CommandOutput};
use crate::domain::models::{Config, SandboxBackend, SandboxResult, SecurityProfile};
use crate::services::{SandboxDetector, SandboxExecutor};

#[derive(Args, Debug)]
pub struct SandboxArgs {
    #[command(subcommand)]
    pub command: SandboxCommands,
}

#[derive(Subcommand, Debug)]
pub enum SandboxCommands {
    /// Show the sandbox backend detected on this host
    Check,

    /// Run one command inside a sandbox rooted at a workspace
    Exec {
        /// Security profile (default, readonly, network-allow)
        #[arg(short, long, default_value = "default")]
        profile: String,

        /// Workspace root (defaults to the current directory)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Timeout in seconds
        #[arg(short, long, default_value = "120")]
        timeout: u64,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct CheckOutput {
    pub backend: SandboxBackend,
    pub enforced: bool,
    pub platform: &'static str,
    pub require_sandbox: bool,
}

impl CommandOutput for CheckOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Platform: {}", self.platform),
            format!("Backend: {}", self.backend),
        ];
        if self.enforced {
            lines.push("Sandboxing is available.".to_string());
        } else if self.require_sandbox {
            lines.push(
                "No sandbox backend found. Isolated dispatches will be refused (require_sandbox is on)."
                    .to_string(),
            );
        } else {
            lines.push("No sandbox backend found. Commands will not be executed.".to_string());
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ExecOutput {
    pub profile: SecurityProfile,
    #[serde(flatten)]
    pub result: SandboxResult,
}

impl CommandOutput for ExecOutput {
    fn to_human(&self) -> String {
        let r = &self.result;
        let mut lines = Vec::new();
        if !r.stdout.is_empty() {
            lines.push(r.stdout.trim_end().to_string());
        }
        if !r.stderr.is_empty() {
            lines.push(format!("--- stderr ---\n{}", r.stderr.trim_end()));
        }
        for warning in &r.warnings {
            lines.push(format!("warning: {warning}"));
        }
        let exit = r
            .exit_code
            .map_or_else(|| "none".to_string(), |c| c.to_string());
        let mut footer = format!(
            "[exit {exit}, {}, profile {}]",
            format_duration_ms(i64::try_from(r.duration.as_millis()).unwrap_or(i64::MAX)),
            self.profile
        );
        if r.timed_out {
            footer.push_str(" timed out");
        }
        if r.truncated {
            footer.push_str(" output truncated");
        }
        lines.push(footer);
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn platform() -> &'static str {
    std::env::consts::OS
}

pub async fn execute(args: SandboxArgs, config: &Config, json_mode: bool) -> Result<()> {
    let detector = SandboxDetector::system();
    match args.command {
        SandboxCommands::Check => {
            let backend = detector.backend().await;
            output(
                &CheckOutput {
                    backend,
                    enforced: backend != SandboxBackend::None,
                    platform: platform(),
                    require_sandbox: config.require_sandbox,
                },
                json_mode,
            );
        }
        SandboxCommands::Exec {
            profile,
            workspace,
            timeout,
            command,
        } => {
            let profile = SecurityProfile::parse_str(&profile)
                .ok_or_else(|| anyhow!("Unknown security profile: {profile}"))?;
            let workspace = match workspace {
                Some(dir) => dir,
                None => std::env::current_dir().context("Failed to resolve current directory")?,
            };
            let descriptor = detector.descriptor(profile, &workspace).await;
            let result = SandboxExecutor::default()
                .execute(
                    &command,
                    &descriptor,
                    Duration::from_secs(timeout),
                    &descriptor.workspace_root,
                    &[],
                )
                .await;
            let success = result.success();
            let exit_code = result.exit_code;
            output(&ExecOutput { profile, result }, json_mode);
            if !success {
                match exit_code {
                    Some(code) => bail!("Command exited with status {code}"),
                    None => bail!("Command did not run to completion"),
                }
            }
        }
    }
    Ok(())
}
