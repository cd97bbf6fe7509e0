//! Worktree CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::TokioShellRunner;
use crate::services::worktree_manager::WORKTREE_PREFIX;
use crate::services::{WorktreeManager, WorktreeManagerConfig};

#[derive(Args, Debug)]
pub struct WorktreeArgs {
    #[command(subcommand)]
    pub command: WorktreeCommands,
}

#[derive(Subcommand, Debug)]
pub enum WorktreeCommands {
    /// Remove leftover task worktrees from interrupted runs (branches are kept)
    Cleanup {
        /// Only remove worktrees whose directory name starts with this prefix
        #[arg(short, long, default_value = WORKTREE_PREFIX)]
        prefix: String,

        /// Repository root (defaults to the current directory)
        #[arg(short = 'C', long)]
        working_dir: Option<PathBuf>,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct CleanupOutput {
    pub success: bool,
    pub removed: usize,
    pub prefix: String,
    pub base_dir: String,
}

impl CommandOutput for CleanupOutput {
    fn to_human(&self) -> String {
        if self.removed == 0 {
            format!(
                "No orphaned worktrees matching '{}' under {}.",
                self.prefix, self.base_dir
            )
        } else {
            format!(
                "Removed {} orphaned worktree(s) matching '{}'. Their branches were kept for review.",
                self.removed, self.prefix
            )
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: WorktreeArgs, config: &Config, json_mode: bool) -> Result<()> {
    match args.command {
        WorktreeCommands::Cleanup {
            prefix,
            working_dir,
        } => {
            let repo_root = match working_dir {
                Some(dir) => dir,
                None => std::env::current_dir().context("Failed to resolve current directory")?,
            };
            let manager = WorktreeManager::new(
                WorktreeManagerConfig {
                    repo_root,
                    base_dir: config.worktree_base_dir.clone(),
                    max_workspaces: config.max_workspaces,
                    run_id: "cleanup".to_string(),
                },
                Arc::new(TokioShellRunner::new()),
            );
            let removed = manager
                .cleanup_orphaned(&prefix)
                .await
                .context("Failed to clean up orphaned worktrees")?;

            let out = CleanupOutput {
                success: true,
                removed,
                prefix,
                base_dir: manager.base_dir().display().to_string(),
            };
            output(&out, json_mode);
        }
    }
    Ok(())
}
