//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::{dispatch::DispatchArgs, sandbox::SandboxArgs, status::StatusArgs, worktree::WorktreeArgs};

#[derive(Parser, Debug)]
#[command(name = "swarm")]
#[command(about = "Swarm - run agent tasks in isolated worktrees and sandboxes", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .swarm/
    #[arg(short, long, global = true, env = "SWARM_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispatch a batch of tasks to agent sessions
    Dispatch(DispatchArgs),

    /// Show task records from the run registry
    Status(StatusArgs),

    /// Worktree maintenance
    Worktree(WorktreeArgs),

    /// Sandbox inspection and execution
    Sandbox(SandboxArgs),
}
