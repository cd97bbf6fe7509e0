//! Swarm Dispatch - fan-out engine for agent tasks
//!
//! Runs a batch of independent agent tasks on remote sessions, each in its own
//! git worktree and OS sandbox, tracks every task through a bounded lifecycle
//! and produces a durable run record plus a final report.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): dispatcher, state machine, worktrees, sandbox
//! - **Infrastructure Layer** (`infrastructure`): config, logging, HTTP and process adapters
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use swarm_dispatch::{Dispatcher, DispatchOptions, HttpSessionClient, Task, TokioShellRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = swarm_dispatch::ConfigLoader::load()?;
//!     let client = Arc::new(HttpSessionClient::new(&config.session)?);
//!     let dispatcher = Dispatcher::new(
//!         client,
//!         Arc::new(TokioShellRunner::new()),
//!         DispatchOptions::from_config(&config, std::env::current_dir()?),
//!     );
//!     let report = dispatcher
//!         .dispatch(vec![Task::inline("fix-lint", "build", "Fix the clippy warnings")])
//!         .await?;
//!     println!("{}", report.merge_instructions);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{
    DispatchError, DispatchResult, RegistryError, SessionError, ValidationError, WorkspaceError,
};
pub use domain::models::{
    Config, DispatchReport, IsolationMode, SandboxBackend, SandboxDescriptor, SandboxResult,
    SecurityProfile, SwarmState, SwarmStatus, Task, TaskRecord, TaskStatus,
};
pub use domain::ports::{SessionClient, ShellRunner};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::{HttpSessionClient, TokioShellRunner};
pub use services::{DispatchOptions, Dispatcher, SwarmController};
