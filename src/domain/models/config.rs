use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::sandbox::SecurityProfile;

/// Main configuration structure for the dispatch engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Maximum number of tasks holding a remote session at once (1-32)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Interval between session status polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-task deadline for the session to go idle
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Consecutive polls a session may be missing before it is declared gone
    #[serde(default = "default_missing_session_retries")]
    pub missing_session_retries: u32,

    /// Security profile applied to every task sandbox
    #[serde(default)]
    pub security_profile: SecurityProfile,

    /// Whether tasks get their own worktree and sandbox
    #[serde(default)]
    pub isolation: IsolationMode,

    /// Fail provisioning when no sandbox backend is available
    #[serde(default = "default_true")]
    pub require_sandbox: bool,

    /// Directory holding per-task worktrees (relative to the working directory)
    #[serde(default = "default_worktree_base_dir")]
    pub worktree_base_dir: PathBuf,

    /// Maximum number of worktrees tracked at once
    #[serde(default = "default_max_workspaces")]
    pub max_workspaces: usize,

    /// Directory for the registry, reports, task logs and audit trail
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Remote session server
    #[serde(default)]
    pub session: SessionServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_max_concurrency() -> usize {
    3
}

const fn default_poll_interval_ms() -> u64 {
    2000
}

const fn default_task_timeout_secs() -> u64 {
    1800
}

const fn default_missing_session_retries() -> u32 {
    3
}

const fn default_max_workspaces() -> usize {
    32
}

const fn default_true() -> bool {
    true
}

fn default_worktree_base_dir() -> PathBuf {
    PathBuf::from(".swarm/worktrees")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".swarm")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            task_timeout_secs: default_task_timeout_secs(),
            missing_session_retries: default_missing_session_retries(),
            security_profile: SecurityProfile::default(),
            isolation: IsolationMode::default(),
            require_sandbox: true,
            worktree_base_dir: default_worktree_base_dir(),
            max_workspaces: default_max_workspaces(),
            state_dir: default_state_dir(),
            session: SessionServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Whether tasks run in isolated worktrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// One worktree and sandbox descriptor per task
    #[default]
    Worktree,
    /// Tasks share the working directory; no sandbox descriptors
    Disabled,
}

/// Remote session server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionServerConfig {
    /// Base URL of the agent session server
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:4096".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SessionServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for log files (optional, if None logs only to stderr)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Enable stderr logging
    #[serde(default = "default_true")]
    pub enable_stderr: bool,

    /// Log rotation policy for file output
    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            enable_stderr: true,
            rotation: RotationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}
