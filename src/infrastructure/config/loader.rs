use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Directory holding project configuration, relative to the working directory.
pub const CONFIG_DIR: &str = ".swarm";

/// Prefix of environment overrides; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "SWARM_";

/// Configuration error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid max_concurrency: {0}. Must be between 1 and 32")]
    InvalidConcurrency(usize),

    #[error("Invalid poll_interval_ms: {0}. Must be at least 50")]
    InvalidPollInterval(u64),

    #[error("Invalid task_timeout_secs: {0}. Must be positive")]
    InvalidTaskTimeout(u64),

    #[error("Invalid max_workspaces: {0}. Must be at least max_concurrency ({1})")]
    InvalidMaxWorkspaces(usize, usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Session base_url cannot be empty")]
    EmptyBaseUrl,

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for the current directory
    pub fn load() -> Result<Config> {
        Self::load_from(Path::new("."))
    }

    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. <project>/.swarm/config.yaml
    /// 3. <project>/.swarm/local.yaml (optional local overrides)
    /// 4. Environment variables (SWARM_* prefix, highest priority)
    pub fn load_from(project_dir: &Path) -> Result<Config> {
        let dir = project_dir.join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, ignoring the environment
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_concurrency == 0 || config.max_concurrency > 32 {
            return Err(ConfigError::InvalidConcurrency(config.max_concurrency));
        }

        if config.poll_interval_ms < 50 {
            return Err(ConfigError::InvalidPollInterval(config.poll_interval_ms));
        }

        if config.task_timeout_secs == 0 {
            return Err(ConfigError::InvalidTaskTimeout(config.task_timeout_secs));
        }

        if config.max_workspaces < config.max_concurrency {
            return Err(ConfigError::InvalidMaxWorkspaces(
                config.max_workspaces,
                config.max_concurrency,
            ));
        }

        if config.session.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }

        if config.worktree_base_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "worktree_base_dir cannot be empty".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}
