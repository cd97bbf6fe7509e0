//! `swarm status`: show the run registry.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::output::{format_duration_ms, list_table, output, truncate, CommandOutput};
use crate::domain::models::{derive_status, Config, SwarmStatus, TaskRecord};
use crate::services::RunRegistry;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show records of this dispatch
    #[arg(short, long)]
    pub dispatch: Option<String>,

    /// Repository whose state directory is read (defaults to the current directory)
    #[arg(short = 'C', long)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub registry: String,
    pub status: Option<SwarmStatus>,
    pub records: Vec<TaskRecord>,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        if self.records.is_empty() {
            return format!("No task records found in {}.", self.registry);
        }

        let mut table = list_table(&["task", "dispatch", "status", "agent", "branch", "duration", "error"]);
        for record in &self.records {
            table.add_row(vec![
                record.task_id.clone(),
                truncate(&record.dispatch_id, 12),
                record.status.to_string(),
                record.agent.clone(),
                record.branch.clone().unwrap_or_default(),
                record.duration_ms.map(format_duration_ms).unwrap_or_default(),
                truncate(record.error.as_deref().unwrap_or(""), 50),
            ]);
        }

        let mut header = format!("{} task record(s)", self.records.len());
        if let Some(status) = self.status {
            header.push_str(&format!(", dispatch {}", status.as_str()));
        }
        format!("{header}:\n{table}")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn build_status(registry: &RunRegistry, dispatch: Option<&str>) -> StatusOutput {
    let records: Vec<TaskRecord> = registry
        .read()
        .into_values()
        .filter(|r| dispatch.is_none_or(|id| r.dispatch_id == id))
        .collect();
    let status = dispatch.map(|_| derive_status(records.iter().map(|r| &r.status)));
    StatusOutput {
        registry: registry.path().display().to_string(),
        status,
        records,
    }
}

pub async fn execute(args: StatusArgs, config: &Config, json_mode: bool) -> Result<()> {
    let working_dir = match args.working_dir {
        Some(ref dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let state_dir = if config.state_dir.is_absolute() {
        config.state_dir.clone()
    } else {
        working_dir.join(&config.state_dir)
    };
    let registry = RunRegistry::in_state_dir(&state_dir);
    output(&build_status(&registry, args.dispatch.as_deref()), json_mode);
    Ok(())
}
