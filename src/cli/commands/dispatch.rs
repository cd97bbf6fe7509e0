//! `swarm dispatch`: run a task file against the session server.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cli::output::{format_duration_ms, list_table, output, truncate, CommandOutput};
use crate::domain::models::{
    Config, DispatchReport, IsolationMode, ReportTotals, SecurityProfile, Task,
};
use crate::infrastructure::logging::AuditLogger;
use crate::infrastructure::{HttpSessionClient, TokioShellRunner};
use crate::services::dispatcher::new_dispatch_id;
use crate::services::event_bus::EventPayload;
use crate::services::{DispatchOptions, Dispatcher, SandboxExecutor, ToolGate};

#[derive(Args, Debug)]
pub struct DispatchArgs {
    /// Task file (YAML or JSON list of {id, agent, instructions | instructions_file})
    #[arg(short, long)]
    pub tasks: PathBuf,

    /// Repository to dispatch against (defaults to the current directory)
    #[arg(short = 'C', long)]
    pub working_dir: Option<PathBuf>,

    /// Parent session the task sessions are nested under
    #[arg(short, long, env = "SWARM_PARENT_SESSION")]
    pub parent_session: Option<String>,

    /// Maximum concurrently running tasks
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-task timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Security profile (default, readonly, network-allow)
    #[arg(long)]
    pub profile: Option<String>,

    /// Run every task in the working directory without worktrees
    #[arg(long)]
    pub no_isolation: bool,

    /// Print the latest agent output while tasks run
    #[arg(long)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskFile {
    List(Vec<Task>),
    Document { tasks: Vec<Task> },
}

/// Read tasks from a YAML or JSON file.
///
/// Either a bare list or a document with a `tasks` key is accepted. Files
/// ending in `.json` are parsed as JSON, everything else as YAML.
pub fn load_task_file(path: &Path) -> Result<Vec<Task>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let file: TaskFile = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON task file {}", path.display()))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML task file {}", path.display()))?
    };
    Ok(match file {
        TaskFile::List(tasks) | TaskFile::Document { tasks } => tasks,
    })
}

fn apply_overrides(options: &mut DispatchOptions, args: &DispatchArgs) -> Result<()> {
    if let Some(n) = args.concurrency {
        options.max_concurrency = n;
    }
    if let Some(secs) = args.timeout {
        options.task_timeout = Duration::from_secs(secs);
    }
    if let Some(ref profile) = args.profile {
        options.security_profile = SecurityProfile::parse_str(profile)
            .ok_or_else(|| anyhow!("Unknown security profile: {profile}"))?;
    }
    if args.no_isolation {
        options.isolation = IsolationMode::Disabled;
    }
    options.parent_session_id.clone_from(&args.parent_session);
    options.stream_output = args.stream;
    Ok(())
}

pub async fn execute(args: DispatchArgs, config: &Config, json_mode: bool) -> Result<()> {
    let working_dir = match args.working_dir {
        Some(ref dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let tasks = load_task_file(&args.tasks)?;

    let mut options = DispatchOptions::from_config(config, working_dir);
    apply_overrides(&mut options, &args)?;

    let audit = match AuditLogger::in_state_dir(&options.resolved_state_dir()).await {
        Ok(logger) => Some(logger),
        Err(e) => {
            warn!(error = %e, "Audit trail unavailable, continuing without it");
            None
        }
    };
    let gate = Arc::new(ToolGate::new(SandboxExecutor::default(), audit));
    let client = HttpSessionClient::new(&config.session)?;

    let dispatcher = Dispatcher::new(Arc::new(client), Arc::new(TokioShellRunner::new()), options)
        .with_tool_gate(gate);

    if !json_mode {
        let stream = args.stream;
        dispatcher
            .event_bus()
            .subscribe_fn(move |event| match event.payload {
                EventPayload::TaskStatusChanged {
                    ref task_id, to, ..
                } => eprintln!("{task_id:<24} {to}"),
                EventPayload::TaskOutput {
                    ref task_id,
                    ref text,
                } if stream => eprintln!("{task_id:<24} | {}", truncate(text.trim(), 200)),
                _ => {}
            })
            .map_err(|e| anyhow!(e))?;
    }

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, aborting dispatch");
                cancel.cancel();
            }
        })
    };

    let result = dispatcher.run(&new_dispatch_id(), tasks, cancel).await;
    interrupt.abort();
    let report = result.context("Dispatch failed")?;

    output(&DispatchOutput::from(report), json_mode);
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct DispatchOutput {
    #[serde(flatten)]
    pub report: DispatchReport,
}

impl From<DispatchReport> for DispatchOutput {
    fn from(report: DispatchReport) -> Self {
        Self { report }
    }
}

fn totals_line(totals: &ReportTotals) -> String {
    format!(
        "{} task(s): {} succeeded, {} no changes, {} failed, {} timed out, {} aborted",
        totals.total,
        totals.succeeded,
        totals.no_changes,
        totals.failed,
        totals.timed_out,
        totals.aborted
    )
}

impl CommandOutput for DispatchOutput {
    fn to_human(&self) -> String {
        let report = &self.report;
        let mut table = list_table(&["task", "status", "duration", "commits", "detail"]);
        for record in &report.records {
            let detail = record
                .error
                .as_deref()
                .or(record.summary.as_deref())
                .unwrap_or("");
            table.add_row(vec![
                record.task_id.clone(),
                record.status.to_string(),
                record.duration_ms.map(format_duration_ms).unwrap_or_default(),
                record
                    .divergence
                    .as_ref()
                    .map(|d| d.commit_count.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                truncate(detail, 60),
            ]);
        }

        let mut lines = vec![
            format!("Dispatch {}", report.dispatch_id),
            totals_line(&report.totals),
            format!("Duration: {}", format_duration_ms(report.duration_ms)),
            String::new(),
            table.to_string(),
            String::new(),
            report.merge_instructions.trim_end().to_string(),
        ];
        if let Some(ref path) = report.report_path {
            lines.push(String::new());
            lines.push(format!("Report: {path}"));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
