//! Sandboxed process execution.
//!
//! [`SandboxExecutor::execute`] never returns an error. Refusals, spawn
//! failures, timeouts and forced kills all come back as a [`SandboxResult`]
//! with `exit_code: None` and an explanatory warning.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::profile::{build_profile, SandboxConfig, SandboxPaths};
use super::detect::SANDBOX_EXEC;
use crate::domain::models::{SandboxBackend, SandboxDescriptor, SandboxResult};

/// Per-stream capture ceiling.
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Leading window inspected for NUL bytes.
pub const BINARY_SNIFF_BYTES: usize = 8192;

/// Time between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Host variables passed through to sandboxed processes.
pub const BASE_ENV_ALLOWLIST: &[&str] = &[
    "PATH", "HOME", "USER", "LOGNAME", "LANG", "LC_ALL", "LC_CTYPE", "TERM", "TMPDIR", "SHELL",
    "TZ",
];

fn env_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env name pattern is valid"))
}

#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    max_output_bytes: usize,
    kill_grace: Duration,
}

impl Default for SandboxExecutor {
    fn default() -> Self {
        Self {
            max_output_bytes: MAX_OUTPUT_BYTES,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

impl SandboxExecutor {
    pub fn new(max_output_bytes: usize, kill_grace: Duration) -> Self {
        Self {
            max_output_bytes,
            kill_grace,
        }
    }

    /// Run `command` (program followed by arguments) under `descriptor`.
    #[instrument(skip(self, command, env), fields(backend = %descriptor.backend, profile = %descriptor.profile))]
    pub async fn execute(
        &self,
        command: &[String],
        descriptor: &SandboxDescriptor,
        timeout: Duration,
        cwd: &Path,
        env: &[(String, String)],
    ) -> SandboxResult {
        if !descriptor.enforced || descriptor.backend == SandboxBackend::None {
            warn!("Refusing to run command without a sandbox backend");
            return SandboxResult::refused(
                "no sandbox backend available; refusing to run the command unconfined",
            );
        }
        if command.is_empty() {
            return SandboxResult::refused("empty command");
        }

        let workspace_root = descriptor.workspace_root.clone();
        let paths = match tokio::task::spawn_blocking(move || SandboxPaths::discover(&workspace_root)).await {
            Ok(paths) => paths,
            Err(e) => return SandboxResult::refused(format!("failed to resolve sandbox paths: {e}")),
        };

        let (program, args) = match build_profile(descriptor.backend, descriptor.profile, &paths) {
            SandboxConfig::Bubblewrap { mut args } => {
                args.push("--".into());
                args.extend(command.iter().cloned());
                ("bwrap".to_string(), args)
            }
            SandboxConfig::Seatbelt { profile } => {
                let mut args = vec!["-p".to_string(), profile];
                args.extend(command.iter().cloned());
                (SANDBOX_EXEC.to_string(), args)
            }
            SandboxConfig::Unconfined => {
                return SandboxResult::refused("sandbox configuration is unconfined; refusing to run");
            }
        };

        let mut warnings = Vec::new();
        let env = build_env(std::env::vars(), env, &mut warnings);
        let mut result = run_process(
            &program,
            &args,
            cwd,
            &env,
            timeout,
            self.kill_grace,
            self.max_output_bytes,
        )
        .await;
        warnings.append(&mut result.warnings);
        result.warnings = warnings;
        result
    }
}

/// Allow-listed host variables plus valid caller variables.
pub fn build_env(
    host: impl IntoIterator<Item = (String, String)>,
    caller: &[(String, String)],
    warnings: &mut Vec<String>,
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = host
        .into_iter()
        .filter(|(k, _)| BASE_ENV_ALLOWLIST.contains(&k.as_str()))
        .collect();

    for (key, value) in caller {
        if !env_name_pattern().is_match(key) {
            warnings.push(format!("dropped environment variable {key:?}: invalid name"));
            continue;
        }
        if value.contains('\0') {
            warnings.push(format!("dropped environment variable {key}: value contains NUL"));
            continue;
        }
        env.retain(|(k, _)| k != key);
        env.push((key.clone(), value.clone()));
    }
    env
}

/// Spawn a process in its own process group and collect its output.
pub(crate) async fn run_process(
    program: &str,
    args: &[String],
    cwd: &Path,
    env: &[(String, String)],
    timeout: Duration,
    kill_grace: Duration,
    max_output_bytes: usize,
) -> SandboxResult {
    let started = Instant::now();
    let mut warnings = Vec::new();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .env_clear()
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(program, error = %e, "Failed to spawn sandboxed process");
            let mut result = SandboxResult::refused(format!("failed to spawn {program}: {e}"));
            result.duration = started.elapsed();
            return result;
        }
    };

    let pgid = child.id().and_then(|id| i32::try_from(id).ok()).map(Pid::from_raw);
    let stdout = child.stdout.take().map(|s| tokio::spawn(read_capped(s, max_output_bytes)));
    let stderr = child.stderr.take().map(|s| tokio::spawn(read_capped(s, max_output_bytes)));

    let mut timed_out = false;
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => {
            timed_out = true;
            warnings.push(format!("timed out after {} ms", timeout.as_millis()));
            if let Some(pgid) = pgid {
                if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                    debug!(error = %e, "SIGTERM delivery failed");
                }
            }
            match tokio::time::timeout(kill_grace, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warnings.push(format!(
                        "process ignored SIGTERM; killed after {} ms grace period",
                        kill_grace.as_millis()
                    ));
                    if let Some(pgid) = pgid {
                        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                            debug!(error = %e, "SIGKILL delivery to process group failed");
                        }
                    }
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill timed-out process");
                    }
                }
            }
            None
        }
    };

    let (stdout, out_truncated) = collect(stdout, kill_grace, max_output_bytes, "stdout", &mut warnings).await;
    let (stderr, err_truncated) = collect(stderr, kill_grace, max_output_bytes, "stderr", &mut warnings).await;

    let exit_code = if timed_out {
        None
    } else {
        match status {
            Some(s) => {
                if s.code().is_none() {
                    warnings.push("process terminated by a signal".into());
                }
                s.code()
            }
            None => {
                warnings.push("failed to wait for process".into());
                None
            }
        }
    };

    SandboxResult {
        exit_code,
        stdout,
        stderr,
        truncated: out_truncated || err_truncated,
        timed_out,
        warnings,
        duration: started.elapsed(),
    }
}

async fn collect(
    handle: Option<tokio::task::JoinHandle<std::io::Result<(Vec<u8>, bool)>>>,
    wait: Duration,
    max: usize,
    stream: &str,
    warnings: &mut Vec<String>,
) -> (String, bool) {
    let Some(mut handle) = handle else {
        return (String::new(), false);
    };
    let (bytes, overflowed) = match tokio::time::timeout(wait, &mut handle).await {
        Ok(Ok(Ok(captured))) => captured,
        Ok(Ok(Err(e))) => {
            warnings.push(format!("failed to read {stream}: {e}"));
            return (String::new(), false);
        }
        Ok(Err(e)) => {
            warnings.push(format!("{stream} reader failed: {e}"));
            return (String::new(), false);
        }
        Err(_) => {
            handle.abort();
            warnings.push(format!("{stream} still open after exit; output dropped"));
            return (String::new(), false);
        }
    };
    let (text, truncated) = decode_output(&bytes, overflowed, max);
    if truncated {
        warnings.push(format!("{stream} truncated at {max} bytes"));
    }
    (text, truncated)
}

/// Read everything, keeping at most `max + 1` bytes.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, max: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let keep = max.saturating_add(1);
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut overflowed = false;
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = keep.saturating_sub(buf.len());
        if room > 0 {
            buf.extend_from_slice(&chunk[..n.min(room)]);
        }
        if n > room {
            overflowed = true;
        }
    }
    Ok((buf, overflowed))
}

/// True when a NUL byte appears in the leading window.
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_BYTES).any(|b| *b == 0)
}

/// Cut `bytes` to at most `max` bytes without splitting a UTF-8 sequence.
pub fn truncate_utf8(bytes: &[u8], max: usize) -> (String, bool) {
    if bytes.len() <= max {
        return (String::from_utf8_lossy(bytes).into_owned(), false);
    }
    let mut end = max;
    // Step back over continuation bytes (0b10xx_xxxx) to a sequence start.
    while end > 0 && (bytes[end] & 0xC0) == 0x80 {
        end -= 1;
    }
    (String::from_utf8_lossy(&bytes[..end]).into_owned(), true)
}

fn decode_output(bytes: &[u8], overflowed: bool, max: usize) -> (String, bool) {
    if looks_binary(bytes) {
        let size = if overflowed {
            format!("more than {max}")
        } else {
            bytes.len().to_string()
        };
        return (format!("[binary output omitted: {size} bytes]"), overflowed);
    }
    let (text, truncated) = truncate_utf8(bytes, max);
    (text, truncated || overflowed)
}
