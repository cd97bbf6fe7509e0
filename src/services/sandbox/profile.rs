//! Sandbox profile generation.
//!
//! [`build_profile`] is pure: given a backend, a named security profile and a
//! set of resolved paths it returns the backend-specific configuration.
//! [`SandboxPaths::discover`] does the filesystem probing that feeds it.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::domain::models::{SandboxBackend, SecurityProfile};

/// Credential directories hidden from sandboxed processes, relative to home.
pub const SENSITIVE_HOME_DIRS: &[&str] = &[
    ".ssh",
    ".aws",
    ".azure",
    ".gnupg",
    ".docker",
    ".kube",
    ".config/gcloud",
    ".config/gh",
];

/// Version-control configuration files that must stay unwritable, relative to home.
pub const VCS_CONFIG_FILES: &[&str] = &[".gitconfig", ".config/git", ".hgrc"];

/// Privilege-escalation binaries blocked in every profile.
pub const ESCALATION_BINARIES: &[&str] = &[
    "/usr/bin/sudo",
    "/bin/sudo",
    "/usr/bin/su",
    "/bin/su",
    "/usr/bin/doas",
    "/usr/bin/pkexec",
    "/usr/bin/runuser",
    "/usr/sbin/runuser",
];

/// How deep `.env*` discovery descends into a workspace.
const ENV_SCAN_DEPTH: usize = 6;

/// Filesystem locations a profile is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxPaths {
    pub workspace_root: PathBuf,
    pub temp_dir: PathBuf,
    pub home_dir: Option<PathBuf>,
    /// Directories whose contents must be unreadable.
    pub sensitive_dirs: Vec<PathBuf>,
    /// `.env*` files inside the workspace.
    pub env_files: Vec<PathBuf>,
    pub vcs_config_files: Vec<PathBuf>,
    pub escalation_binaries: Vec<PathBuf>,
}

impl SandboxPaths {
    /// Resolve paths for a workspace on the current machine.
    ///
    /// Only locations that exist are returned, since bind-mounting over a
    /// missing path would fail the whole sandbox.
    pub fn discover(workspace_root: &Path) -> Self {
        let home_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .filter(|h| h.is_dir());
        let temp_dir = std::fs::canonicalize(std::env::temp_dir())
            .unwrap_or_else(|_| std::env::temp_dir());

        let under_home = |rel: &&str| home_dir.as_ref().map(|h| h.join(rel));
        let sensitive_dirs = SENSITIVE_HOME_DIRS
            .iter()
            .filter_map(under_home)
            .filter(|p| p.is_dir())
            .collect();
        let vcs_config_files = VCS_CONFIG_FILES
            .iter()
            .filter_map(under_home)
            .filter(|p| p.exists())
            .collect();
        let escalation_binaries = ESCALATION_BINARIES
            .iter()
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .collect();

        Self {
            workspace_root: workspace_root.to_path_buf(),
            temp_dir,
            home_dir,
            sensitive_dirs,
            env_files: find_env_files(workspace_root),
            vcs_config_files,
            escalation_binaries,
        }
    }
}

/// `.env`, `.env.local` and friends below `root`, skipping VCS and dependency dirs.
pub fn find_env_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .max_depth(ENV_SCAN_DEPTH)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !(e.file_type().is_dir() && matches!(name.as_ref(), ".git" | "node_modules" | "target"))
        })
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_env_file_name(&e.file_name().to_string_lossy()))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// `.env`, `.env.local`, `.envrc`, `.env_prod` and the like.
fn is_env_file_name(name: &str) -> bool {
    name.starts_with(".env")
}

/// Backend-specific sandbox configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxConfig {
    /// Arguments for `bwrap`, up to but excluding the `--` separator.
    Bubblewrap { args: Vec<String> },
    /// SBPL profile text for `sandbox-exec -p`.
    Seatbelt { profile: String },
    /// No backend; callers must refuse to execute.
    Unconfined,
}

pub fn build_profile(
    backend: SandboxBackend,
    profile: SecurityProfile,
    paths: &SandboxPaths,
) -> SandboxConfig {
    match backend {
        SandboxBackend::Bubblewrap => SandboxConfig::Bubblewrap {
            args: bubblewrap_args(profile, paths),
        },
        SandboxBackend::Seatbelt => SandboxConfig::Seatbelt {
            profile: seatbelt_profile(profile, paths),
        },
        SandboxBackend::None => SandboxConfig::Unconfined,
    }
}

fn push_all(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| (*s).to_string()));
}

fn path_str(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn bubblewrap_args(profile: SecurityProfile, paths: &SandboxPaths) -> Vec<String> {
    let mut args = Vec::new();
    let workspace = path_str(&paths.workspace_root);

    // Whole host read-only, then carve out writable areas.
    push_all(&mut args, &["--ro-bind", "/", "/"]);
    push_all(&mut args, &["--dev", "/dev", "--proc", "/proc"]);

    if profile.allows_writes() {
        let tmp = path_str(&paths.temp_dir);
        args.extend(["--bind".into(), workspace.clone(), workspace.clone()]);
        if tmp != workspace {
            args.extend(["--bind".into(), tmp.clone(), tmp]);
        }
        for file in &paths.vcs_config_files {
            let f = path_str(file);
            args.extend(["--ro-bind-try".into(), f.clone(), f]);
        }
    }

    for dir in &paths.sensitive_dirs {
        args.extend(["--tmpfs".into(), path_str(dir)]);
    }
    for file in &paths.env_files {
        args.extend(["--ro-bind".into(), "/dev/null".into(), path_str(file)]);
    }
    for bin in &paths.escalation_binaries {
        args.extend(["--ro-bind".into(), "/dev/null".into(), path_str(bin)]);
    }

    if profile.denies_network() {
        args.push("--unshare-net".into());
    }
    push_all(&mut args, &["--unshare-pid", "--die-with-parent", "--new-session"]);
    args.extend(["--chdir".into(), workspace]);
    args
}

/// Escape a string for an SBPL string literal.
fn sbpl_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn seatbelt_profile(profile: SecurityProfile, paths: &SandboxPaths) -> String {
    let mut sb = String::with_capacity(2048);
    let workspace = path_str(&paths.workspace_root);

    sb.push_str("(version 1)\n");
    sb.push_str("(allow default)\n\n");

    sb.push_str("; --- Filesystem writes ---\n");
    sb.push_str("(deny file-write*)\n");
    if profile.allows_writes() {
        sb.push_str(&format!(
            "(allow file-write* (subpath {}) (subpath {}))\n",
            sbpl_quote(&workspace),
            sbpl_quote(&path_str(&paths.temp_dir))
        ));
        sb.push_str("(allow file-write-data (literal \"/dev/null\") (regex #\"^/dev/tty\"))\n");
        for file in &paths.vcs_config_files {
            sb.push_str(&format!(
                "(deny file-write* (subpath {}))\n",
                sbpl_quote(&path_str(file))
            ));
        }
    }
    sb.push('\n');

    if !paths.sensitive_dirs.is_empty() {
        sb.push_str("; --- Credentials ---\n");
        for dir in &paths.sensitive_dirs {
            sb.push_str(&format!(
                "(deny file-read* (subpath {}))\n",
                sbpl_quote(&path_str(dir))
            ));
        }
        sb.push('\n');
    }

    sb.push_str("; --- Environment files ---\n");
    let env_regex = format!("^{}/(.*/)?\\.env[^/]*$", regex::escape(&workspace));
    sb.push_str(&format!("(deny file-read* (regex #{}))\n\n", sbpl_quote(&env_regex)));

    if profile.denies_network() {
        sb.push_str("; --- Network: DENIED ---\n");
        sb.push_str("(deny network*)\n\n");
    }

    sb.push_str("; --- Privilege escalation ---\n");
    let escalation: Vec<String> = if paths.escalation_binaries.is_empty() {
        ESCALATION_BINARIES.iter().map(|s| (*s).to_string()).collect()
    } else {
        paths.escalation_binaries.iter().map(|p| path_str(p)).collect()
    };
    sb.push_str("(deny process-exec");
    for bin in &escalation {
        sb.push_str(&format!("\n  (literal {})", sbpl_quote(bin)));
    }
    sb.push_str(")\n");

    sb
}
