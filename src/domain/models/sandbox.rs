//! Sandbox descriptor and execution result models.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// OS-level confinement backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxBackend {
    /// Linux namespace sandbox via `bwrap`.
    Bubblewrap,
    /// macOS declarative sandbox via `sandbox-exec`.
    Seatbelt,
    /// No backend available.
    None,
}

impl SandboxBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bubblewrap => "bubblewrap",
            Self::Seatbelt => "seatbelt",
            Self::None => "none",
        }
    }
}

impl fmt::Display for SandboxBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named security profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityProfile {
    /// No network, writes confined to the workspace and temp directory.
    #[default]
    Default,
    /// No filesystem writes anywhere.
    Readonly,
    /// Like `Default` but with network access.
    NetworkAllow,
}

impl SecurityProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Readonly => "readonly",
            Self::NetworkAllow => "network-allow",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "default" => Some(Self::Default),
            "readonly" | "read-only" => Some(Self::Readonly),
            "network-allow" | "network_allow" => Some(Self::NetworkAllow),
            _ => None,
        }
    }

    pub fn denies_network(&self) -> bool {
        !matches!(self, Self::NetworkAllow)
    }

    pub fn allows_writes(&self) -> bool {
        !matches!(self, Self::Readonly)
    }
}

impl fmt::Display for SecurityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved confinement for one task.
///
/// `enforced` is false only when no backend exists; the executor refuses to
/// run anything under such a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxDescriptor {
    pub backend: SandboxBackend,
    pub profile: SecurityProfile,
    pub workspace_root: PathBuf,
    pub enforced: bool,
}

impl SandboxDescriptor {
    pub fn new(backend: SandboxBackend, profile: SecurityProfile, workspace_root: PathBuf) -> Self {
        Self {
            backend,
            profile,
            workspace_root,
            enforced: backend != SandboxBackend::None,
        }
    }
}

/// Outcome of a sandboxed command. Failures are reported here, never as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResult {
    /// Exit code, `None` when the command was refused, failed to spawn or was killed.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// True when either stream hit the byte ceiling.
    pub truncated: bool,
    pub timed_out: bool,
    pub warnings: Vec<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl SandboxResult {
    /// A result for a command that never ran.
    pub fn refused(warning: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
            timed_out: false,
            warnings: vec![warning.into()],
            duration: Duration::ZERO,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
