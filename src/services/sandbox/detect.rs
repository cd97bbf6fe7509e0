//! Sandbox backend detection.
//!
//! Detection runs once per [`SandboxDetector`] and is cached. The detector is
//! an ordinary value, so tests can build one with a fixed backend.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::domain::models::{SandboxBackend, SandboxDescriptor, SecurityProfile};

/// Location of the macOS sandbox launcher.
pub const SANDBOX_EXEC: &str = "/usr/bin/sandbox-exec";

/// Finds out which backend the host supports.
#[async_trait]
pub trait BackendProbe: Send + Sync {
    async fn probe(&self) -> SandboxBackend;
}

/// Probes the real host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

#[async_trait]
impl BackendProbe for SystemProbe {
    async fn probe(&self) -> SandboxBackend {
        if cfg!(target_os = "linux") {
            if bubblewrap_works().await {
                return SandboxBackend::Bubblewrap;
            }
        } else if cfg!(target_os = "macos") && Path::new(SANDBOX_EXEC).exists() {
            return SandboxBackend::Seatbelt;
        }
        SandboxBackend::None
    }
}

/// `bwrap` must both exist and be able to create namespaces here.
async fn bubblewrap_works() -> bool {
    let status = Command::new("bwrap")
        .args(["--ro-bind", "/", "/", "--dev", "/dev", "true"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(s) if s.success() => true,
        Ok(s) => {
            warn!(code = ?s.code(), "bwrap is installed but cannot create a sandbox");
            false
        }
        Err(_) => false,
    }
}

/// Always reports the same backend.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub SandboxBackend);

#[async_trait]
impl BackendProbe for FixedProbe {
    async fn probe(&self) -> SandboxBackend {
        self.0
    }
}

pub struct SandboxDetector {
    probe: Arc<dyn BackendProbe>,
    cached: OnceCell<SandboxBackend>,
}

impl SandboxDetector {
    pub fn new(probe: Arc<dyn BackendProbe>) -> Self {
        Self {
            probe,
            cached: OnceCell::new(),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemProbe))
    }

    pub fn fixed(backend: SandboxBackend) -> Self {
        Self::new(Arc::new(FixedProbe(backend)))
    }

    /// The detected backend; probes on first call only.
    pub async fn backend(&self) -> SandboxBackend {
        *self
            .cached
            .get_or_init(|| async {
                let backend = self.probe.probe().await;
                info!(%backend, "Sandbox backend detected");
                backend
            })
            .await
    }

    /// Descriptor for a workspace, with an absolute root.
    pub async fn descriptor(
        &self,
        profile: SecurityProfile,
        workspace_root: &Path,
    ) -> SandboxDescriptor {
        SandboxDescriptor::new(self.backend().await, profile, absolute(workspace_root))
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}
