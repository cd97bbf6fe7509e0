//! OS-level sandboxing: backend detection, profile generation and execution.

pub mod detect;
pub mod executor;
pub mod profile;

pub use detect::{BackendProbe, FixedProbe, SandboxDetector, SystemProbe};
pub use executor::{SandboxExecutor, MAX_OUTPUT_BYTES};
pub use profile::{build_profile, SandboxConfig, SandboxPaths};
