//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that infrastructure adapters must implement:
//! - SessionClient: remote agent session operations
//! - ShellRunner: external process execution (git and friends)
//!
//! These traits keep the engine independent of the concrete transport and
//! let tests substitute scripted implementations.

pub mod session_client;
pub mod shell;

pub use session_client::SessionClient;
pub use shell::{CommandOutput, ShellRunner};
