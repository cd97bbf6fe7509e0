//! Infrastructure layer module
//!
//! Adapters and external integrations:
//! - Configuration management (figment)
//! - Logging, audit trail and secret scrubbing
//! - HTTP agent session client
//! - Process execution
//! - Atomic file helpers
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod config;
pub mod fs;
pub mod logging;
pub mod session;
pub mod shell;

pub use session::HttpSessionClient;
pub use shell::TokioShellRunner;
