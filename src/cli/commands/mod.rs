//! CLI command implementations.

pub mod dispatch;
pub mod sandbox;
pub mod status;
pub mod worktree;
