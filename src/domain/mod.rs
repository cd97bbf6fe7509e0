//! Domain layer for the dispatch engine
//!
//! This module contains the core models, error types and port traits.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{
    DispatchError, DispatchResult, RegistryError, SessionError, ValidationError, WorkspaceError,
};
