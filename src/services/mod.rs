//! Service layer module
//!
//! Business logic of the dispatch engine:
//! - Dispatcher: validation, provisioning, batched execution and reporting
//! - SwarmController: event-driven runs with wait and abort
//! - State machine, event bus and task tracker
//! - Worktree manager and sandbox builder/executor
//! - Session poller, run registry, task logs and tool gate

pub mod circuit_breaker;
pub mod dispatcher;
pub mod event_bus;
pub mod run_registry;
pub mod sandbox;
pub mod session_poller;
pub mod state_machine;
pub mod swarm_controller;
pub mod task_log;
pub mod task_tracker;
pub mod tool_gate;
pub mod worktree_manager;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use dispatcher::{DispatchOptions, Dispatcher};
pub use event_bus::{EventBus, EventBusConfig, EventBusError, EventPayload, ListenerId, SwarmEvent};
pub use run_registry::RunRegistry;
pub use sandbox::{SandboxDetector, SandboxExecutor};
pub use session_poller::{PollOptions, PollOutcome, SessionPoller};
pub use swarm_controller::SwarmController;
pub use task_tracker::TaskTracker;
pub use tool_gate::{SessionBinding, ToolGate, ToolGateError};
pub use worktree_manager::{WorktreeManager, WorktreeManagerConfig};
