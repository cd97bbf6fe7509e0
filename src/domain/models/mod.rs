//! Domain models.

pub mod config;
pub mod record;
pub mod report;
pub mod sandbox;
pub mod session;
pub mod swarm;
pub mod task;
pub mod workspace;

pub use config::{Config, IsolationMode, LoggingConfig, RotationPolicy, SessionServerConfig};
pub use record::{DiffStat, Divergence, RecordPatch, TaskRecord, TaskStatus};
pub use report::{DispatchReport, ReportTotals};
pub use sandbox::{SandboxBackend, SandboxDescriptor, SandboxResult, SecurityProfile};
pub use session::{
    latest_assistant_text, tool_calls, MessagePart, MessageRole, PromptOptions, SessionMessage,
    SessionState, SessionStatusEntry, TokenUsage, ToolCall, ToolState,
};
pub use swarm::{derive_status, SwarmState, SwarmStatus};
pub use task::{is_valid_task_id, Task, TaskPayload};
pub use workspace::{parse_worktree_list, WorkspaceInfo, WorktreeEntry};
