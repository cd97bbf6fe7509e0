//! Types exchanged with the remote agent session service.

use serde::{Deserialize, Serialize};

/// Status of a remote session as reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Busy,
    Retry,
    #[serde(other)]
    Unknown,
}

/// One entry of the session status map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusEntry {
    #[serde(rename = "type")]
    pub state: SessionState,
    #[serde(default, alias = "message")]
    pub error: Option<String>,
}

impl SessionStatusEntry {
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            error: None,
        }
    }

    pub fn busy() -> Self {
        Self {
            state: SessionState::Busy,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: SessionState::Busy,
            error: Some(error.into()),
        }
    }
}

/// Part of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    Text {
        text: String,
    },
    /// A tool the agent invoked while producing the message.
    Tool {
        #[serde(rename = "callID", default)]
        call_id: String,
        tool: String,
        #[serde(default)]
        state: ToolState,
    },
    #[serde(other)]
    Other,
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::Tool {
            call_id: call_id.into(),
            tool: tool.into(),
            state: ToolState {
                status: "completed".into(),
                input,
            },
        }
    }
}

/// Progress and arguments of a tool part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// A tool invocation lifted out of a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub call_id: String,
    pub tool: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    #[serde(other)]
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
}

/// A message in a session transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    pub tokens: Option<TokenUsage>,
}

impl SessionMessage {
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            parts: vec![MessagePart::text(text)],
            tokens: None,
        }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::Tool { .. } | MessagePart::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Text of the most recent assistant message that has any.
///
/// Trailing assistant messages made only of tool or step parts are skipped.
pub fn latest_assistant_text(messages: &[SessionMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == MessageRole::Assistant)
        .map(SessionMessage::text)
        .find(|t| !t.trim().is_empty())
}

/// Every tool invocation made by the assistant, in transcript order.
pub fn tool_calls(messages: &[SessionMessage]) -> Vec<ToolCall> {
    messages
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .flat_map(|m| &m.parts)
        .filter_map(|p| match p {
            MessagePart::Tool {
                call_id,
                tool,
                state,
            } => Some(ToolCall {
                call_id: call_id.clone(),
                tool: tool.clone(),
                input: state.input.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Options for a prompt call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptOptions {
    pub agent: Option<String>,
    /// Deliver the message without asking for a reply.
    pub no_reply: bool,
}
