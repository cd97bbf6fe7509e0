//! Remote agent session port.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::errors::SessionError;
use crate::domain::models::{MessagePart, PromptOptions, SessionMessage, SessionStatusEntry};

/// Client for the remote agent session service.
///
/// Sessions are opaque: the engine creates them, injects messages, watches
/// their status and reads back the transcript.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Create a session, optionally nested under a parent session.
    async fn create_session(
        &self,
        title: &str,
        parent_id: Option<&str>,
    ) -> Result<String, SessionError>;

    /// Send a message. Returns once the message is accepted, not when it is answered.
    async fn prompt(
        &self,
        session_id: &str,
        parts: Vec<MessagePart>,
        options: PromptOptions,
    ) -> Result<(), SessionError>;

    /// Status of every known session.
    async fn status(&self) -> Result<HashMap<String, SessionStatusEntry>, SessionError>;

    /// Abort whatever the session is doing.
    async fn abort(&self, session_id: &str) -> Result<(), SessionError>;

    /// Transcript in chronological order.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<SessionMessage>, SessionError>;
}
