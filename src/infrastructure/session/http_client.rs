use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::domain::errors::SessionError;
use crate::domain::models::{
    MessagePart, MessageRole, PromptOptions, SessionMessage, SessionServerConfig,
    SessionStatusEntry, TokenUsage,
};
use crate::domain::ports::SessionClient;

/// HTTP client for an agent session server
///
/// Endpoints used:
/// - `POST /session` creates a session, optionally under a parent
/// - `POST /session/{id}/prompt_async` queues a message and returns immediately
/// - `GET /session/status` returns the status of every busy or idle session
/// - `POST /session/{id}/abort` stops the session
/// - `GET /session/{id}/message` lists the transcript
pub struct HttpSessionClient {
    http_client: ReqwestClient,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    title: &'a str,
    #[serde(rename = "parentID", skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PromptRequest<'a> {
    parts: &'a [MessagePart],
    #[serde(skip_serializing_if = "Option::is_none")]
    agent: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    no_reply: bool,
}

/// Transcript entries come either wrapped (`{info, parts}`) or flat.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireMessage {
    Wrapped {
        info: WireInfo,
        #[serde(default)]
        parts: Vec<MessagePart>,
    },
    Flat(SessionMessage),
}

#[derive(Debug, Deserialize)]
struct WireInfo {
    role: MessageRole,
    #[serde(default)]
    tokens: Option<TokenUsage>,
}

impl From<WireMessage> for SessionMessage {
    fn from(wire: WireMessage) -> Self {
        match wire {
            WireMessage::Wrapped { info, parts } => Self {
                role: info.role,
                parts,
                tokens: info.tokens,
            },
            WireMessage::Flat(message) => message,
        }
    }
}

impl HttpSessionClient {
    /// Create a client for the configured session server
    pub fn new(config: &SessionServerConfig) -> Result<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map non-success responses to `SessionError`.
    async fn check(response: Response, session_id: Option<&str>) -> Result<Response, SessionError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            if let Some(id) = session_id {
                return Err(SessionError::NotFound(id.to_string()));
            }
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        Err(SessionError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

fn transport(err: reqwest::Error) -> SessionError {
    SessionError::Transport(err.to_string())
}

fn decode(err: reqwest::Error) -> SessionError {
    SessionError::Decode(err.to_string())
}

#[async_trait]
impl SessionClient for HttpSessionClient {
    #[instrument(skip(self), err)]
    async fn create_session(
        &self,
        title: &str,
        parent_id: Option<&str>,
    ) -> Result<String, SessionError> {
        let response = self
            .http_client
            .post(self.url("/session"))
            .json(&CreateSessionRequest { title, parent_id })
            .send()
            .await
            .map_err(transport)?;
        let created: CreateSessionResponse = Self::check(response, None)
            .await?
            .json()
            .await
            .map_err(decode)?;
        debug!(session_id = %created.id, "Session created");
        Ok(created.id)
    }

    #[instrument(skip(self, parts), fields(parts = parts.len()), err)]
    async fn prompt(
        &self,
        session_id: &str,
        parts: Vec<MessagePart>,
        options: PromptOptions,
    ) -> Result<(), SessionError> {
        let body = PromptRequest {
            parts: &parts,
            agent: options.agent.as_deref(),
            no_reply: options.no_reply,
        };
        let response = self
            .http_client
            .post(self.url(&format!("/session/{session_id}/prompt_async")))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        Self::check(response, Some(session_id)).await?;
        Ok(())
    }

    async fn status(&self) -> Result<HashMap<String, SessionStatusEntry>, SessionError> {
        let response = self
            .http_client
            .get(self.url("/session/status"))
            .send()
            .await
            .map_err(transport)?;
        Self::check(response, None).await?.json().await.map_err(decode)
    }

    #[instrument(skip(self), err)]
    async fn abort(&self, session_id: &str) -> Result<(), SessionError> {
        let response = self
            .http_client
            .post(self.url(&format!("/session/{session_id}/abort")))
            .send()
            .await
            .map_err(transport)?;
        Self::check(response, Some(session_id)).await?;
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<SessionMessage>, SessionError> {
        let response = self
            .http_client
            .get(self.url(&format!("/session/{session_id}/message")))
            .send()
            .await
            .map_err(transport)?;
        let wire: Vec<WireMessage> = Self::check(response, Some(session_id))
            .await?
            .json()
            .await
            .map_err(decode)?;
        Ok(wire.into_iter().map(SessionMessage::from).collect())
    }
}
