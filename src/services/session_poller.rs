//! Polls a remote session until it goes idle, errors, times out or is cancelled.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::domain::models::{latest_assistant_text, SessionState};
use crate::domain::ports::SessionClient;

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
    /// Consecutive polls a session may be absent (or the status call may
    /// fail) before giving up.
    pub missing_retries: u32,
    /// Fetch the latest assistant message after every poll.
    pub capture_latest_message: bool,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            timeout: Duration::from_secs(1800),
            missing_retries: 3,
            capture_latest_message: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    Timeout,
    Error(String),
    Cancelled,
}

pub struct SessionPoller {
    client: Arc<dyn SessionClient>,
    options: PollOptions,
}

impl SessionPoller {
    pub fn new(client: Arc<dyn SessionClient>, options: PollOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &PollOptions {
        &self.options
    }

    /// Wait for `session_id` to become idle.
    ///
    /// When message capture is on, `on_message` receives the latest assistant
    /// text each time it differs from the previous observation. On deadline the
    /// session is aborted once, best effort.
    #[instrument(skip(self, cancel, on_message), fields(timeout_ms = self.options.timeout.as_millis() as u64))]
    pub async fn wait_for_idle<F>(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
        mut on_message: F,
    ) -> PollOutcome
    where
        F: FnMut(String) + Send,
    {
        let deadline = Instant::now() + self.options.timeout;
        let mut misses: u32 = 0;
        let mut last_text: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return PollOutcome::Cancelled;
            }

            let mut idle = false;
            match self.client.status().await {
                Ok(statuses) => match statuses.get(session_id) {
                    None => {
                        misses += 1;
                        debug!(misses, "Session absent from status map");
                        if misses > self.options.missing_retries {
                            return PollOutcome::Error(format!("session {session_id} not found"));
                        }
                    }
                    Some(entry) => {
                        misses = 0;
                        if let Some(ref err) = entry.error {
                            if entry.state != SessionState::Retry {
                                return PollOutcome::Error(err.clone());
                            }
                            debug!(error = %err, "Session retrying");
                        }
                        idle = entry.state == SessionState::Idle;
                    }
                },
                Err(e) => {
                    misses += 1;
                    warn!(error = %e, misses, "Session status poll failed");
                    if misses > self.options.missing_retries {
                        return PollOutcome::Error(e.to_string());
                    }
                }
            }

            if self.options.capture_latest_message {
                match self.client.list_messages(session_id).await {
                    Ok(messages) => {
                        if let Some(text) = latest_assistant_text(&messages) {
                            if last_text.as_deref() != Some(text.as_str()) {
                                last_text = Some(text.clone());
                                on_message(text);
                            }
                        }
                    }
                    Err(e) => debug!(error = %e, "Failed to fetch latest message"),
                }
            }

            if idle {
                return PollOutcome::Idle;
            }

            let now = Instant::now();
            if now >= deadline {
                if let Err(e) = self.client.abort(session_id).await {
                    warn!(error = %e, "Failed to abort timed out session");
                }
                return PollOutcome::Timeout;
            }

            let nap = self.options.interval.min(deadline - now);
            tokio::select! {
                () = cancel.cancelled() => return PollOutcome::Cancelled,
                () = tokio::time::sleep(nap) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::SessionError;
    use crate::domain::models::{
        MessagePart, MessageRole, PromptOptions, SessionMessage, SessionStatusEntry,
    };
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a script of status entries; the last one repeats.
    struct ScriptedClient {
        script: Mutex<VecDeque<Option<SessionStatusEntry>>>,
        messages: Mutex<VecDeque<Vec<SessionMessage>>>,
        aborts: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(script: Vec<Option<SessionStatusEntry>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                messages: Mutex::new(VecDeque::new()),
                aborts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SessionClient for ScriptedClient {
        async fn create_session(&self, _: &str, _: Option<&str>) -> Result<String, SessionError> {
            Ok("s".into())
        }
        async fn prompt(&self, _: &str, _: Vec<MessagePart>, _: PromptOptions) -> Result<(), SessionError> {
            Ok(())
        }
        async fn status(&self) -> Result<HashMap<String, SessionStatusEntry>, SessionError> {
            let mut script = self.script.lock().unwrap();
            let entry = if script.len() > 1 {
                script.pop_front().flatten()
            } else {
                script.front().cloned().flatten()
            };
            Ok(entry.map(|e| HashMap::from([("s".to_string(), e)])).unwrap_or_default())
        }
        async fn abort(&self, _: &str) -> Result<(), SessionError> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn list_messages(&self, _: &str) -> Result<Vec<SessionMessage>, SessionError> {
            let mut queue = self.messages.lock().unwrap();
            Ok(if queue.len() > 1 {
                queue.pop_front().unwrap_or_default()
            } else {
                queue.front().cloned().unwrap_or_default()
            })
        }
    }

    fn options(timeout_ms: u64) -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(timeout_ms),
            missing_retries: 2,
            capture_latest_message: false,
        }
    }

    #[tokio::test]
    async fn test_busy_then_idle() {
        let client = ScriptedClient::new(vec![
            Some(SessionStatusEntry::busy()),
            Some(SessionStatusEntry::busy()),
            Some(SessionStatusEntry::idle()),
        ]);
        let poller = SessionPoller::new(client.clone(), options(5_000));
        let outcome = poller
            .wait_for_idle("s", &CancellationToken::new(), |_| {})
            .await;
        assert_eq!(outcome, PollOutcome::Idle);
        assert_eq!(client.aborts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_session_becomes_error() {
        let client = ScriptedClient::new(vec![None]);
        let poller = SessionPoller::new(client, options(5_000));
        let outcome = poller
            .wait_for_idle("s", &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(outcome, PollOutcome::Error(ref m) if m.contains("not found")));
    }

    #[tokio::test]
    async fn test_transient_absence_is_tolerated() {
        let client = ScriptedClient::new(vec![
            None,
            None,
            Some(SessionStatusEntry::busy()),
            None,
            Some(SessionStatusEntry::idle()),
        ]);
        let poller = SessionPoller::new(client, options(5_000));
        assert_eq!(
            poller.wait_for_idle("s", &CancellationToken::new(), |_| {}).await,
            PollOutcome::Idle
        );
    }

    #[tokio::test]
    async fn test_entry_error_returned_immediately() {
        let client = ScriptedClient::new(vec![Some(SessionStatusEntry::failed("model overloaded"))]);
        let poller = SessionPoller::new(client, options(5_000));
        assert_eq!(
            poller.wait_for_idle("s", &CancellationToken::new(), |_| {}).await,
            PollOutcome::Error("model overloaded".into())
        );
    }

    #[tokio::test]
    async fn test_timeout_aborts_once() {
        let client = ScriptedClient::new(vec![Some(SessionStatusEntry::busy())]);
        let poller = SessionPoller::new(client.clone(), options(60));
        assert_eq!(
            poller.wait_for_idle("s", &CancellationToken::new(), |_| {}).await,
            PollOutcome::Timeout
        );
        assert_eq!(client.aborts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let client = ScriptedClient::new(vec![Some(SessionStatusEntry::busy())]);
        let poller = SessionPoller::new(client.clone(), options(60_000));
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });
        assert_eq!(
            poller.wait_for_idle("s", &token, |_| {}).await,
            PollOutcome::Cancelled
        );
        assert_eq!(client.aborts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_message_callback_only_on_change() {
        let client = ScriptedClient::new(vec![
            Some(SessionStatusEntry::busy()),
            Some(SessionStatusEntry::busy()),
            Some(SessionStatusEntry::busy()),
            Some(SessionStatusEntry::idle()),
        ]);
        *client.messages.lock().unwrap() = VecDeque::from(vec![
            vec![SessionMessage::assistant("one")],
            vec![SessionMessage::assistant("one")],
            vec![SessionMessage::assistant("two")],
            vec![SessionMessage::assistant("two")],
        ]);
        let mut opts = options(5_000);
        opts.capture_latest_message = true;
        let poller = SessionPoller::new(client, opts);

        let mut seen = Vec::new();
        let outcome = poller
            .wait_for_idle("s", &CancellationToken::new(), |t| seen.push(t))
            .await;
        assert_eq!(outcome, PollOutcome::Idle);
        assert_eq!(seen, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_tool_only_tail_does_not_hide_streamed_text() {
        let client = ScriptedClient::new(vec![
            Some(SessionStatusEntry::busy()),
            Some(SessionStatusEntry::idle()),
        ]);
        let tool_step = SessionMessage {
            role: MessageRole::Assistant,
            parts: vec![MessagePart::tool("c1", "edit", serde_json::json!({}))],
            tokens: None,
        };
        *client.messages.lock().unwrap() =
            VecDeque::from(vec![vec![SessionMessage::assistant("planning"), tool_step]]);
        let mut opts = options(5_000);
        opts.capture_latest_message = true;
        let poller = SessionPoller::new(client, opts);

        let mut seen = Vec::new();
        poller
            .wait_for_idle("s", &CancellationToken::new(), |t| seen.push(t))
            .await;
        assert_eq!(seen, vec!["planning".to_string()]);
    }
}
