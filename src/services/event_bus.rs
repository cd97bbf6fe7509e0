//! EventBus service for dispatch lifecycle events.
//!
//! Provides synchronous fan-out to registered listeners plus a broadcast
//! stream for async consumers, with per-bus sequence numbering. Listeners
//! observe; a listener that tries to publish from inside its callback is
//! rejected with [`EventBusError::ReentrantPublish`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::{ReportTotals, TaskRecord, TaskStatus};

/// Monotonically increasing sequence number assigned by EventBus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event envelope containing all event metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmEvent {
    pub id: Uuid,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub dispatch_id: String,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    DispatchStarted {
        task_count: usize,
    },
    /// Emitted exactly once per applied transition.
    TaskStatusChanged {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
        record: Box<TaskRecord>,
    },
    /// The latest assistant text of a session changed.
    TaskOutput {
        task_id: String,
        text: String,
    },
    BatchCompleted {
        batch_index: usize,
        task_ids: Vec<String>,
    },
    DispatchCompleted {
        totals: ReportTotals,
    },
}

impl EventPayload {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskStatusChanged { task_id, .. } | Self::TaskOutput { task_id, .. } => {
                Some(task_id)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Listener attempted to publish from inside an event callback")]
    ReentrantPublish,

    #[error("Listener capacity reached ({max})")]
    ListenerCapacity { max: usize },
}

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel.
    pub channel_capacity: usize,
    /// Maximum number of synchronous listeners.
    pub max_listeners: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            max_listeners: 64,
        }
    }
}

/// Handle returned by [`EventBus::subscribe_fn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SwarmEvent) + Send + Sync>;

thread_local! {
    static DISPATCH_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Marks the current thread as delivering events until dropped.
struct DeliveryGuard;

impl DeliveryGuard {
    fn enter() -> Result<Self, EventBusError> {
        DISPATCH_DEPTH.with(|depth| {
            if depth.get() > 0 {
                return Err(EventBusError::ReentrantPublish);
            }
            depth.set(depth.get() + 1);
            Ok(Self)
        })
    }
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Central event bus. Constructed per dispatch engine; there is no global instance.
pub struct EventBus {
    sender: broadcast::Sender<SwarmEvent>,
    sequence: AtomicU64,
    next_listener: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    config: EventBusConfig,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventBus {
    /// Create a new EventBus with the given configuration.
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
            next_listener: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Publish an event to every listener, then to the broadcast stream.
    ///
    /// Listeners run synchronously on the calling thread, in registration
    /// order, against a snapshot of the listener list.
    pub fn publish(
        &self,
        dispatch_id: &str,
        payload: EventPayload,
    ) -> Result<SwarmEvent, EventBusError> {
        let _guard = DeliveryGuard::enter()?;

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let event = SwarmEvent {
            id: Uuid::new_v4(),
            sequence: SequenceNumber(seq),
            timestamp: Utc::now(),
            dispatch_id: dispatch_id.to_string(),
            payload,
        };

        let snapshot: Vec<Listener> = match self.listeners.read() {
            Ok(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(_, l)| Arc::clone(l))
                .collect(),
        };
        for listener in snapshot {
            listener(&event);
        }

        // No receivers is not an error
        let _ = self.sender.send(event.clone());
        Ok(event)
    }

    /// Register a synchronous listener.
    pub fn subscribe_fn<F>(&self, listener: F) -> Result<ListenerId, EventBusError>
    where
        F: Fn(&SwarmEvent) + Send + Sync + 'static,
    {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if listeners.len() >= self.config.max_listeners {
            tracing::warn!(
                max = self.config.max_listeners,
                "Event listener capacity reached"
            );
            return Err(EventBusError::ListenerCapacity {
                max: self.config.max_listeners,
            });
        }
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        listeners.push((id, Arc::new(listener)));
        Ok(id)
    }

    /// Remove a listener. Returns whether it was registered; safe to repeat.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .map(|l| l.len())
            .unwrap_or_else(|p| p.into_inner().len())
    }
}
