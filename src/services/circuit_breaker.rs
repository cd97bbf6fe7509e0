//! Consecutive-failure circuit breaker for workspace provisioning.
//!
//! Counts failed operations in a row. Once the count reaches the threshold the
//! circuit is open and [`CircuitBreaker::should_fail_fast`] returns true, so
//! callers stop provisioning instead of degrading slowly. Any success closes
//! the circuit and resets the count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::warn;

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
        }
    }
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Operations are attempted normally.
    Closed,
    /// Too many consecutive failures; callers should stop.
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
        }
    }
}

/// A failure record for diagnostics.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub error: String,
}

#[derive(Debug, Default)]
struct BreakerInner {
    consecutive_failures: u32,
    last_failure: Option<FailureRecord>,
    open_count: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record a failure.
    pub fn record_failure(&self, error: impl Into<String>) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(FailureRecord {
            timestamp: Utc::now(),
            error: error.into(),
        });
        if inner.consecutive_failures == self.config.failure_threshold {
            inner.open_count += 1;
            warn!(
                failures = inner.consecutive_failures,
                "Circuit breaker opened after consecutive failures"
            );
        }
    }

    /// Record a success, closing the circuit.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.last_failure = None;
    }

    pub fn state(&self) -> CircuitState {
        if self.lock().consecutive_failures >= self.config.failure_threshold {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn should_fail_fast(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn last_failure(&self) -> Option<FailureRecord> {
        self.lock().last_failure.clone()
    }

    /// Total times the circuit has opened.
    pub fn open_count(&self) -> u32 {
        self.lock().open_count
    }
}
