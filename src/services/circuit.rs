//! Circuit breaker for the generation provider.
//!
//! Closed until `failure_threshold` consecutive transient failures (or one
//! non-transient failure via [`CircuitBreaker::trip`]), then open for the
//! cooldown. The first call after the cooldown runs half-open; enough
//! successful probes close the circuit again, any failure reopens it.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Consecutive successes required to close from half-open.
    pub success_threshold: u32,
    pub open_cooldown: Duration,
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn new(failure_threshold: u32, success_threshold: u32, open_cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            open_cooldown,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(3, 1, Duration::from_secs(30))
    }
}

#[derive(Debug, Clone)]
enum CircuitState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { successes: u32 },
}

/// Public-facing circuit state for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub state: CircuitStateKind,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub cooldown_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
        }
    }

    /// Check whether a call may proceed. `Err` carries the remaining
    /// cooldown while the circuit is open.
    pub fn allow(&mut self) -> Result<(), Duration> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen { .. } => Ok(()),
            CircuitState::Open { opened_at } => {
                let elapsed = opened_at.elapsed();
                if elapsed >= self.config.open_cooldown {
                    self.state = CircuitState::HalfOpen { successes: 0 };
                    info!(circuit = %self.name, "circuit half-open after cooldown");
                    Ok(())
                } else {
                    Err(self.config.open_cooldown - elapsed)
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => self.consecutive_failures = 0,
            CircuitState::HalfOpen { successes } => {
                let successes = successes + 1;
                if successes >= self.config.success_threshold {
                    self.consecutive_failures = 0;
                    self.state = CircuitState::Closed;
                    info!(circuit = %self.name, "circuit closed after successful probe");
                } else {
                    self.state = CircuitState::HalfOpen { successes };
                }
            }
            // A call admitted before the circuit opened.
            CircuitState::Open { .. } => {}
        }
    }

    /// Record a transient failure.
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.open("consecutive failures");
                }
            }
            CircuitState::HalfOpen { .. } => self.open("half-open probe failed"),
            CircuitState::Open { .. } => {}
        }
    }

    /// Open the circuit immediately, for failures that retrying cannot fix.
    pub fn trip(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if !matches!(self.state, CircuitState::Open { .. }) {
            self.open("non-transient failure");
        }
    }

    fn open(&mut self, reason: &str) {
        self.state = CircuitState::Open {
            opened_at: Instant::now(),
        };
        warn!(
            circuit = %self.name,
            failures = self.consecutive_failures,
            threshold = self.config.failure_threshold,
            cooldown_ms = self.config.open_cooldown.as_millis() as u64,
            reason,
            "circuit opened"
        );
    }

    #[must_use]
    pub fn status(&self) -> CircuitBreakerStatus {
        let (state, cooldown_remaining_ms) = match self.state {
            CircuitState::Closed => (CircuitStateKind::Closed, None),
            CircuitState::HalfOpen { .. } => (CircuitStateKind::HalfOpen, None),
            CircuitState::Open { opened_at } => (
                CircuitStateKind::Open,
                Some(
                    self.config
                        .open_cooldown
                        .saturating_sub(opened_at.elapsed())
                        .as_millis() as u64,
                ),
            ),
        };
        CircuitBreakerStatus {
            state,
            consecutive_failures: self.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            cooldown_remaining_ms,
        }
    }
}
