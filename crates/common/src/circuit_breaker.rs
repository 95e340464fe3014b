//! Circuit breaker for fast-failing calls to an unhealthy downstream service.
//!
//! Implements the three-state circuit breaker pattern:
//!
//! ```text
//! ┌────────┐  N failures   ┌──────┐  reset_timeout  ┌───────────┐
//! │ Closed ├──────────────►│ Open ├────────────────►│ Half-Open │
//! └────┬───┘               └──────┘                 └─────┬─────┘
//!      │                       ▲        failure           │
//!      │                       └──────────────────────────┤
//!      │◄─────────────────────────────────────────────────┘
//!              M successes in half-open
//! ```
//!
//! One breaker guards one downstream. While open, calls fail immediately with
//! [`AppError::Downstream`] without network I/O.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::{AppError, AppResult};

/// Consecutive failures that open the circuit.
pub const FAILURE_THRESHOLD: u32 = 5;

/// Consecutive half-open successes that close the circuit.
pub const SUCCESS_THRESHOLD: u32 = 2;

/// Time an open circuit waits before letting a probe through.
pub const RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls flow through.
    Closed,
    /// Tripped, calls are rejected.
    Open,
    /// Probing whether the downstream recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_opened: Option<Instant>,
}

/// Circuit breaker guarding a single downstream.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    circuit: Arc<Mutex<Circuit>>,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    /// Create a breaker with the fixed thresholds.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self::with_thresholds(name, FAILURE_THRESHOLD, SUCCESS_THRESHOLD, RESET_TIMEOUT)
    }

    /// Create a breaker with explicit thresholds.
    #[must_use]
    pub fn with_thresholds(
        name: &'static str,
        failure_threshold: u32,
        success_threshold: u32,
        reset_timeout: Duration,
    ) -> Self {
        Self {
            name,
            circuit: Arc::new(Mutex::new(Circuit {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_opened: None,
            })),
            failure_threshold,
            success_threshold,
            reset_timeout,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.circuit.lock().state
    }

    /// Check whether a call may proceed.
    ///
    /// An open circuit whose reset timeout elapsed moves to half-open and lets
    /// the call through as a probe.
    pub fn check(&self) -> AppResult<()> {
        let mut circuit = self.circuit.lock();

        match circuit.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                if let Some(last_opened) = circuit.last_opened
                    && last_opened.elapsed() >= self.reset_timeout
                {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.consecutive_successes = 0;

                    tracing::warn!(
                        downstream = self.name,
                        from = %CircuitState::Open,
                        to = %circuit.state,
                        "circuit breaker state transition: allowing probe request"
                    );

                    return Ok(());
                }

                Err(AppError::Downstream(format!(
                    "circuit breaker for {} is open",
                    self.name
                )))
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut circuit = self.circuit.lock();

        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                circuit.consecutive_successes += 1;

                if circuit.consecutive_successes >= self.success_threshold {
                    circuit.state = CircuitState::Closed;
                    circuit.consecutive_failures = 0;
                    circuit.consecutive_successes = 0;
                    circuit.last_opened = None;

                    tracing::warn!(
                        downstream = self.name,
                        from = %CircuitState::HalfOpen,
                        to = %circuit.state,
                        "circuit breaker state transition: downstream recovered"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut circuit = self.circuit.lock();

        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures += 1;

                if circuit.consecutive_failures >= self.failure_threshold {
                    circuit.state = CircuitState::Open;
                    circuit.last_opened = Some(Instant::now());

                    tracing::warn!(
                        downstream = self.name,
                        from = %CircuitState::Closed,
                        to = %circuit.state,
                        failures = circuit.consecutive_failures,
                        "circuit breaker state transition: too many failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                circuit.state = CircuitState::Open;
                circuit.consecutive_successes = 0;
                circuit.last_opened = Some(Instant::now());

                tracing::warn!(
                    downstream = self.name,
                    from = %CircuitState::HalfOpen,
                    to = %circuit.state,
                    "circuit breaker state transition: probe failed"
                );
            }
            CircuitState::Open => {
                circuit.last_opened = Some(Instant::now());
            }
        }
    }
}
