//! Circuit breaker
//! Mission: stop feeding the HFT processor work once it's failing, give it
//! a recovery window, then probe with a single half-open attempt before
//! fully reopening the gate.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_time: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_time: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_time,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Whether a request may proceed right now. Moves `Open -> HalfOpen`
    /// once the recovery window has elapsed, without yet closing the gate.
    pub fn allow_request(&self) -> bool {
        let mut guard = self.state.lock();
        match guard.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if let Some(opened_at) = guard.opened_at {
                    if opened_at.elapsed() >= self.recovery_time {
                        guard.state = CircuitState::HalfOpen;
                        return true;
                    }
                }
                false
            }
        }
    }

    pub fn record_success(&self) {
        let mut guard = self.state.lock();
        guard.consecutive_failures = 0;
        guard.state = CircuitState::Closed;
        guard.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut guard = self.state.lock();
        guard.consecutive_failures += 1;
        if guard.consecutive_failures >= self.failure_threshold {
            guard.state = CircuitState::Open;
            guard.opened_at = Some(Instant::now());
        }
    }
}
