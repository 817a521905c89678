use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

/// Failure isolation for the pattern store's persistence backend.
///
/// After `failure_threshold` consecutive write failures the breaker opens
/// and callers are told to skip the store entirely; once `reset_timeout`
/// has elapsed the breaker closes again and writes resume.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    state: Mutex<BreakerState>,
}

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a store call should be attempted right now.
    pub fn allow(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            // poisoned lock: err on the side of skipping the store
            return false;
        };
        match state.opened_at {
            Some(opened) if opened.elapsed() >= self.reset_timeout => {
                state.opened_at = None;
                state.consecutive_failures = 0;
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    pub fn record_success(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.consecutive_failures = 0;
            state.opened_at = None;
        }
    }

    pub fn record_failure(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.consecutive_failures += 1;
            if state.consecutive_failures >= self.failure_threshold && state.opened_at.is_none() {
                warn!(
                    failures = state.consecutive_failures,
                    "pattern store circuit breaker opened"
                );
                state.opened_at = Some(Instant::now());
            }
        }
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.opened_at.is_some())
            .unwrap_or(true)
    }
}
