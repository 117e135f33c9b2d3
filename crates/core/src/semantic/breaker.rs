use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker over the external provider.
///
/// Closed → (threshold consecutive failures) → Open → (cool-down
/// elapsed) → HalfOpen → success returns to Closed, failure back to
/// Open with a refreshed cool-down. Shared across concurrent requests;
/// the failure counter lives behind a mutex so read-modify-write
/// stays race-free.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    cooldown: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { consecutive_failures: 0, opened_at: None }),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> BreakerState {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.opened_at {
            None => BreakerState::Closed,
            Some(at) if at.elapsed() >= self.cooldown => BreakerState::HalfOpen,
            Some(_) => BreakerState::Open,
        }
    }

    /// Whether a provider call may proceed right now. Closed and
    /// HalfOpen allow the attempt; Open short-circuits.
    pub fn allows_call(&self) -> bool {
        self.state() != BreakerState::Open
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.threshold {
            let was_open = inner.opened_at.is_some();
            inner.opened_at = Some(Instant::now());
            if !was_open {
                tracing::warn!(
                    failures = inner.consecutive_failures,
                    cooldown_secs = self.cooldown.as_secs_f64(),
                    "circuit breaker opened"
                );
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().expect("breaker lock poisoned").consecutive_failures
    }

    /// For testing: open the breaker as if the threshold had tripped at `at`.
    #[cfg(test)]
    fn open_at(&self, at: Instant) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures = self.threshold;
        inner.opened_at = Some(at);
    }
}
