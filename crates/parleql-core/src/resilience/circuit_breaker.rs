//! Circuit breaker with a serialized half-open probe.
//!
//! State machine:
//!
//! - **Closed**: calls pass through; `fail_max` consecutive counted
//!   failures trip the breaker to Open.
//! - **Open**: calls are rejected immediately. After `reset_timeout`, the
//!   next caller is admitted as the single half-open probe.
//! - **HalfOpen**: exactly one probe is in flight; its outcome decides the
//!   next state. Everyone else is rejected until it lands.
//!
//! Classification is the caller's job: rate limits, auth failures and
//! plain bad requests are recorded as `Ignored` and do not move the state
//! machine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::observability::Meter;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// How a guarded call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    /// A counted downstream failure (transient 5xx, timeout, network).
    Failure,
    /// Not counted: client errors, rate limits, cancellation.
    Ignored,
}

/// Breaker thresholds.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures before the breaker opens.
    pub fail_max: u32,
    /// Time the breaker stays open before admitting a probe.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { fail_max: 5, reset_timeout: Duration::from_secs(30) }
    }
}

/// Admission ticket for one guarded call. Must be passed back to
/// [`CircuitBreaker::record`] with the call's outcome; on cancellation
/// record `Ignored`.
#[derive(Debug)]
#[must_use = "record the call outcome with CircuitBreaker::record"]
pub struct Permit {
    probe: bool,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// One breaker per failure domain (llm, vector, db).
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    meter: Arc<dyn Meter>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, meter: Arc<dyn Meter>) -> Self {
        Self {
            name: name.into(),
            config,
            meter,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, for health reporting.
    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    /// Try to enter the breaker. `None` means fail fast with
    /// `BREAKER_OPEN`; `Some(permit)` admits the call.
    pub async fn try_acquire(&self) -> Option<Permit> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => Some(Permit { probe: false }),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.reset_timeout && !inner.probe_in_flight {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    self.meter.incr_counter("breaker_half_open_total", &self.name, 1);
                    tracing::info!(breaker = %self.name, "circuit breaker half-open, admitting probe");
                    Some(Permit { probe: true })
                } else {
                    None
                }
            },
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(Permit { probe: true })
                }
            },
        }
    }

    /// Record the outcome of an admitted call.
    pub async fn record(&self, permit: Permit, outcome: CallOutcome) {
        let mut inner = self.inner.lock().await;
        match outcome {
            CallOutcome::Success => {
                if permit.probe {
                    inner.probe_in_flight = false;
                    inner.state = BreakerState::Closed;
                    inner.opened_at = None;
                    self.meter.incr_counter("breaker_closed_total", &self.name, 1);
                    tracing::info!(breaker = %self.name, "circuit breaker closed after successful probe");
                }
                inner.consecutive_failures = 0;
            },
            CallOutcome::Failure => {
                self.meter.incr_counter("breaker_failure_total", &self.name, 1);
                if permit.probe {
                    inner.probe_in_flight = false;
                    self.open(&mut inner);
                } else {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.fail_max
                        && inner.state == BreakerState::Closed
                    {
                        self.open(&mut inner);
                    }
                }
            },
            CallOutcome::Ignored => {
                self.meter.incr_counter("breaker_ignored_failure_total", &self.name, 1);
                if permit.probe {
                    // The probe told us nothing; stay half-open and let the
                    // next caller probe again.
                    inner.probe_in_flight = false;
                }
            },
        }
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.consecutive_failures = 0;
        self.meter.incr_counter("breaker_open_total", &self.name, 1);
        tracing::warn!(breaker = %self.name, "circuit breaker opened");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MemoryMeter;

    fn breaker(fail_max: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "db",
            CircuitBreakerConfig { fail_max, reset_timeout: reset },
            Arc::new(MemoryMeter::new()),
        )
    }

    async fn fail_once(b: &CircuitBreaker) {
        let permit = b.try_acquire().await.expect("admitted");
        b.record(permit, CallOutcome::Failure).await;
    }

    #[tokio::test]
    async fn opens_after_fail_max_consecutive_failures() {
        let b = breaker(3, Duration::from_secs(60));
        for _ in 0..3 {
            fail_once(&b).await;
        }
        assert_eq!(b.state().await, BreakerState::Open);
        assert!(b.try_acquire().await.is_none(), "open breaker rejects");
    }

    #[tokio::test]
    async fn success_resets_the_failure_streak() {
        let b = breaker(3, Duration::from_secs(60));
        fail_once(&b).await;
        fail_once(&b).await;
        let permit = b.try_acquire().await.unwrap();
        b.record(permit, CallOutcome::Success).await;
        fail_once(&b).await;
        fail_once(&b).await;
        assert_eq!(b.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn ignored_errors_do_not_count() {
        let b = breaker(2, Duration::from_secs(60));
        for _ in 0..10 {
            let permit = b.try_acquire().await.unwrap();
            b.record(permit, CallOutcome::Ignored).await;
        }
        assert_eq!(b.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn exactly_one_probe_is_admitted_after_reset() {
        let b = breaker(1, Duration::from_millis(10));
        fail_once(&b).await;
        assert_eq!(b.state().await, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let probe = b.try_acquire().await.expect("probe admitted");
        // Second caller while the probe is in flight is rejected.
        assert!(b.try_acquire().await.is_none());

        b.record(probe, CallOutcome::Success).await;
        assert_eq!(b.state().await, BreakerState::Closed);
        assert!(b.try_acquire().await.is_some());
    }

    #[tokio::test]
    async fn failed_probe_reopens() {
        let b = breaker(1, Duration::from_millis(10));
        fail_once(&b).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let probe = b.try_acquire().await.expect("probe admitted");
        b.record(probe, CallOutcome::Failure).await;
        assert_eq!(b.state().await, BreakerState::Open);
        assert!(b.try_acquire().await.is_none());
    }
}
