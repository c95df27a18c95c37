//! Circuit breaker guarding connection admission.
//!
//! No example repo in the pack implements a circuit breaker directly; this
//! is built from the retry/backoff idiom in `thaumic-core`'s
//! `sonos::retry::with_retry` (attempt counters, simple state) generalized
//! into a standalone three-state machine, guarded by `parking_lot::Mutex`
//! the way `thaumic-core::state` guards its shared sync fields.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Three-state (`Closed`/`Open`/`HalfOpen`) failure-isolation mechanism.
///
/// A single instance lives in the [`crate::coordinator::Coordinator`] and
/// persists across sessions.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    test_request_limit: u32,
}

/// Outcome of [`CircuitBreaker::try_admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitDecision {
    Admit,
    Reject,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration, test_request_limit: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
            failure_threshold,
            recovery_timeout,
            test_request_limit,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Decides whether a new admission should proceed.
    ///
    /// `Open` transitions to `HalfOpen` (resetting `success_count`) once
    /// `recovery_timeout` has elapsed since the last failure; until then
    /// admission is rejected. `HalfOpen` admits up to `test_request_limit`
    /// probes (it does not itself reject — the coordinator counts probes
    /// against admitted sessions and reports success/failure back).
    pub fn try_admit(&self) -> AdmitDecision {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => AdmitDecision::Admit,
            BreakerState::HalfOpen => AdmitDecision::Admit,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.recovery_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.success_count = 0;
                    tracing::info!("circuit breaker Open -> HalfOpen (recovery timeout elapsed)");
                    AdmitDecision::Admit
                } else {
                    AdmitDecision::Reject
                }
            }
        }
    }

    /// Records a terminal success for the most recent admitted session.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {}
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.test_request_limit {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    tracing::info!("circuit breaker HalfOpen -> Closed (probes succeeded)");
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Records a terminal failure for the most recent admitted session.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(Instant::now());
                if inner.failure_count >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    tracing::warn!(
                        failures = inner.failure_count,
                        "circuit breaker Closed -> Open"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.last_failure_time = Some(Instant::now());
                tracing::warn!("circuit breaker HalfOpen -> Open (probe failed)");
            }
            BreakerState::Open => {
                inner.last_failure_time = Some(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_precisely_on_the_nth_consecutive_failure() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30), 3);
        assert_eq!(breaker.try_admit(), AdmitDecision::Admit);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);

        assert_eq!(breaker.try_admit(), AdmitDecision::Admit);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);

        assert_eq!(breaker.try_admit(), AdmitDecision::Admit);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn open_breaker_rejects_admission_before_recovery_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30), 3);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.try_admit(), AdmitDecision::Reject);
    }

    #[test]
    fn breaker_transitions_to_half_open_after_recovery_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0), 3);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.try_admit(), AdmitDecision::Admit);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_enough_successful_probes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0), 2);
        breaker.record_failure();
        breaker.try_admit(); // -> HalfOpen
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn half_open_reopens_on_any_probe_failure() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0), 3);
        breaker.record_failure();
        breaker.try_admit(); // -> HalfOpen
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
