//! Per-provider circuit breaker.
//!
//! State is derived rather than stored: the consecutive-failure count plus
//! the time of the last failure determine Closed, Open, or HalfOpen at the
//! moment of each admission check. HalfOpen admits exactly one probe call
//! at a time; the probe's outcome decides whether the circuit closes or
//! re-opens.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Error returned when the breaker refuses a call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BreakerError {
    #[error("circuit open; retry after {remaining_ms}ms")]
    Open { remaining_ms: u64 },

    #[error("circuit half-open with a probe already in flight")]
    ProbeInFlight,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// One provider's breaker. Shared process-wide across all runs.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &str) -> Self {
        Self::with_config(name, BreakerConfig::default())
    }

    pub fn with_config(name: &str, config: BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: Mutex::new(BreakerInner {
                consecutive_failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    fn derive_state(&self, inner: &BreakerInner, now: Instant) -> BreakerState {
        if inner.consecutive_failures < self.config.failure_threshold {
            return BreakerState::Closed;
        }
        match inner.last_failure {
            Some(at) if now.duration_since(at) >= self.config.cooldown => BreakerState::HalfOpen,
            _ => BreakerState::Open,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state_at(Instant::now())
    }

    pub fn state_at(&self, now: Instant) -> BreakerState {
        let inner = self.inner.lock().expect("breaker poisoned");
        self.derive_state(&inner, now)
    }

    /// Admission check before an adapter call. Open circuits short-circuit;
    /// half-open circuits admit one probe at a time.
    pub fn try_acquire(&self) -> Result<(), BreakerError> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> Result<(), BreakerError> {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        match self.derive_state(&inner, now) {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| now.duration_since(at))
                    .unwrap_or_default();
                let remaining = self.config.cooldown.saturating_sub(elapsed);
                Err(BreakerError::Open {
                    remaining_ms: remaining.as_millis() as u64,
                })
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(BreakerError::ProbeInFlight);
                }
                inner.probe_in_flight = true;
                info!(breaker = %self.name, "half-open; admitting probe call");
                Ok(())
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        if inner.consecutive_failures >= self.config.failure_threshold {
            info!(breaker = %self.name, "probe succeeded; closing circuit");
        }
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        inner.consecutive_failures += 1;
        inner.last_failure = Some(now);
        inner.probe_in_flight = false;
        if inner.consecutive_failures == self.config.failure_threshold {
            warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                "failure threshold reached; opening circuit"
            );
        }
    }

    #[cfg(test)]
    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.inner.lock().expect("breaker poisoned").consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::with_config(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                cooldown,
            },
        )
    }

    #[test]
    fn test_closed_until_threshold() {
        let b = breaker(3, Duration::from_secs(30));
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.try_acquire().is_ok());
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn test_open_short_circuits() {
        let b = breaker(2, Duration::from_secs(30));
        b.record_failure();
        b.record_failure();
        let err = b.try_acquire().unwrap_err();
        assert!(matches!(err, BreakerError::Open { .. }));
    }

    #[test]
    fn test_half_open_after_cooldown_single_probe() {
        let b = breaker(2, Duration::from_secs(30));
        let start = Instant::now();
        b.record_failure_at(start);
        b.record_failure_at(start);

        let later = start + Duration::from_secs(31);
        assert_eq!(b.state_at(later), BreakerState::HalfOpen);
        assert!(b.try_acquire_at(later).is_ok());
        // Second caller during the probe is rejected.
        assert!(matches!(
            b.try_acquire_at(later),
            Err(BreakerError::ProbeInFlight)
        ));
    }

    #[test]
    fn test_probe_success_closes_and_resets() {
        let b = breaker(2, Duration::from_secs(30));
        let start = Instant::now();
        b.record_failure_at(start);
        b.record_failure_at(start);
        let later = start + Duration::from_secs(31);
        b.try_acquire_at(later).unwrap();
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[test]
    fn test_probe_failure_reopens() {
        let b = breaker(2, Duration::from_millis(10));
        let start = Instant::now();
        b.record_failure_at(start);
        b.record_failure_at(start);
        let later = start + Duration::from_millis(11);
        b.try_acquire_at(later).unwrap();
        b.record_failure_at(later);
        assert_eq!(b.state_at(later + Duration::from_millis(1)), BreakerState::Open);
    }

    #[test]
    fn test_success_resets_partial_failures() {
        let b = breaker(3, Duration::from_secs(30));
        b.record_failure();
        b.record_failure();
        b.record_success();
        assert_eq!(b.consecutive_failures(), 0);
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
