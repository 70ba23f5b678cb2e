use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Operations flow normally
    Closed,
    /// Operations fail fast with `Unavailable`
    Open,
    /// One probe allowed through to test recovery
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures inside the window before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing
    pub recovery_timeout: Duration,
    /// Failures older than this no longer count toward the threshold
    pub monitoring_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            monitoring_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    window_start: Instant,
    opened_at: Instant,
    half_open_probe_out: bool,
}

/// Point-in-time view for the admin API
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub seconds_until_probe: Option<u64>,
}

/// Stateful gate in front of the cache transport.
///
/// CLOSED counts failures within the monitoring window; at the threshold it
/// opens and everything fails fast. After the recovery timeout one probe is
/// let through (HALF_OPEN); its outcome decides between CLOSED and another
/// OPEN period.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                window_start: now,
                opened_at: now,
                half_open_probe_out: false,
            }),
        }
    }

    /// Whether a call may proceed right now. Transitions OPEN -> HALF_OPEN
    /// once the recovery timeout has elapsed and hands out the single probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if inner.opened_at.elapsed() >= self.config.recovery_timeout {
                    info!("cache circuit half-open, probing");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probe_out = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probe_out {
                    false
                } else {
                    inner.half_open_probe_out = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            CircuitState::HalfOpen => {
                info!("cache circuit closed after successful probe");
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.window_start = Instant::now();
                inner.half_open_probe_out = false;
            }
            CircuitState::Closed => {
                // Outside the monitoring window stale failures are forgotten
                if inner.window_start.elapsed() > self.config.monitoring_window {
                    inner.failure_count = 0;
                    inner.window_start = Instant::now();
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            CircuitState::HalfOpen => {
                warn!("cache probe failed, circuit re-opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Instant::now();
                inner.half_open_probe_out = false;
            }
            CircuitState::Closed => {
                if inner.window_start.elapsed() > self.config.monitoring_window {
                    inner.failure_count = 0;
                    inner.window_start = Instant::now();
                }
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        failures = inner.failure_count,
                        "cache circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Instant::now();
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock").state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker lock");
        let seconds_until_probe = match inner.state {
            CircuitState::Open => Some(
                self.config
                    .recovery_timeout
                    .saturating_sub(inner.opened_at.elapsed())
                    .as_secs(),
            ),
            _ => None,
        };
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            seconds_until_probe,
        }
    }

    /// Force the circuit open-state bookkeeping back to a given moment; test
    /// hook for recovery timing.
    #[cfg(test)]
    fn backdate_open(&self, by: Duration) {
        let mut inner = self.inner.lock().expect("breaker lock");
        inner.opened_at = Instant::now() - by;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::default();
        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn probes_after_recovery_timeout_and_closes_on_success() {
        let breaker = CircuitBreaker::default();
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.backdate_open(Duration::from_secs(31));
        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // Only one probe is handed out
        assert!(!breaker.allow());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow());
    }

    #[test]
    fn failed_probe_reopens_and_resets_clock() {
        let breaker = CircuitBreaker::default();
        for _ in 0..5 {
            breaker.record_failure();
        }
        breaker.backdate_open(Duration::from_secs(31));
        assert!(breaker.allow());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        // Recovery clock restarted: no immediate probe
        assert!(!breaker.allow());
    }

    #[test]
    fn snapshot_reports_probe_countdown() {
        let breaker = CircuitBreaker::default();
        for _ in 0..5 {
            breaker.record_failure();
        }
        let snap = breaker.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert!(snap.seconds_until_probe.unwrap() <= 30);
    }
}
