//! Circuit breaker guarding the distributed tier.
//!
//! After `failure_threshold` consecutive failures the breaker opens and
//! every distributed call is skipped until `reset_timeout` has elapsed.
//! Then exactly one call is let through as a trial call: success closes the
//! breaker, failure opens it again.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default consecutive failures before the distributed tier is skipped.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default time the distributed tier is skipped before it is tried again.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(5);

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through.
    Closed,
    /// Calls are skipped.
    Open,
    /// One trial call is in flight.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Breaker tuning, part of each preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(
        rename = "resetTimeoutMs",
        with = "crate::config::millis",
        default = "default_reset_timeout"
    )]
    pub reset_timeout: Duration,
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_reset_timeout() -> Duration {
    DEFAULT_RESET_TIMEOUT
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }
}

impl BreakerConfig {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker.
pub struct TierBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl TierBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Whether a distributed call may be attempted now.
    ///
    /// Once the reset timeout has elapsed the first caller makes the
    /// trial call; every other caller keeps skipping until it reports.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.config.reset_timeout);
                if elapsed {
                    debug!(name = %self.name, "Trying distributed tier again");
                    inner.state = BreakerState::HalfOpen;
                }
                elapsed
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        if inner.state != BreakerState::Closed {
            info!(name = %self.name, "Distributed tier recovered, breaker closed");
            inner.state = BreakerState::Closed;
            inner.opened_at = None;
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let trip = match inner.state {
            BreakerState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            BreakerState::HalfOpen => true,
            BreakerState::Open => false,
        };
        if trip {
            warn!(
                name = %self.name,
                failures = inner.consecutive_failures,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "Distributed tier breaker opened"
            );
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }
}
