//! Circuit breaker shared by the provider clients.
//!
//! ```text
//!            failures >= max            reset_timeout elapsed
//!  Closed ───────────────────▶ Open ─────────────────────────▶ HalfOpen
//!    ▲                          ▲                                 │
//!    │        trial fails       └─────────────────────────────────┤
//!    └────────────────────────────────────────────────────────────┘
//!                              trial succeeds
//! ```
//!
//! The breaker is an owned value, normally held in an `Arc` and handed to
//! every client that talks to the same downstream service. State lives
//! behind a `std::sync::Mutex`; the lock is never held across an await.
//!
//! While half-open exactly one trial call is admitted; concurrent callers
//! get [`RagError::CircuitOpen`] until the trial settles.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::RagError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    last_transition: Instant,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// `max_failures` of zero is treated as one.
    pub fn new(name: &str, max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            max_failures: max_failures.max(1),
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                last_transition: Instant::now(),
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    pub fn last_transition(&self) -> Instant {
        self.lock().last_transition
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask permission to run one call.
    pub fn acquire(&self) -> Result<(), RagError> {
        self.acquire_at(Instant::now())
    }

    pub fn acquire_at(&self, now: Instant) -> Result<(), RagError> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                if now.saturating_duration_since(inner.last_transition) >= self.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.last_transition = now;
                    inner.trial_in_flight = true;
                    tracing::info!(breaker = %self.name, "circuit half-open, admitting trial call");
                    Ok(())
                } else {
                    Err(RagError::CircuitOpen(self.name.clone()))
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(RagError::CircuitOpen(self.name.clone()))
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// A success closes the breaker only from `Closed` or a half-open
    /// trial. A call admitted before the breaker opened that succeeds
    /// afterwards leaves it open until the reset timeout admits a trial.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => inner.failures = 0,
            BreakerState::HalfOpen => {
                inner.failures = 0;
                inner.trial_in_flight = false;
                inner.state = BreakerState::Closed;
                inner.last_transition = Instant::now();
                tracing::info!(breaker = %self.name, "circuit closed");
            }
            BreakerState::Open => {
                tracing::debug!(breaker = %self.name, "late success ignored while open");
            }
        }
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        match inner.state {
            BreakerState::Closed => {
                if inner.failures >= self.max_failures {
                    inner.state = BreakerState::Open;
                    inner.last_transition = now;
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failures,
                        "circuit opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.last_transition = now;
                inner.trial_in_flight = false;
                tracing::warn!(breaker = %self.name, "trial call failed, circuit re-opened");
            }
            // A call admitted before the breaker opened; the window is not extended.
            BreakerState::Open => {}
        }
    }

    /// Give back a permit whose outcome says nothing about downstream health.
    pub fn release(&self) {
        self.lock().trial_in_flight = false;
    }

    /// Run `op` under the breaker, recording one outcome for the whole call.
    ///
    /// Errors for which [`RagError::counts_toward_breaker`] is false are
    /// passed through without changing the failure count. A call that is
    /// dropped before completing releases its permit.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, RagError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RagError>>,
    {
        self.acquire()?;
        let mut permit = Permit {
            breaker: self,
            settled: false,
        };

        let result = op().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(e) if e.counts_toward_breaker() => self.record_failure(),
            Err(_) => self.release(),
        }
        permit.settled = true;
        result
    }
}

struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release();
        }
    }
}
