//! Retry, circuit breaking, and deadlines for provider calls.
//!
//! # Composition
//!
//! ```text
//! Deadline ─▶ CircuitBreaker ─▶ RetryPolicy ─▶ provider call
//! ```
//!
//! Retry is innermost: each attempt is a separate provider request, with
//! exponential backoff between attempts. The breaker wraps the whole
//! retried call and records one outcome for it, so a call that burns all
//! its attempts counts as a single breaker failure. The deadline bounds the
//! total time including backoff sleeps; when it fires the in-flight future
//! is dropped.
//!
//! # Retry Strategy
//!
//! | Error | Behaviour |
//! |-------|-----------|
//! | `ProviderTransient` (429, 5xx, network) | retry with backoff |
//! | anything else | fail immediately |
//!
//! Backoff after attempt `n` (0-based) is `min(base * multiplier^n, max_delay)`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ragline_core::breaker::CircuitBreaker;
use ragline_core::RagError;

use crate::config::{BreakerConfig, RetryConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            multiplier: config.multiplier,
        }
    }

    /// A policy that never waits, for callers that only want classification.
    pub fn no_delay(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Sleep after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// `max_retries + 1` attempts have been made. Returns the last error.
    pub async fn execute<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, RagError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RagError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= self.max_retries => return Err(e),
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        op = op_name,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Absolute point in time after which provider calls are abandoned.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: tokio::time::Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: tokio::time::Instant::now() + budget,
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(tokio::time::Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Drive `fut` to completion or drop it when the deadline passes.
    pub async fn run<T, Fut>(&self, fut: Fut) -> Result<T, RagError>
    where
        Fut: Future<Output = Result<T, RagError>>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => Err(RagError::DeadlineExceeded(self.budget)),
        }
    }
}

/// Retry policy plus the breaker guarding one downstream service.
#[derive(Debug, Clone)]
pub struct Resilience {
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl Resilience {
    pub fn new(retry: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self { retry, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `op` with retries inside the breaker.
    pub async fn call<T, F, Fut>(&self, op_name: &str, op: F) -> Result<T, RagError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RagError>>,
    {
        self.breaker
            .call(|| self.retry.execute(op_name, op))
            .await
    }
}

/// Build a breaker named after the service it guards.
pub fn breaker_from_config(name: &str, config: &BreakerConfig) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(
        name,
        config.max_failures,
        Duration::from_secs(config.reset_timeout_secs),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragline_core::breaker::BreakerState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> RagError {
        RagError::ProviderTransient("503 Service Unavailable".into())
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_schedule_is_capped() {
        let p = policy(3);
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(4), Duration::from_secs(16));
        assert_eq!(p.delay_for(5), Duration::from_secs(30));
        assert_eq!(p.delay_for(5000), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .execute("embed", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts_with_backoff() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result: Result<(), _> = policy(3)
            .execute("embed", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;
        assert!(matches!(result, Err(RagError::ProviderTransient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of backoff.
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_non_retryable_fails_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(5)
            .execute("embed", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RagError::ProviderRejected("AccessDeniedException".into()))
            })
            .await;
        assert!(matches!(result, Err(RagError::ProviderRejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_breaker_counts_one_failure_per_retried_call() {
        let breaker = Arc::new(CircuitBreaker::new("embedding", 2, Duration::from_secs(60)));
        let resilience = Resilience::new(RetryPolicy::no_delay(1), Arc::clone(&breaker));
        let calls = AtomicU32::new(0);

        let op = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(transient())
        };

        assert!(resilience.call("embed", op).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.failure_count(), 1);
        assert_eq!(breaker.state(), BreakerState::Closed);

        assert!(resilience.call("embed", op).await.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);

        let err = resilience.call("embed", op).await.unwrap_err();
        assert!(matches!(err, RagError::CircuitOpen(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_drops_slow_call() {
        let deadline = Deadline::after(Duration::from_secs(1));
        let result: Result<(), _> = deadline
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(RagError::DeadlineExceeded(d)) if d == Duration::from_secs(1)));
        assert!(deadline.is_expired());
    }
}
