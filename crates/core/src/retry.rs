//! Retry with exponential backoff and a process-wide circuit breaker
//! registry (§4.1).
//!
//! ```ignore
//! let policy = RetryPolicy::default();
//! let result = policy.run(|| async { call_provider().await }).await?;
//!
//! let breaker = breaker_registry().get_or_create("groq_api", CircuitBreakerConfig::default());
//! let result = breaker.guard(|| async { call_provider().await }).await?;
//! ```

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;

/// Minimum delay floor, regardless of how small `base_delay` is configured
/// (§4.1: "jittered value floored at 100 ms").
const MIN_DELAY: Duration = Duration::from_millis(100);

/// Retry Policy (§3 "Retry Policy", §4.1 "Retry contract").
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_base_delay(mut self, d: Duration) -> Self {
        self.base_delay = d;
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    /// Delay before retrying attempt `attempt` (1-indexed, the attempt that
    /// just failed), per §4.1's `min(base·base^(a-1), max) · (1 ± jitter)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exp = self.exponential_base.powi(attempt as i32 - 1);
        let raw = (base_secs * exp).min(self.max_delay.as_secs_f64());

        let jitter_range = raw * self.jitter_fraction;
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        let delayed = (raw + jitter).max(MIN_DELAY.as_secs_f64());
        Duration::from_secs_f64(delayed)
    }

    /// Run `operation`, retrying on errors matched by `retryable` (and not by
    /// `non_retryable`) up to `max_attempts` times (1-indexed attempts).
    /// `on_retry(error, attempt, delay)` fires before each sleep.
    pub async fn run<T, F, Fut>(
        &self,
        mut operation: F,
        retryable: impl Fn(&Error) -> bool,
        non_retryable: impl Fn(&Error) -> bool,
        mut on_retry: impl FnMut(&Error, u32, Duration),
    ) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !retryable(&err) || non_retryable(&err) {
                        return Err(err);
                    }
                    if attempt == self.max_attempts {
                        return Err(Error::RetryExhausted {
                            attempts: self.max_attempts,
                            source: Box::new(err),
                        });
                    }
                    let delay = self.delay_for_attempt(attempt);
                    on_retry(&err, attempt, delay);
                    tracing::warn!(attempt, ?delay, error = %err, "retrying");
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(Error::RetryExhausted {
            attempts: self.max_attempts,
            source: Box::new(last_error.unwrap_or(Error::Other("no attempts made".into()))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit Breaker (§3, §4.1).
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<std::time::Instant>,
    half_open_calls: u32,
}

/// A single named circuit breaker. State transitions are serialised by an
/// internal mutex (§4.1: "State transitions are serialised per breaker").
pub struct CircuitBreaker {
    pub name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    trips: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
                half_open_calls: 0,
            }),
            trips: AtomicU32::new(0),
        }
    }

    /// Evaluate `OPEN -> HALF_OPEN` on elapsed time and report whether a
    /// request may proceed right now.
    pub fn allow_request(&self) -> bool {
        let mut s = self.state.lock();
        match s.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => s.half_open_calls < self.config.half_open_max_calls,
            CircuitState::Open => {
                if let Some(last_failure) = s.last_failure_at {
                    if last_failure.elapsed() >= self.config.reset_timeout {
                        s.state = CircuitState::HalfOpen;
                        s.half_open_calls = 0;
                        s.success_count = 0;
                        tracing::info!(breaker = %self.name, "circuit half-open");
                        return s.half_open_calls < self.config.half_open_max_calls;
                    }
                }
                false
            }
        }
    }

    pub fn record_success(&self) {
        let mut s = self.state.lock();
        match s.state {
            CircuitState::Closed => {
                s.failure_count = s.failure_count.saturating_sub(1);
            }
            CircuitState::HalfOpen => {
                s.half_open_calls += 1;
                s.success_count += 1;
                if s.success_count >= self.config.success_threshold {
                    s.state = CircuitState::Closed;
                    s.failure_count = 0;
                    s.success_count = 0;
                    tracing::info!(breaker = %self.name, "circuit closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut s = self.state.lock();
        match s.state {
            CircuitState::Closed => {
                s.failure_count += 1;
                s.last_failure_at = Some(std::time::Instant::now());
                if s.failure_count >= self.config.failure_threshold {
                    s.state = CircuitState::Open;
                    self.trips.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(breaker = %self.name, "circuit open");
                }
            }
            CircuitState::HalfOpen => {
                s.half_open_calls += 1;
                s.state = CircuitState::Open;
                s.last_failure_at = Some(std::time::Instant::now());
                self.trips.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(breaker = %self.name, "circuit re-opened from half-open");
            }
            CircuitState::Open => {
                s.last_failure_at = Some(std::time::Instant::now());
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.allow_request();
        self.state.lock().state
    }

    pub fn reset_at(&self) -> chrono::DateTime<chrono::Utc> {
        let s = self.state.lock();
        match s.last_failure_at {
            Some(t) => {
                let remaining = self.config.reset_timeout.saturating_sub(t.elapsed());
                chrono::Utc::now() + chrono::Duration::from_std(remaining).unwrap_or_default()
            }
            None => chrono::Utc::now(),
        }
    }

    pub fn trip_count(&self) -> u32 {
        self.trips.load(Ordering::Relaxed)
    }

    /// Scoped-usage helper: enter, run, record success or failure (§4.1).
    pub async fn guard<T, F, Fut>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        if !self.allow_request() {
            return Err(Error::CircuitOpen {
                name: self.name.clone(),
                reset_at: self.reset_at(),
            });
        }
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}

/// Process-wide registry so that concurrent call handlers converge on the
/// same trip state for the same external dependency (§4.1).
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    fn new() -> Self {
        Self {
            breakers: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }
}

static REGISTRY: Lazy<BreakerRegistry> = Lazy::new(BreakerRegistry::new);

pub fn breaker_registry() -> &'static BreakerRegistry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as Counter;

    #[tokio::test]
    async fn retry_law_respects_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter_fraction: 0.0,
        };
        let calls = Arc::new(Counter::new(0));
        let calls2 = calls.clone();
        let result: Result<(), Error> = policy
            .run(
                move || {
                    calls2.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::Provider("boom".into())) }
                },
                |e| e.is_transient() || matches!(e, Error::Provider(_)),
                |_| false,
                |_, _, _| {},
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausting_a_retryable_error_surfaces_retry_exhausted() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter_fraction: 0.0,
        };
        let result: Result<(), Error> = policy
            .run(
                || async { Err(Error::Provider("boom".into())) },
                |e| e.is_transient() || matches!(e, Error::Provider(_)),
                |_| false,
                |_, _, _| {},
            )
            .await;
        assert!(matches!(result, Err(Error::RetryExhausted { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn a_non_retryable_error_is_returned_raw_even_on_the_first_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter_fraction: 0.0,
        };
        let calls = Arc::new(Counter::new(0));
        let calls2 = calls.clone();
        let result: Result<(), Error> = policy
            .run(
                move || {
                    calls2.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::PolicyDenied("not eligible".into())) }
                },
                |_| true,
                |e| matches!(e, Error::PolicyDenied(_)),
                |_, _, _| {},
            )
            .await;
        assert!(matches!(result, Err(Error::PolicyDenied(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn breaker_opens_after_threshold_and_closes_after_recovery() {
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                reset_timeout: Duration::from_millis(10),
                half_open_max_calls: 5,
            },
        );
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());

        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn breaker_reopens_on_half_open_failure() {
        let breaker = CircuitBreaker::new(
            "test2",
            CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 2,
                reset_timeout: Duration::from_millis(5),
                half_open_max_calls: 5,
            },
        );
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
