//! Retry with bounded exponential backoff
//!
//! A [`RetryPolicy`] re-invokes a fallible operation up to `max_retries + 1`
//! times. The wait before retry *k* (k >= 1) is `base_delay * 2^(k-1)`,
//! optionally capped by `max_delay`. The same attempt/delay schedule is used by
//! the async ([`RetryPolicy::run`]) and blocking ([`RetryPolicy::run_blocking`])
//! entry points; the async wait yields to the runtime, the blocking wait parks
//! the calling thread only.
//!
//! When the attempts are exhausted the last error is returned unchanged.
//! Intermediate failures are logged, never swallowed.
//!
//! # Example
//!
//! ```
//! use rampart_core_resilience::retry::RetryPolicy;
//! use rampart_core_resilience::ResilienceError;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<u32, ResilienceError> {
//! let policy = RetryPolicy::default().with_base_delay(Duration::from_millis(250));
//!
//! let quote = policy
//!     .run("fetch_quote", || async { Ok::<_, ResilienceError>(42) })
//!     .await?;
//! # Ok(quote)
//! # }
//! ```

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::classify::{Classify, ErrorCategory};
use crate::shutdown::ShutdownSignal;

/// Retry parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Optional ceiling for a single delay (uncapped by default)
    pub max_delay: Option<Duration>,
    /// Categories worth retrying; `None` retries every category
    pub retryable: Option<HashSet<ErrorCategory>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: None,
            retryable: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Restrict retries to the given categories
    pub fn retry_only<I>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = ErrorCategory>,
    {
        self.retryable = Some(categories.into_iter().collect());
        self
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Whether an error's category is in the retryable set
    pub fn is_retryable<E: Classify + ?Sized>(&self, err: &E) -> bool {
        match &self.retryable {
            Some(categories) => categories.contains(&err.category()),
            None => true,
        }
    }

    /// Total number of attempts the policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run an async operation under this policy
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        self.run_inner(label, None, op).await
    }

    /// Run an async operation; a pending backoff aborts when `signal` fires
    pub async fn run_with_signal<T, E, F, Fut>(
        &self,
        label: &str,
        signal: &ShutdownSignal,
        op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        self.run_inner(label, Some(signal), op).await
    }

    /// Run a blocking operation under this policy
    pub fn run_blocking<T, E, F>(&self, label: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: Classify + Display,
    {
        self.run_blocking_inner(label, None, op)
    }

    /// Run a blocking operation; a pending backoff aborts when `signal` fires
    pub fn run_blocking_with_signal<T, E, F>(
        &self,
        label: &str,
        signal: &ShutdownSignal,
        op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: Classify + Display,
    {
        self.run_blocking_inner(label, Some(signal), op)
    }

    async fn run_inner<T, E, F, Fut>(
        &self,
        label: &str,
        signal: Option<&ShutdownSignal>,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!("{} succeeded after {} attempts", label, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let Some(delay) = self.plan_retry(label, attempt, &err) else {
                        return Err(err);
                    };

                    let completed = match signal {
                        Some(signal) => signal.sleep(delay).await,
                        None => {
                            tokio::time::sleep(delay).await;
                            true
                        }
                    };
                    if !completed {
                        warn!("Backoff for {} cancelled by shutdown", label);
                        return Err(err);
                    }

                    attempt += 1;
                }
            }
        }
    }

    fn run_blocking_inner<T, E, F>(
        &self,
        label: &str,
        signal: Option<&ShutdownSignal>,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: Classify + Display,
    {
        let mut attempt = 0;

        loop {
            match op() {
                Ok(value) => {
                    if attempt > 0 {
                        info!("{} succeeded after {} attempts", label, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let Some(delay) = self.plan_retry(label, attempt, &err) else {
                        return Err(err);
                    };

                    let completed = match signal {
                        Some(signal) => signal.sleep_blocking(delay),
                        None => {
                            std::thread::sleep(delay);
                            true
                        }
                    };
                    if !completed {
                        warn!("Backoff for {} cancelled by shutdown", label);
                        return Err(err);
                    }

                    attempt += 1;
                }
            }
        }
    }

    /// Decide whether failed attempt `attempt` (0-based) gets another try
    fn plan_retry<E>(&self, label: &str, attempt: u32, err: &E) -> Option<Duration>
    where
        E: Classify + Display,
    {
        if !self.is_retryable(err) {
            warn!(
                category = %err.category(),
                "{} failed with non-retryable error: {}",
                label,
                err
            );
            return None;
        }

        if attempt >= self.max_retries {
            error!(
                category = %err.category(),
                "All {} retries exhausted for {}: {}",
                self.max_retries,
                label,
                err
            );
            return None;
        }

        let delay = self.delay_for_attempt(attempt + 1);
        warn!(
            category = %err.category(),
            "Retry {}/{} for {} after {:?}: {}",
            attempt + 1,
            self.max_retries,
            label,
            delay,
            err
        );
        Some(delay)
    }
}

/// Run an async operation under `policy`
pub async fn retry<T, E, F, Fut>(op: F, policy: &RetryPolicy) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    policy.run("operation", op).await
}

/// Run a blocking operation under `policy`
pub fn retry_blocking<T, E, F>(op: F, policy: &RetryPolicy) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: Classify + Display,
{
    policy.run_blocking("operation", op)
}
