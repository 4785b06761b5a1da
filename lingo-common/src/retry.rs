//! Retry Executor
//!
//! Re-invokes a fallible async operation with exponential backoff, consulting a
//! caller-supplied predicate to decide whether a failure is worth retrying.
//!
//! **Backoff Strategy:**
//! - Initial delay: 500ms
//! - Max delay: 5000ms
//! - Growth factor: 2.0, applied as `factor^attempt` against the current delay
//!
//! The growth compounds: after the n-th failure the next delay is
//! `min(max_delay, current_delay * factor^n)`, so with the defaults the curve is
//! 500ms, 1000ms, 4000ms, 5000ms, ...

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::{Error, Result};

/// Retry budget and backoff curve for [`with_retry`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first call (>= 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    /// Multiplicative growth (> 1.0)
    pub growth_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(5000),
            growth_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Check the policy invariants
    ///
    /// Returns `Error::InvalidInput` describing the first violated bound.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::InvalidInput(
                "initial_delay must be greater than zero".to_string(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::InvalidInput(format!(
                "max_delay ({} ms) must not be below initial_delay ({} ms)",
                self.max_delay.as_millis(),
                self.initial_delay.as_millis()
            )));
        }
        if !self.growth_factor.is_finite() || self.growth_factor <= 1.0 {
            return Err(Error::InvalidInput(format!(
                "growth_factor must be a finite value above 1.0 (got {})",
                self.growth_factor
            )));
        }
        Ok(())
    }

    /// Delay to use after the failure numbered `attempt` (1-based), given the
    /// delay that was just slept.
    ///
    /// Never exceeds `max_delay`.
    pub fn next_delay(&self, current: Duration, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let grown_secs = current.as_secs_f64() * self.growth_factor.powi(exponent);

        if !grown_secs.is_finite() || grown_secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(grown_secs).min(self.max_delay)
        }
    }

    /// Delays [`with_retry`] sleeps between attempts when every attempt fails
    pub fn schedule(&self) -> BackoffSchedule<'_> {
        BackoffSchedule {
            policy: self,
            attempt: 0,
            current: self.initial_delay.min(self.max_delay),
        }
    }
}

/// Iterator over the inter-attempt delays of a [`RetryPolicy`]
///
/// Yields `max_attempts - 1` items.
#[derive(Debug, Clone)]
pub struct BackoffSchedule<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
    current: Duration,
}

impl Iterator for BackoffSchedule<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt + 1 >= self.policy.max_attempts.max(1) {
            return None;
        }
        self.attempt += 1;
        let delay = self.current;
        self.current = self.policy.next_delay(self.current, self.attempt);
        Some(delay)
    }
}

/// Predicate that treats every failure as transient
pub fn always_retry<E: ?Sized>(_err: &E) -> bool {
    true
}

/// Classify a failure by its textual description
///
/// Checked in order:
/// 1. network / timeout / unavailable → retryable
/// 2. unauthenticated / permission / invalid → not retryable
/// 3. internal / deadline / resource → retryable
/// 4. anything else → retryable
pub fn is_retryable_failure<E: fmt::Display + ?Sized>(err: &E) -> bool {
    let description = err.to_string().to_lowercase();
    let mentions = |words: [&str; 3]| words.iter().any(|w| description.contains(w));

    if mentions(["network", "timeout", "unavailable"]) {
        true
    } else if mentions(["unauthenticated", "permission", "invalid"]) {
        false
    } else {
        // internal / deadline / resource exhaustion, and anything unmatched
        true
    }
}

/// Run `operation` until it succeeds, the attempt budget is spent, or
/// `is_retryable` rejects a failure.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. On failure increment the attempt counter:
///    a. budget reached or failure not retryable: log ERROR, return the failure
///    b. otherwise: log WARN, sleep current delay, grow delay, retry
///
/// # Arguments
/// * `policy` - Attempt budget and backoff curve
/// * `operation_name` - Name for logging (e.g., "history aggregate refresh")
/// * `is_retryable` - Failure classifier ([`always_retry`], [`is_retryable_failure`], ...)
/// * `operation` - Async closure performing the remote call
pub async fn with_retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    let mut current_delay = policy.initial_delay.min(policy.max_delay);

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                attempt += 1;

                let retryable = is_retryable(&err);
                if attempt >= max_attempts || !retryable {
                    error!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        retryable,
                        error = %err,
                        "Operation failed, giving up"
                    );
                    return Err(err);
                }

                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = current_delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, will retry after backoff"
                );

                tokio::time::sleep(current_delay).await;
                current_delay = policy.next_delay(current_delay, attempt);
            }
        }
    }
}
