//! Bounded retry around an arbitrary asynchronous operation.
//!
//! [`run_with_retry`] invokes an operation up to [`RetryPolicy::max_attempts`]
//! times, strictly one after another. Every failed attempt is reported to the
//! `on_error` callback; only the last error reaches the caller.
//!
//! Attempts fire back-to-back by default ([`Backoff::None`]). Fixed and
//! exponential delays are available as policy options.
//!
//! # Example
//!
//! ```
//! use atomic_fetch::download::{RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::with_max_attempts(3);
//! match policy.should_retry(1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::constants::{DEFAULT_MAX_ATTEMPTS, MAX_JITTER};

/// Delay inserted between a failed attempt and the next one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,

    /// Wait the same amount before every retry.
    Fixed(Duration),

    /// `min(base * multiplier^(attempt-1), max) + jitter`.
    Exponential {
        /// Delay before the first retry.
        base: Duration,
        /// Delay cap (before jitter).
        max: Duration,
        /// Growth factor per attempt.
        multiplier: f32,
    },
}

impl Backoff {
    /// Exponential backoff doubling from `base`, capped at `max`.
    #[must_use]
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self::Exponential {
            base,
            max,
            multiplier: 2.0,
        }
    }

    /// Computes the delay after the given failed attempt (1-indexed).
    fn delay_after(self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => delay,
            Self::Exponential {
                base,
                max,
                multiplier,
            } => {
                let base_ms = base.as_millis() as f64;
                let exponent = f64::from(attempt.saturating_sub(1));
                let delay_ms = base_ms * f64::from(multiplier).powf(exponent);
                let capped_ms = delay_ms.min(max.as_millis() as f64);

                Duration::from_millis(capped_ms as u64) + jitter()
            }
        }
    }
}

/// Generates random jitter between 0 and `MAX_JITTER`.
fn jitter() -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

/// Decision on whether to run another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Stop and surface the last error.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Attempt ceiling plus delay policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::None,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Creates a policy with no delay between attempts.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self::new(max_attempts, Backoff::None)
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay policy.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Decides what happens after `attempt` (1-indexed) failed.
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.backoff.delay_after(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }
}

/// Runs `operation` until it succeeds or the policy's attempts are exhausted.
///
/// `operation` receives the 1-indexed attempt number. `on_error` is called
/// with every failure and the attempt it came from, including the final one,
/// before the retry decision is taken.
///
/// # Errors
///
/// Returns the error of the last attempt when all attempts fail.
pub async fn run_with_retry<T, E, Op, Fut, OnErr>(
    policy: &RetryPolicy,
    mut on_error: OnErr,
    mut operation: Op,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    OnErr: FnMut(&E, u32),
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                on_error(&error, attempt);
                match policy.should_retry(attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next,
                    } => {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        attempt = next;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(attempt, %reason, "giving up");
                        return Err(error);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::cell::Cell;

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.backoff(), Backoff::None);
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        let policy = RetryPolicy::with_max_attempts(0);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::with_max_attempts(3);

        assert!(matches!(policy.should_retry(1), RetryDecision::Retry { attempt: 2, .. }));
        assert!(matches!(policy.should_retry(2), RetryDecision::Retry { attempt: 3, .. }));

        let decision = policy.should_retry(3);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
        if let RetryDecision::DoNotRetry { reason } = decision {
            assert!(reason.contains("exhausted"));
        }
    }

    #[test]
    fn test_no_backoff_retries_immediately() {
        let policy = RetryPolicy::with_max_attempts(2);
        assert_eq!(
            policy.should_retry(1),
            RetryDecision::Retry {
                delay: Duration::ZERO,
                attempt: 2
            }
        );
    }

    // ==================== Delay Calculation Tests ====================

    #[test]
    fn test_fixed_backoff_constant_delay() {
        let backoff = Backoff::Fixed(Duration::from_millis(250));
        assert_eq!(backoff.delay_after(1), Duration::from_millis(250));
        assert_eq!(backoff.delay_after(4), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_backoff_grows_with_attempt() {
        let backoff = Backoff::exponential(Duration::from_secs(1), Duration::from_secs(32));
        let first = backoff.delay_after(1);
        assert!(first >= Duration::from_secs(1));
        assert!(first <= Duration::from_millis(1500));

        let third = backoff.delay_after(3);
        assert!(third >= Duration::from_secs(4));
        assert!(third <= Duration::from_millis(4500));
    }

    #[test]
    fn test_exponential_backoff_respects_cap() {
        let backoff = Backoff::exponential(Duration::from_secs(1), Duration::from_secs(5));
        let delay = backoff.delay_after(6);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(5500));
    }

    #[test]
    fn test_jitter_within_bounds() {
        for _ in 0..100 {
            let value = jitter();
            assert!(value <= MAX_JITTER, "Jitter {} exceeds max", value.as_millis());
        }
    }

    // ==================== run_with_retry Tests ====================

    #[tokio::test]
    async fn test_run_with_retry_always_failing_runs_exactly_max_attempts() {
        let policy = RetryPolicy::with_max_attempts(4);
        let calls = Cell::new(0u32);
        let errors = Cell::new(0u32);

        let result: Result<(), String> = run_with_retry(
            &policy,
            |_, _| errors.set(errors.get() + 1),
            |attempt| {
                calls.set(calls.get() + 1);
                async move { Err(format!("attempt {attempt} failed")) }
            },
        )
        .await;

        assert_eq!(result.unwrap_err(), "attempt 4 failed");
        assert_eq!(calls.get(), 4);
        assert_eq!(errors.get(), 4);
    }

    #[tokio::test]
    async fn test_run_with_retry_success_stops_immediately() {
        let policy = RetryPolicy::with_max_attempts(5);
        let calls = Cell::new(0u32);

        let result: Result<u32, String> = run_with_retry(
            &policy,
            |_, _| {},
            |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(attempt)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_run_with_retry_reports_attempt_numbers_in_order() {
        let policy = RetryPolicy::with_max_attempts(3);
        let mut seen = Vec::new();

        let _: Result<(), &str> =
            run_with_retry(&policy, |_, attempt| seen.push(attempt), |_| async { Err("no") })
                .await;

        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_run_with_retry_waits_fixed_backoff() {
        let policy = RetryPolicy::new(2, Backoff::Fixed(Duration::from_millis(50)));
        let started = std::time::Instant::now();

        let _: Result<(), &str> =
            run_with_retry(&policy, |_, _| {}, |_| async { Err("no") }).await;

        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
