//! Timeout, retry and backoff around a single transport invocation.
//!
//! [`invoke_with_policy`] runs one logical invocation: every attempt is
//! bounded by the timeout, and failed attempts are retried according to a
//! [`RetryPolicy`] with [`backoff_delay`] between them. Fallback values are
//! not handled here; they apply to the settled outcome, see the client.

use std::future::Future;
use std::time::Duration;

use callbox_core::{CallError, CallResult, TransportError};
use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::metrics::record_timeout;
use crate::options::{Backoff, RetryOptions, RetryPredicate};

/// Delay before retry number `attempt` (1 for the first retry).
///
/// - linear: `base * attempt`
/// - exponential: `base * 2^(attempt - 1)`
/// - jitter: exponential plus a uniform random `[0, base)`
///
/// The result is clamped to `max` when given.
///
/// ```
/// use std::time::Duration;
/// use callbox::options::Backoff;
/// use callbox::retry::backoff_delay;
///
/// let base = Duration::from_millis(50);
/// assert_eq!(backoff_delay(1, base, Backoff::Exponential, None), Duration::from_millis(50));
/// assert_eq!(backoff_delay(2, base, Backoff::Exponential, None), Duration::from_millis(100));
/// assert_eq!(backoff_delay(3, base, Backoff::Linear, None), Duration::from_millis(150));
/// ```
pub fn backoff_delay(attempt: u32, base: Duration, backoff: Backoff, max: Option<Duration>) -> Duration {
    let attempt = attempt.max(1);
    let exponential = || base.saturating_mul(2_u32.saturating_pow(attempt - 1));
    let delay = match backoff {
        Backoff::Linear => base.saturating_mul(attempt),
        Backoff::Exponential => exponential(),
        Backoff::Jitter => exponential().saturating_add(jitter(base)),
    };
    match max {
        Some(max) => delay.min(max),
        None => delay,
    }
}

fn jitter(base: Duration) -> Duration {
    let span = u64::try_from(base.as_nanos()).unwrap_or(u64::MAX);
    if span == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::rng().random_range(0..span))
}

/// Retry settings with client defaults filled in.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the original invocation.
    pub attempts: u32,
    /// Backoff formula.
    pub backoff: Backoff,
    /// Base delay.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Option<Duration>,
    should_retry: Option<RetryPredicate>,
}

impl RetryPolicy {
    /// Resolves `options` against the client defaults.
    ///
    /// Returns `None` when no retries are allowed.
    pub fn resolve(options: &RetryOptions, config: &ClientConfig) -> Option<Self> {
        (options.attempts > 0).then(|| Self {
            attempts: options.attempts,
            backoff: options.backoff.unwrap_or(config.retry_backoff),
            base_delay: options.base_delay.unwrap_or(config.retry_base_delay),
            max_delay: options.max_delay,
            should_retry: options.should_retry.clone(),
        })
    }

    /// Delay before retry number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base_delay, self.backoff, self.max_delay)
    }

    fn accepts(&self, error: &CallError) -> bool {
        self.should_retry
            .as_ref()
            .is_none_or(|predicate| predicate.check(error))
    }
}

/// Bounds `invocation` by `timeout`, mapping elapsed time to [`CallError::Timeout`].
pub async fn with_timeout<F>(timeout: Option<Duration>, invocation: F) -> CallResult
where
    F: Future<Output = Result<Value, TransportError>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, invocation).await {
            Ok(result) => result.map_err(CallError::from),
            Err(_) => {
                debug!(timeout = ?limit, "invocation timed out");
                record_timeout();
                Err(CallError::Timeout(limit))
            }
        },
        None => invocation.await.map_err(CallError::from),
    }
}

/// Runs `invoke` until it succeeds or the policy gives up.
///
/// `invoke` receives the zero-based attempt number. Without a policy the
/// first failure is returned unchanged. A failure the policy's predicate
/// rejects is also returned unchanged; running out of attempts yields
/// [`CallError::RetryExhausted`] carrying the last failure.
pub async fn invoke_with_policy<F, Fut>(
    policy: Option<&RetryPolicy>,
    timeout: Option<Duration>,
    mut invoke: F,
) -> CallResult
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Value, TransportError>>,
{
    let mut attempt = 0;
    loop {
        let error = match with_timeout(timeout, invoke(attempt)).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let Some(policy) = policy else {
            return Err(error);
        };
        if !policy.accepts(&error) {
            debug!(attempt, %error, "failure not retryable");
            return Err(error);
        }
        if attempt >= policy.attempts {
            return Err(CallError::RetryExhausted {
                attempts: attempt + 1,
                last: Box::new(error),
            });
        }
        attempt += 1;
        let delay = policy.delay(attempt);
        warn!(attempt, of = policy.attempts, delay = ?delay, %error, "retrying");
        tokio::time::sleep(delay).await;
    }
}
