//! Retry logic with exponential backoff
//!
//! This module provides configurable retry logic for transient failures.
//! It implements exponential backoff with a hard delay cap and optional jitter.
//!
//! # Example
//!
//! ```no_run
//! use courtsync::retry::{IsRetryable, execute_classified};
//! use courtsync::config::RetryPolicy;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let policy = RetryPolicy::default();
//! let result = execute_classified(&policy, |e: &MyError| e.is_retryable(), || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryPolicy;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio_util::sync::CancellationToken;

/// Status codes the default classifier treats as retryable when no policy is in scope
const DEFAULT_RETRYABLE_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (connection refused, timeout, server overload) should return
/// `true`. Permanent failures (validation errors, other 4xx responses, storage
/// corruption) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self.response_status() {
            // A server replied: retry only the transient status codes
            Some(status) => DEFAULT_RETRYABLE_STATUS.contains(&status),
            // No reply at all: retry transport failures, nothing else
            None => self.is_transport(),
        }
    }
}

impl Error {
    /// Classify this error under a specific policy's retryable status set.
    ///
    /// Same shape as the [`IsRetryable`] impl, but honors
    /// [`RetryPolicy::retryable_status_codes`] instead of the built-in default set.
    pub fn is_retryable_under(&self, policy: &RetryPolicy) -> bool {
        match self.response_status() {
            Some(status) => policy.retryable_status_codes.contains(&status),
            None => self.is_transport(),
        }
    }
}

/// Outcome of a cancellable retry sequence
#[derive(Debug, ThisError)]
pub enum RetryError<E> {
    /// The cancellation token fired before the operation succeeded
    #[error("operation cancelled")]
    Cancelled,

    /// The last attempt's error, after exhausting retries or hitting a
    /// non-retryable classification
    #[error("{0}")]
    Failed(E),
}

impl<E> RetryError<E> {
    /// The underlying operation error, unless the sequence was cancelled
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Failed(e) => Some(e),
        }
    }
}

/// Compute the delay before retry attempt `attempt`
///
/// `attempt` starts at 1 for the first retry (the initial attempt has no delay).
/// The delay is `initial_delay * backoff_multiplier^(attempt - 1)`, capped at
/// `max_delay`. Pure and deterministic; jitter is applied separately by the
/// executor when the policy enables it.
///
/// Calling this with `attempt == 0` is a caller bug: debug builds assert,
/// release builds clamp to attempt 1.
pub fn backoff_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    debug_assert!(attempt >= 1, "attempt numbers start at 1");
    let attempt = attempt.max(1);

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let scaled = policy.initial_delay.as_secs_f64() * policy.backoff_multiplier.powi(exponent);

    // Large exponents overflow to infinity; the cap covers that too
    let capped = scaled.min(policy.max_delay.as_secs_f64());
    Duration::from_secs_f64(capped)
}

/// Execute an async operation with exponential backoff retry logic
///
/// Uses the policy's own status-code set for classification: transport failures
/// with no server reply are retried, responses are retried iff their status is
/// in [`RetryPolicy::retryable_status_codes`], everything else propagates
/// immediately.
///
/// The operation is invoked at most `max_retries + 1` times. After exhaustion
/// the error from the last attempt is returned as-is, not wrapped.
///
/// # Example
///
/// ```no_run
/// use courtsync::retry::execute;
/// use courtsync::config::RetryPolicy;
/// use courtsync::error::Error;
///
/// # async fn example() -> Result<(), Error> {
/// let policy = RetryPolicy::default();
/// let roster = execute(&policy, || async {
///     // Fetch the team roster here
///     Ok::<String, Error>("roster".to_string())
/// }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn execute<F, Fut, T>(policy: &RetryPolicy, operation: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    run(
        policy,
        |e: &Error| e.is_retryable_under(policy),
        |_, _| {},
        None,
        operation,
    )
    .await
    .map_err(unwrap_failed)
}

/// Execute with a caller-supplied retryability predicate
///
/// This is the policy injection point: the predicate fully replaces the default
/// classifier, so it also works for foreign error types.
pub async fn execute_classified<F, Fut, T, E, C>(
    policy: &RetryPolicy,
    classify: C,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    run(policy, classify, |_, _| {}, None, operation)
        .await
        .map_err(unwrap_failed)
}

/// Execute with an observer callback invoked before each retry wait
///
/// `on_retry(attempt, error)` fires after a retryable failure and before the
/// backoff delay, so the caller can observe the upcoming wait. `attempt` is the
/// retry about to happen (1 = first retry).
pub async fn execute_observed<F, Fut, T, H>(
    policy: &RetryPolicy,
    on_retry: H,
    operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
    H: FnMut(u32, &Error),
{
    run(
        policy,
        |e: &Error| e.is_retryable_under(policy),
        on_retry,
        None,
        operation,
    )
    .await
    .map_err(unwrap_failed)
}

/// Execute with cooperative cancellation
///
/// The token is checked before every attempt and raced against every backoff
/// delay. Cancellation surfaces as the distinct [`RetryError::Cancelled`]
/// outcome rather than being conflated with a network failure.
pub async fn execute_cancellable<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, RetryError<Error>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    run(
        policy,
        |e: &Error| e.is_retryable_under(policy),
        |_, _| {},
        Some(cancel),
        operation,
    )
    .await
}

/// Shared retry loop behind the public entry points
///
/// Attempts are strictly sequential; the computed delay always separates two
/// attempts. The executor keeps no state across invocations.
async fn run<F, Fut, T, E, C, H>(
    policy: &RetryPolicy,
    classify: C,
    mut on_retry: H,
    cancel: Option<&CancellationToken>,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
    H: FnMut(u32, &E),
{
    let mut attempt: u32 = 0;

    loop {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                tracing::debug!(attempt, "retry sequence cancelled");
                return Err(RetryError::Cancelled);
            }
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if classify(&e) && attempt < policy.max_retries => {
                attempt += 1;
                on_retry(attempt, &e);

                let delay = backoff_delay(attempt, policy);
                let delay = if policy.jitter { add_jitter(delay) } else { delay };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );

                match cancel {
                    Some(token) => {
                        tokio::select! {
                            _ = token.cancelled() => {
                                tracing::debug!(attempt, "retry sequence cancelled during backoff");
                                return Err(RetryError::Cancelled);
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
            Err(e) => {
                if classify(&e) {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "operation failed with non-retryable error");
                }
                return Err(RetryError::Failed(e));
            }
        }
    }
}

fn unwrap_failed<E>(err: RetryError<E>) -> E {
    match err {
        RetryError::Failed(e) => e,
        RetryError::Cancelled => unreachable!("cancellation requires a token"),
    }
}

/// Add random jitter to a delay
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lands between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy_ms(max_retries: u32, initial_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_multiplier: 2.0,
            jitter: false,
            ..Default::default()
        }
    }

    fn server_error(status: u16) -> Error {
        Error::Http {
            status,
            message: "server error".to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // Backoff calculator
    // -----------------------------------------------------------------------

    #[test]
    fn backoff_table_matches_documented_progression() {
        let policy = policy_ms(10, 1000, 10_000);

        assert_eq!(backoff_delay(1, &policy), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2, &policy), Duration::from_millis(2000));
        assert_eq!(backoff_delay(3, &policy), Duration::from_millis(4000));
        assert_eq!(backoff_delay(4, &policy), Duration::from_millis(8000));
        for attempt in 5..=10 {
            assert_eq!(
                backoff_delay(attempt, &policy),
                Duration::from_millis(10_000),
                "attempt {attempt} should be capped at max_delay"
            );
        }
    }

    #[test]
    fn backoff_is_deterministic() {
        let policy = policy_ms(5, 137, 9000);
        assert_eq!(backoff_delay(3, &policy), backoff_delay(3, &policy));
    }

    #[test]
    fn backoff_huge_attempt_stays_at_cap() {
        let policy = policy_ms(5, 1000, 10_000);
        assert_eq!(backoff_delay(u32::MAX, &policy), Duration::from_millis(10_000));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "attempt numbers start at 1")]
    fn backoff_attempt_zero_asserts_in_debug() {
        let policy = RetryPolicy::default();
        let _ = backoff_delay(0, &policy);
    }

    // -----------------------------------------------------------------------
    // Classification
    // -----------------------------------------------------------------------

    #[test]
    fn transport_errors_are_retryable() {
        let policy = RetryPolicy::default();
        assert!(Error::Transport("connection refused".into()).is_retryable_under(&policy));
        assert!(Error::Transport("dns failure".into()).is_retryable());
    }

    #[test]
    fn status_in_policy_set_is_retryable() {
        let policy = RetryPolicy::default();
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(
                server_error(status).is_retryable_under(&policy),
                "{status} should be retryable"
            );
        }
    }

    #[test]
    fn status_outside_policy_set_is_not_retryable() {
        let policy = RetryPolicy::default();
        for status in [400, 401, 403, 404, 409, 422] {
            assert!(
                !server_error(status).is_retryable_under(&policy),
                "{status} should not be retryable"
            );
        }
    }

    #[test]
    fn custom_status_set_overrides_default() {
        let policy = RetryPolicy {
            retryable_status_codes: [418].into_iter().collect(),
            ..Default::default()
        };
        assert!(server_error(418).is_retryable_under(&policy));
        assert!(!server_error(500).is_retryable_under(&policy));
    }

    #[test]
    fn storage_and_serialization_errors_are_not_retryable() {
        let policy = RetryPolicy::default();
        let storage = Error::Storage(crate::error::StorageError::WriteFailed {
            key: "k".into(),
            reason: "disk full".into(),
        });
        assert!(!storage.is_retryable_under(&policy));

        let serialization =
            Error::Serialization(serde_json::from_str::<String>("bad json").unwrap_err());
        assert!(!serialization.is_retryable_under(&policy));
    }

    // -----------------------------------------------------------------------
    // Executor
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn success_invokes_operation_once() {
        let policy = RetryPolicy::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = execute(&policy, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn fails_twice_then_succeeds() {
        let policy = policy_ms(3, 10, 1000);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = execute(&policy, || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(server_error(503))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(
            counter.load(Ordering::SeqCst),
            3,
            "should retry twice before success"
        );
    }

    #[tokio::test]
    async fn retryable_failure_exhausts_after_max_retries_plus_one() {
        let policy = policy_ms(3, 10, 1000);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32, Error> = execute(&policy, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(server_error(500))
            }
        })
        .await;

        assert!(
            matches!(result, Err(Error::Http { status: 500, .. })),
            "the raw last error should surface"
        );
        assert_eq!(
            counter.load(Ordering::SeqCst),
            4,
            "initial attempt + 3 retries"
        );
    }

    #[tokio::test]
    async fn non_retryable_error_propagates_immediately() {
        let policy = RetryPolicy::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32, Error> = execute(&policy, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(server_error(404))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Http { status: 404, .. })));
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "should not retry a non-retryable error"
        );
    }

    #[tokio::test]
    async fn zero_max_retries_never_retries() {
        let policy = policy_ms(0, 1, 1000);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32, Error> = execute(&policy, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(server_error(503))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "at most one invocation with max_retries=0, regardless of classification"
        );
    }

    #[tokio::test]
    async fn custom_classifier_overrides_default() {
        let policy = policy_ms(3, 10, 1000);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        // Treat everything as permanent, even a 500
        let result: Result<i32, Error> = execute_classified(
            &policy,
            |_: &Error| false,
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(server_error(500))
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn classified_works_with_foreign_error_types() {
        #[derive(Debug)]
        struct FlakyError;
        impl std::fmt::Display for FlakyError {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "flaky")
            }
        }

        let policy = policy_ms(2, 1, 10);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32, FlakyError> = execute_classified(
            &policy,
            |_: &FlakyError| true,
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FlakyError)
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3, "initial + 2 retries");
    }

    #[tokio::test]
    async fn observer_sees_each_retry_before_the_wait() {
        let policy = policy_ms(3, 1, 10);
        let observed = Arc::new(std::sync::Mutex::new(Vec::new()));
        let observed_clone = observed.clone();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let _result: Result<i32, Error> = execute_observed(
            &policy,
            move |attempt, _err| {
                observed_clone.lock().unwrap().push(attempt);
            },
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(server_error(503))
                }
            },
        )
        .await;

        assert_eq!(*observed.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn pre_cancelled_token_skips_the_operation_entirely() {
        let policy = RetryPolicy::default();
        let token = CancellationToken::new();
        token.cancel();

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32, RetryError<Error>> = execute_cancellable(&policy, &token, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_stops_the_sequence() {
        let policy = policy_ms(5, 500, 5000);
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let cancel_handle = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_handle.cancel();
        });

        let result: Result<i32, RetryError<Error>> = execute_cancellable(&policy, &token, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(server_error(503))
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "cancellation during the first backoff should prevent the retry"
        );
    }

    #[test]
    fn retry_error_into_inner() {
        let failed: RetryError<Error> = RetryError::Failed(server_error(500));
        assert!(failed.into_inner().is_some());

        let cancelled: RetryError<Error> = RetryError::Cancelled;
        assert!(cancelled.into_inner().is_none());
    }

    // -----------------------------------------------------------------------
    // Timing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn backoff_delays_separate_attempts() {
        let policy = policy_ms(3, 50, 10_000);

        let timestamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let ts_clone = timestamps.clone();

        let _result: Result<i32, Error> = execute(&policy, || {
            let ts = ts_clone.clone();
            async move {
                ts.lock().await.push(std::time::Instant::now());
                Err(server_error(503))
            }
        })
        .await;

        let ts = timestamps.lock().await;
        assert_eq!(ts.len(), 4, "initial + 3 retries = 4 calls");

        // Gaps should be ~50ms, ~100ms, ~200ms
        let gap1 = ts[1].duration_since(ts[0]);
        let gap2 = ts[2].duration_since(ts[1]);
        let gap3 = ts[3].duration_since(ts[2]);

        assert!(
            gap1 >= Duration::from_millis(40),
            "first delay should be ~50ms, was {gap1:?}"
        );
        assert!(
            gap2 >= Duration::from_millis(80),
            "second delay should be ~100ms, was {gap2:?}"
        );
        assert!(
            gap3 >= Duration::from_millis(160),
            "third delay should be ~200ms, was {gap3:?}"
        );
    }

    #[tokio::test]
    async fn individual_delays_never_exceed_max_delay() {
        // Without capping, delays would be 50ms, 500ms, 5000ms
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            backoff_multiplier: 10.0,
            jitter: false,
            ..Default::default()
        };

        let timestamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let ts_clone = timestamps.clone();

        let _result: Result<i32, Error> = execute(&policy, || {
            let ts = ts_clone.clone();
            async move {
                ts.lock().await.push(std::time::Instant::now());
                Err(server_error(503))
            }
        })
        .await;

        let ts = timestamps.lock().await;
        assert_eq!(ts.len(), 4);

        // Generous tolerance for CI scheduling overhead
        let max_allowed = Duration::from_millis(350);
        for i in 1..ts.len() {
            let gap = ts[i].duration_since(ts[i - 1]);
            assert!(
                gap <= max_allowed,
                "delay before attempt {} was {gap:?}, exceeding max_delay + tolerance",
                i + 1
            );
        }
    }

    // -----------------------------------------------------------------------
    // Jitter bounds
    // -----------------------------------------------------------------------

    #[test]
    fn add_jitter_stays_within_bounds_over_many_iterations() {
        let delay = Duration::from_millis(50);
        for i in 0..200 {
            let jittered = add_jitter(delay);
            assert!(
                jittered >= delay,
                "iteration {i}: jittered {jittered:?} < base delay {delay:?}"
            );
            assert!(
                jittered <= delay * 2,
                "iteration {i}: jittered {jittered:?} > 2x base delay"
            );
        }
    }

    #[test]
    fn add_jitter_on_zero_delay_returns_zero() {
        assert_eq!(add_jitter(Duration::ZERO), Duration::ZERO);
    }
}
