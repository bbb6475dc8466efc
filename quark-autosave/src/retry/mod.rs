//! Bounded retry around fallible async calls.
//!
//! Every remote call the mirror engine makes goes through [`execute`]. Errors
//! decide for themselves whether another attempt is worthwhile through
//! [`Retryable`]; the caller picks the delay schedule.

pub mod backoff;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

pub use backoff::{Backoff, Jitter};

pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Same pause between every attempt.
    Flat(Duration),
    /// Growing pause, used for lock contention and busy servers.
    Exponential(Backoff),
}

impl RetryPolicy {
    /// Delay after the failed attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            RetryPolicy::Flat(delay) => *delay,
            RetryPolicy::Exponential(backoff) => backoff.delay(attempt),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => f.write_str("transient"),
            FailureKind::Permanent => f.write_str("permanent"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{description} failed after {attempts} attempt(s) ({kind}): {source}")]
pub struct RetryError<E> {
    pub description: String,
    pub attempts: u32,
    pub kind: FailureKind,
    #[source]
    pub source: E,
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.source
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == FailureKind::Permanent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub attempts: u32,
    pub policy: RetryPolicy,
}

impl RetrySettings {
    pub fn flat(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            policy: RetryPolicy::Flat(delay),
        }
    }

    pub async fn run<T, E, F, Fut>(&self, description: &str, action: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        execute(action, description, self.attempts, &self.policy).await
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::flat(3, Duration::from_secs(1))
    }
}

/// Invokes `action` up to `retries` times (at least once). Errors that are not
/// [`Retryable::is_retryable`] end the loop immediately.
pub async fn execute<T, E, F, Fut>(
    mut action: F,
    description: &str,
    retries: u32,
    policy: &RetryPolicy,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = retries.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match action().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let retryable = err.is_retryable();
        warn!(
            action = description,
            attempt,
            max_attempts,
            retryable,
            error = %err,
            "remote call failed"
        );
        if !retryable || attempt >= max_attempts {
            return Err(RetryError {
                description: description.to_string(),
                attempts: attempt,
                kind: if retryable {
                    FailureKind::Transient
                } else {
                    FailureKind::Permanent
                },
                source: err,
            });
        }
        tokio::time::sleep(policy.delay(attempt - 1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("busy")]
        Busy,
        #[error("denied")]
        Denied,
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Busy)
        }
    }

    const NO_DELAY: RetryPolicy = RetryPolicy::Flat(Duration::ZERO);

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let calls = Cell::new(0u32);
        let result = execute(
            || {
                calls.set(calls.get() + 1);
                let attempt = calls.get();
                async move {
                    if attempt < 3 {
                        Err(TestError::Busy)
                    } else {
                        Ok("saved")
                    }
                }
            },
            "save items",
            3,
            &NO_DELAY,
        )
        .await;

        assert_eq!(result.unwrap(), "saved");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_annotated_error() {
        let calls = Cell::new(0u32);
        let err = execute(
            || {
                calls.set(calls.get() + 1);
                async { Err::<(), _>(TestError::Busy) }
            },
            "list share",
            2,
            &NO_DELAY,
        )
        .await
        .unwrap_err();

        assert_eq!(calls.get(), 2);
        assert_eq!(err.attempts, 2);
        assert_eq!(err.kind, FailureKind::Transient);
        assert_eq!(
            err.to_string(),
            "list share failed after 2 attempt(s) (transient): busy"
        );
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0u32);
        let err = execute(
            || {
                calls.set(calls.get() + 1);
                async { Err::<(), _>(TestError::Denied) }
            },
            "resolve share token",
            5,
            &NO_DELAY,
        )
        .await
        .unwrap_err();

        assert_eq!(calls.get(), 1);
        assert!(err.is_permanent());
        assert!(matches!(err.into_inner(), TestError::Denied));
    }

    #[tokio::test]
    async fn zero_retries_still_attempts_once() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::Exponential(Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(4),
            Jitter::Off,
        ));
        let result = execute(
            || {
                calls.set(calls.get() + 1);
                async { Ok::<_, TestError>(7) }
            },
            "poll task",
            0,
            &policy,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn flat_policy_ignores_attempt_number() {
        let policy = RetryPolicy::Flat(Duration::from_millis(250));
        assert_eq!(policy.delay(0), policy.delay(9));
    }
}
