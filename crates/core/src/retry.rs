use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the back-off delay.
    Retry,
    /// Give up immediately, no more retries.
    FailTerminal,
}

impl RetryDecision {
    pub fn from_retryable(retryable: bool) -> Self {
        if retryable {
            Self::Retry
        } else {
            Self::FailTerminal
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

/// Why a single attempt failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AttemptError<E> {
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
    #[error("{0}")]
    Failed(E),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("operation failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: AttemptError<E>, history: Vec<String> },
    #[error("operation failed with a terminal error on attempt {attempt}: {error}")]
    Terminal { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Terminal { attempt, .. } => *attempt,
        }
    }
}

/// One failed attempt, as seen by the on-retry hook.
#[derive(Debug)]
pub struct RetryAttempt<'a, E> {
    pub attempt: u32,
    pub error: &'a AttemptError<E>,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.min(16);
        let multiplier = 1_u32 << exponent;
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }

    /// Runs `operation` until it succeeds, `classify` marks an error terminal,
    /// or `max_attempts` is used up. Each attempt is bounded by
    /// `attempt_timeout`; a timeout counts as a failed, retryable attempt.
    /// `on_retry` fires before every back-off sleep.
    pub async fn run<T, E, Op, Fut, Classify, Hook>(
        &self,
        mut operation: Op,
        classify: Classify,
        mut on_retry: Hook,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classify: Fn(&E) -> RetryDecision,
        Hook: FnMut(RetryAttempt<'_, E>),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut history = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match tokio::time::timeout(self.attempt_timeout, operation(attempt)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => {
                    if classify(&error) == RetryDecision::FailTerminal {
                        return Err(RetryError::Terminal { attempt, error });
                    }
                    AttemptError::Failed(error)
                }
                Err(_) => AttemptError::TimedOut(self.attempt_timeout),
            };
            history.push(format!("attempt {attempt}: {error}"));

            if attempt >= max_attempts {
                return Err(RetryError::Exhausted { attempts: attempt, last: error, history });
            }

            let delay = self.backoff(attempt - 1);
            on_retry(RetryAttempt { attempt, error: &error, delay });
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::{AttemptError, RetryDecision, RetryError, RetryPolicy};

    fn always_retry(_: &String) -> RetryDecision {
        RetryDecision::Retry
    }

    #[test]
    fn decision_follows_retryable_flag() {
        assert_eq!(RetryDecision::from_retryable(true), RetryDecision::Retry);
        assert_eq!(RetryDecision::from_retryable(false), RetryDecision::FailTerminal);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(10));
        assert_eq!(policy.backoff(1), Duration::from_secs(20));
        assert_eq!(policy.backoff(2), Duration::from_secs(40));
        assert_eq!(policy.backoff(10), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();
        let started = Instant::now();

        let result = RetryPolicy::default()
            .run(
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err(format!("boom {attempt}"))
                        } else {
                            Ok("posted")
                        }
                    }
                },
                always_retry,
                |retry| retries.push((retry.attempt, retry.delay)),
            )
            .await;

        assert_eq!(result, Ok("posted"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            retries,
            vec![(1, Duration::from_secs(10)), (2, Duration::from_secs(20))]
        );
        assert_eq!(Instant::now() - started, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_single_aggregated_error() {
        let result: Result<(), _> = RetryPolicy::default()
            .run(|attempt| async move { Err(format!("down {attempt}")) }, always_retry, |_| {})
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.attempts(), 3);
        match error {
            RetryError::Exhausted { last, history, .. } => {
                assert_eq!(last, AttemptError::Failed("down 3".to_owned()));
                assert_eq!(history.len(), 3);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_stop_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("invalid_auth".to_owned()) }
                },
                |_| RetryDecision::FailTerminal,
                |_| panic!("terminal errors must not trigger the retry hook"),
            )
            .await;

        assert!(matches!(result, Err(RetryError::Terminal { attempt: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_and_count_as_failures() {
        let policy = RetryPolicy { base_delay: Duration::ZERO, ..RetryPolicy::default() };
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<String>> = policy
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    }
                },
                always_retry,
                |_| {},
            )
            .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 3, last: AttemptError::TimedOut(_), .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
