use std::fmt;
use std::thread;
use std::time::Duration;

use genrelay_contracts::GenerationError;

/// Fixed-delay retry bound: `max_retries + 1` invocations at most.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: usize, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub const fn immediate(max_retries: usize) -> Self {
        Self::new(max_retries, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }
}

/// Every attempt failed (or a failure was not worth retrying).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted<E> {
    pub attempts: usize,
    pub last: E,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation failed after {} attempt(s): {}",
            self.attempts, self.last
        )
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryExhausted<E> {}

impl RetryExhausted<GenerationError> {
    /// A single non-retried failure surfaces unchanged.
    pub fn into_generation_error(self) -> GenerationError {
        if self.attempts <= 1 {
            return self.last;
        }
        GenerationError::Exhausted {
            attempts: self.attempts,
            last: Box::new(self.last),
        }
    }
}

pub fn retry<T, E, F>(policy: RetryPolicy, operation: F) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(usize) -> Result<T, E>,
    E: fmt::Display,
{
    retry_with(policy, operation, |_| true, |_, _| {})
}

/// Runs `operation` (given the 1-based attempt number) until it succeeds, the
/// policy is spent, or `should_retry` rejects the error. `on_retry` runs
/// before each re-attempt.
pub fn retry_with<T, E, F, P, N>(
    policy: RetryPolicy,
    mut operation: F,
    should_retry: P,
    mut on_retry: N,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(usize) -> Result<T, E>,
    P: Fn(&E) -> bool,
    N: FnMut(usize, &E),
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt: usize = 0;
    loop {
        attempt += 1;
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_attempts || !should_retry(&err) {
                    tracing::warn!(attempt, max_attempts, error = %err, "giving up");
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                tracing::debug!(attempt, max_attempts, error = %err, "attempt failed; retrying");
                on_retry(attempt, &err);
                if !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn failing_then_ok(
        failures: usize,
        calls: &mut usize,
    ) -> impl FnMut(usize) -> Result<&'static str, String> + '_ {
        move |_attempt| {
            *calls += 1;
            if *calls <= failures {
                Err(format!("failure {calls}"))
            } else {
                Ok("done")
            }
        }
    }

    #[test]
    fn fewer_failures_than_budget_succeeds_after_k_plus_one_calls() {
        for k in 0..3 {
            let mut calls = 0;
            let result = retry(RetryPolicy::immediate(3), failing_then_ok(k, &mut calls));
            assert_eq!(result, Ok("done"));
            assert_eq!(calls, k + 1);
        }
    }

    #[test]
    fn persistent_failure_stops_after_max_plus_one_calls() {
        let mut calls = 0;
        let err = retry(RetryPolicy::immediate(3), failing_then_ok(10, &mut calls)).unwrap_err();
        assert_eq!(calls, 4);
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last, "failure 4");
    }

    #[test]
    fn non_retryable_error_stops_immediately() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with(
            RetryPolicy::immediate(3),
            |_| {
                calls += 1;
                Err(GenerationError::Busy)
            },
            GenerationError::is_retryable,
            |_, _| {},
        );
        let err = result.unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(err.into_generation_error(), GenerationError::Busy);
    }

    #[test]
    fn on_retry_runs_between_attempts_and_delay_applies() {
        let mut notices = Vec::new();
        let started = Instant::now();
        let result: Result<(), _> = retry_with(
            RetryPolicy::new(2, Duration::from_millis(20)),
            |_| Err(GenerationError::MissingOutput),
            GenerationError::is_retryable,
            |attempt, _| notices.push(attempt),
        );
        assert_eq!(notices, vec![1, 2]);
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(
            result.unwrap_err().into_generation_error(),
            GenerationError::Exhausted {
                attempts: 3,
                last: Box::new(GenerationError::MissingOutput),
            }
        );
    }
}
