//! Retry schedules and the generic retry combinator.
//!
//! A `RetrySchedule` is an ordered list of wait durations. `retry` invokes an
//! operation once per schedule entry, sleeping between failed attempts, and
//! gives up with `RetryError::Exhausted` once the schedule is consumed.
//! Cancellation is observed before every attempt, while an attempt is in
//! flight, and during every sleep.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::MetricsError;

/// Errors that can tell whether another attempt might succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for MetricsError {
    fn is_retryable(&self) -> bool {
        MetricsError::is_retryable(self)
    }
}

/// Ordered wait durations, consumed front to back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Linear schedule: the wait after attempt `i` is `backoff_factor * i - 1`
    /// seconds, `i = 1..=retries` (factor 2 gives 1s, 3s, 5s).
    pub fn linear(retries: u32, backoff_factor: u64) -> Self {
        let delays = (1..=u64::from(retries))
            .map(|i| Duration::from_secs(backoff_factor.saturating_mul(i).saturating_sub(1)))
            .collect();
        Self { delays }
    }

    /// Single attempt, no waiting.
    pub fn once() -> Self {
        Self {
            delays: vec![Duration::ZERO],
        }
    }

    /// Number of attempts the schedule allows (at least one).
    pub fn attempts(&self) -> usize {
        self.delays.len().max(1)
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    fn delay_after(&self, attempt: usize) -> Duration {
        self.delays
            .get(attempt.saturating_sub(1))
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every scheduled attempt failed; carries the last failure.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: E },

    /// Failure that retrying cannot fix; returned on the attempt that produced it.
    #[error("{0}")]
    Permanent(E),

    #[error("cancelled")]
    Cancelled,
}

/// Runs `op` under `schedule`.
///
/// Non-retryable errors are returned immediately as `Permanent`. The last
/// schedule entry is never slept: once the final attempt fails the error is
/// terminal.
pub async fn retry<T, E, F, Fut>(
    schedule: &RetrySchedule,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let attempts = schedule.attempts();
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            res = op() => res,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(RetryError::Permanent(e)),
            Err(e) => e,
        };

        if attempt >= attempts {
            return Err(RetryError::Exhausted { attempts: attempt, last: err });
        }

        let delay = schedule.delay_after(attempt);
        warn!(
            attempt,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
