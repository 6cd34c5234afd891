//! Exponential backoff for completion calls.
//!
//! Each attempt's result is classified into an [`Attempt`]; a small state
//! machine ([`RetryState`]) decides whether to stop or back off. The delay
//! starts at `initial_delay`, is multiplied by `exponential_base` after every
//! retry and is capped at `max_delay`. At most `max_retries + 1` attempts are
//! made.

use crate::error::{RagError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Retryable(RagError),
    Fatal(RagError),
}

impl<T> Attempt<T> {
    pub fn classify(result: Result<T>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(err) if err.is_retryable() => Attempt::Retryable(err),
            Err(err) => Attempt::Fatal(err),
        }
    }
}

/// Where the retry loop stands after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// About to make attempt number `attempt` (1-based).
    Attempting { attempt: u32, delay: Duration },
    /// Attempt `attempt` failed transiently; sleep `delay` before the next.
    Backoff { attempt: u32, delay: Duration },
    Succeeded,
    /// A fatal error ended the loop.
    Failed,
    /// Retryable failures used up every attempt.
    Exhausted,
}

/// Suspends the retry loop between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn start(&self) -> RetryState {
        RetryState::Attempting {
            attempt: 1,
            delay: self.initial_delay.min(self.max_delay),
        }
    }

    /// Delay following `delay`, capped at `max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let scaled = delay.as_secs_f64() * self.exponential_base.max(1.0);
        Duration::try_from_secs_f64(scaled)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Transition out of `Attempting` given the attempt's outcome.
    pub fn after_attempt<T>(&self, attempt: u32, delay: Duration, outcome: &Attempt<T>) -> RetryState {
        match outcome {
            Attempt::Success(_) => RetryState::Succeeded,
            Attempt::Fatal(_) => RetryState::Failed,
            Attempt::Retryable(_) if attempt > self.max_retries => RetryState::Exhausted,
            Attempt::Retryable(_) => RetryState::Backoff { attempt, delay },
        }
    }

    /// Transition out of `Backoff` once the sleep is over.
    pub fn after_backoff(&self, attempt: u32, delay: Duration) -> RetryState {
        RetryState::Attempting {
            attempt: attempt + 1,
            delay: self.next_delay(delay),
        }
    }

    /// The sleeps that would occur if every attempt failed transiently.
    pub fn schedule(&self) -> Vec<Duration> {
        let mut delays = Vec::with_capacity(self.max_retries as usize);
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 0..self.max_retries {
            delays.push(delay);
            delay = self.next_delay(delay);
        }
        delays
    }

    /// Run `operation` until it succeeds, fails fatally or runs out of attempts.
    ///
    /// The last error is returned on failure.
    pub async fn execute<T, F, Fut>(&self, sleeper: &dyn Sleeper, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut state = self.start();

        loop {
            let RetryState::Attempting { attempt, delay } = state else {
                unreachable!("retry loop only resumes in the Attempting state");
            };

            let outcome = Attempt::classify(operation().await);
            state = self.after_attempt(attempt, delay, &outcome);

            match (state, outcome) {
                (RetryState::Succeeded, Attempt::Success(value)) => return Ok(value),
                (RetryState::Backoff { attempt, delay }, Attempt::Retryable(err)) => {
                    warn!(
                        error = %err,
                        attempt,
                        max_attempts = self.max_retries + 1,
                        delay_secs = delay.as_secs_f64(),
                        "retryable API error; backing off"
                    );
                    sleeper.sleep(delay).await;
                    state = self.after_backoff(attempt, delay);
                }
                (RetryState::Exhausted, Attempt::Retryable(err)) => {
                    warn!(error = %err, attempts = attempt, "retries exhausted");
                    return Err(err);
                }
                (_, Attempt::Fatal(err)) | (_, Attempt::Retryable(err)) => return Err(err),
                (_, Attempt::Success(value)) => return Ok(value),
            }
        }
    }
}
