//! Backoff policy and the retry loop shared by both pipelines.
//!
//! The decision logic is a plain iterator over `{attempt, delay}` steps so it
//! can be tested without any clock; `run_with_retry` is the only place that
//! actually sleeps.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How failed remote calls are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// First failure is terminal.
    NoRetry,
    /// Exponential backoff, giving up after `max_retries` retries.
    #[default]
    ExponentialBackoffLimited,
    /// Exponential backoff with no attempt bound.
    ExponentialBackoffUnlimited,
}

/// Backoff configuration attached to a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub strategy: RetryStrategy,
    /// Retries after the first attempt; only meaningful for the limited strategy.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::default(),
            max_retries: default_max_retries(),
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            exponential_base: default_exponential_base(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_secs() -> f64 {
    1.0
}

fn default_max_delay_secs() -> f64 {
    60.0
}

fn default_exponential_base() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            strategy: RetryStrategy::NoRetry,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.initial_delay_secs.is_finite() || self.initial_delay_secs < 0.0 {
            return Err(Error::config("initial_delay_secs must be >= 0"));
        }
        if !self.max_delay_secs.is_finite() || self.max_delay_secs < self.initial_delay_secs {
            return Err(Error::config("max_delay_secs must be >= initial_delay_secs"));
        }
        if !self.exponential_base.is_finite() || self.exponential_base <= 0.0 {
            return Err(Error::config("exponential_base must be > 0"));
        }
        Ok(())
    }

    /// Whether another attempt should follow failed attempt `attempt` (zero-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self.strategy {
            RetryStrategy::NoRetry => false,
            RetryStrategy::ExponentialBackoffLimited => attempt < self.max_retries,
            RetryStrategy::ExponentialBackoffUnlimited => true,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt`.
    ///
    /// `min(initial * base^attempt, max)`, optionally perturbed by a uniform
    /// offset in [-25%, +25%] of itself. Never negative.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self.initial_delay_secs * self.exponential_base.powf(f64::from(attempt));
        let mut delay = exponential.min(self.max_delay_secs);
        if self.jitter {
            let offset: f64 = rand::thread_rng().gen_range(-0.25..=0.25);
            delay += delay * offset;
        }
        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Iterator over the retry steps this policy allows.
    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule {
            policy: *self,
            attempt: 0,
        }
    }
}

/// One step of a backoff schedule: the zero-based index of the attempt that
/// just failed, and the delay to wait before trying again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub delay: Duration,
}

/// Iterator over retry steps. Stops yielding once the policy gives up; the
/// consumer owns the actual suspension.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    attempt: u32,
}

impl Iterator for RetrySchedule {
    type Item = RetryAttempt;

    fn next(&mut self) -> Option<RetryAttempt> {
        if !self.policy.should_retry(self.attempt) {
            return None;
        }
        let step = RetryAttempt {
            attempt: self.attempt,
            delay: self.policy.delay_for(self.attempt),
        };
        self.attempt = self.attempt.saturating_add(1);
        Some(step)
    }
}

/// Run `call` until it succeeds, the policy gives up, or a permanent error
/// surfaces. Permanent errors bypass the schedule entirely.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut schedule = policy.schedule();
    let mut attempt: u32 = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => match schedule.next() {
                Some(step) => {
                    tracing::warn!(
                        "{} failed (attempt {}): {}; retrying in {:.2}s",
                        operation,
                        step.attempt + 1,
                        err,
                        step.delay.as_secs_f64()
                    );
                    tokio::time::sleep(step.delay).await;
                    attempt = step.attempt.saturating_add(1);
                }
                None => {
                    tracing::error!("{} failed after {} attempts: {}", operation, attempt + 1, err);
                    return Err(err);
                }
            },
            Err(err) => return Err(err),
        }
    }
}
