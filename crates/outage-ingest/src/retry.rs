//! Retry with backoff for fallible async operations.
//!
//! A [`RetryPolicy`] is a plain value: build one from configuration and call
//! [`RetryPolicy::execute`] around the operation that may fail.

use std::{fmt::Display, future::Future, time::Duration};

use outage_core::failure::{Classify, FailureKind};
use serde::{Deserialize, Serialize};

/// How the wait grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
  /// `base * 2^attempt`
  #[default]
  Exponential,
  /// `base * (attempt + 1)`
  Linear,
  /// `base * fib(attempt + 1)` with `fib = 1, 1, 2, 3, 5, ..`
  Fibonacci,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  max_attempts: u32,
  base_delay:   Duration,
  max_delay:    Duration,
  strategy:     BackoffStrategy,
  retry_on:     Vec<FailureKind>,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::new(
      5,
      Duration::from_secs(2),
      Duration::from_secs(60),
      BackoffStrategy::Exponential,
    )
  }
}

impl RetryPolicy {
  /// A policy retrying the transient failure kinds. `max_attempts` is
  /// clamped to at least one.
  pub fn new(
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    strategy: BackoffStrategy,
  ) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      base_delay,
      max_delay,
      strategy,
      retry_on: FailureKind::TRANSIENT.to_vec(),
    }
  }

  /// Replace the set of failure kinds worth retrying.
  pub fn with_retry_on(mut self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
    self.retry_on = kinds.into_iter().collect();
    self
  }

  pub fn max_attempts(&self) -> u32 { self.max_attempts }

  pub fn should_retry(&self, kind: FailureKind) -> bool {
    self.retry_on.contains(&kind)
  }

  /// Wait after the 0-indexed `attempt` failed, capped at the max delay.
  pub fn calculate_delay(&self, attempt: u32) -> Duration {
    let factor = match self.strategy {
      BackoffStrategy::Exponential => 2f64.powi(attempt.min(1023) as i32),
      BackoffStrategy::Linear => f64::from(attempt) + 1.0,
      BackoffStrategy::Fibonacci => fibonacci(attempt.saturating_add(1)),
    };
    let secs = self.base_delay.as_secs_f64() * factor;
    if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
      Duration::from_secs_f64(secs)
    } else {
      self.max_delay
    }
  }

  /// Run `op` until it succeeds, fails with a kind outside the retry set, or
  /// runs out of attempts. The last error is returned on exhaustion.
  pub async fn execute<T, E, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, E>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
  {
    let mut attempt = 0;
    loop {
      attempt += 1;
      tracing::debug!(op = op_name, attempt, max = self.max_attempts, "attempt");

      let err = match op().await {
        Ok(value) => {
          if attempt > 1 {
            tracing::info!(op = op_name, attempt, "succeeded after retry");
          }
          return Ok(value);
        }
        Err(err) => err,
      };

      let kind = err.failure_kind();
      if !self.should_retry(kind) {
        tracing::warn!(op = op_name, ?kind, error = %err, "not retryable");
        return Err(err);
      }
      if attempt >= self.max_attempts {
        tracing::error!(op = op_name, attempts = attempt, ?kind, error = %err, "retries exhausted");
        return Err(err);
      }

      let delay = self.calculate_delay(attempt - 1);
      tracing::warn!(
        op = op_name,
        attempt,
        ?kind,
        error = %err,
        delay_ms = delay.as_millis() as u64,
        "attempt failed, backing off"
      );
      tokio::time::sleep(delay).await;
    }
  }
}

/// `fib(1) = fib(2) = 1`. Saturates to infinity for very large `n`.
fn fibonacci(n: u32) -> f64 {
  let (mut a, mut b) = (0f64, 1f64);
  for _ in 1..n.min(2000) {
    (a, b) = (b, a + b);
  }
  if n == 0 { 0.0 } else { b }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use tokio::time::Instant;

  use super::*;

  #[derive(Debug)]
  struct Flaky(FailureKind);

  impl Display for Flaky {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      write!(f, "flaky: {:?}", self.0)
    }
  }

  impl Classify for Flaky {
    fn failure_kind(&self) -> FailureKind { self.0 }
  }

  fn policy(strategy: BackoffStrategy) -> RetryPolicy {
    RetryPolicy::new(5, Duration::from_secs(2), Duration::from_secs(60), strategy)
  }

  fn secs(policy: &RetryPolicy, attempts: std::ops::Range<u32>) -> Vec<u64> {
    attempts.map(|a| policy.calculate_delay(a).as_secs()).collect()
  }

  #[test]
  fn exponential_delays() {
    let p = policy(BackoffStrategy::Exponential);
    assert_eq!(secs(&p, 0..6), [2, 4, 8, 16, 32, 60]);
    assert_eq!(p.calculate_delay(5000), Duration::from_secs(60));
  }

  #[test]
  fn linear_delays() {
    let p = policy(BackoffStrategy::Linear);
    assert_eq!(secs(&p, 0..4), [2, 4, 6, 8]);
    assert_eq!(p.calculate_delay(100), Duration::from_secs(60));
  }

  #[test]
  fn fibonacci_delays() {
    let p = policy(BackoffStrategy::Fibonacci);
    assert_eq!(secs(&p, 0..6), [2, 2, 4, 6, 10, 16]);
    assert_eq!(p.calculate_delay(u32::MAX - 1), Duration::from_secs(60));
  }

  #[test]
  fn zero_attempts_clamped_to_one() {
    let p = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO, BackoffStrategy::Linear);
    assert_eq!(p.max_attempts(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn retries_until_success() {
    let p = policy(BackoffStrategy::Exponential);
    let calls = &AtomicU32::new(0);
    let started = Instant::now();

    let result = p
      .execute("op", move || async move {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
          Err(Flaky(FailureKind::Timeout))
        } else {
          Ok(42)
        }
      })
      .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 2s after the first failure, 4s after the second.
    assert_eq!(started.elapsed(), Duration::from_secs(6));
  }

  #[tokio::test(start_paused = true)]
  async fn exhaustion_returns_last_error() {
    let p = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10), BackoffStrategy::Linear);
    let calls = &AtomicU32::new(0);

    let result: Result<(), _> = p
      .execute("op", move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(Flaky(FailureKind::Server))
      })
      .await;

    assert_eq!(result.unwrap_err().0, FailureKind::Server);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn kinds_outside_allow_list_propagate_immediately() {
    let p = policy(BackoffStrategy::Exponential);
    let calls = &AtomicU32::new(0);
    let started = Instant::now();

    let result: Result<(), _> = p
      .execute("op", move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(Flaky(FailureKind::Rejected))
      })
      .await;

    assert_eq!(result.unwrap_err().0, FailureKind::Rejected);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
  }

  #[tokio::test(start_paused = true)]
  async fn custom_allow_list() {
    let p = policy(BackoffStrategy::Linear).with_retry_on([FailureKind::Decode]);
    let calls = &AtomicU32::new(0);

    let _ = p
      .execute("op", move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(Flaky(FailureKind::Decode))
      })
      .await;
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    calls.store(0, Ordering::SeqCst);
    let _ = p
      .execute("op", move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(Flaky(FailureKind::Timeout))
      })
      .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
