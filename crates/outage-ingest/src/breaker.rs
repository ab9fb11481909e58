//! Circuit breaker guarding the near-real-time fetch loop.
//!
//! ```text
//! CLOSED --(failures >= threshold)--> OPEN
//! OPEN --(recovery timeout elapsed, on can_execute)--> HALF_OPEN
//! HALF_OPEN --(success)--> CLOSED
//! HALF_OPEN --(failure)--> OPEN
//! ```

use std::{
  sync::{Mutex, PoisonError},
  time::Duration,
};

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
  Closed,
  Open,
  HalfOpen,
}

/// Point-in-time view of a breaker, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
  pub state:                BreakerState,
  pub consecutive_failures: u32,
  pub last_failure:         Option<Instant>,
  pub failure_threshold:    u32,
  pub recovery_timeout:     Duration,
}

#[derive(Debug)]
struct Inner {
  state:        BreakerState,
  failures:     u32,
  last_failure: Option<Instant>,
}

/// Never fails. Share one breaker between tasks behind an `Arc`.
#[derive(Debug)]
pub struct CircuitBreaker {
  failure_threshold: u32,
  recovery_timeout:  Duration,
  inner:             Mutex<Inner>,
}

impl Default for CircuitBreaker {
  fn default() -> Self { Self::new(3, Duration::from_secs(600)) }
}

impl CircuitBreaker {
  pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
    Self {
      failure_threshold: failure_threshold.max(1),
      recovery_timeout,
      inner: Mutex::new(Inner {
        state:        BreakerState::Closed,
        failures:     0,
        last_failure: None,
      }),
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Whether a call may go ahead now. An open breaker whose recovery timeout
  /// has elapsed moves to half-open and lets one probe through.
  pub fn can_execute(&self) -> bool {
    let mut inner = self.lock();
    match inner.state {
      BreakerState::Closed | BreakerState::HalfOpen => true,
      BreakerState::Open => {
        let recovered = inner
          .last_failure
          .is_none_or(|at| at.elapsed() >= self.recovery_timeout);
        if recovered {
          inner.state = BreakerState::HalfOpen;
          tracing::info!("circuit half-open, allowing probe");
        }
        recovered
      }
    }
  }

  pub fn record_success(&self) {
    let mut inner = self.lock();
    if inner.state != BreakerState::Closed {
      tracing::info!(from = ?inner.state, "circuit closed");
    }
    inner.state = BreakerState::Closed;
    inner.failures = 0;
    inner.last_failure = None;
  }

  pub fn record_failure(&self) {
    let mut inner = self.lock();
    match inner.state {
      BreakerState::HalfOpen => inner.failures = self.failure_threshold,
      _ => inner.failures = inner.failures.saturating_add(1),
    }
    if inner.failures >= self.failure_threshold {
      let reopened = inner.state != BreakerState::Open;
      inner.state = BreakerState::Open;
      inner.last_failure = Some(Instant::now());
      if reopened {
        tracing::warn!(
          failures = inner.failures,
          recovery_secs = self.recovery_timeout.as_secs(),
          "circuit open"
        );
      }
    }
  }

  pub fn state(&self) -> BreakerState { self.lock().state }

  pub fn snapshot(&self) -> BreakerSnapshot {
    let inner = self.lock();
    BreakerSnapshot {
      state:                inner.state,
      consecutive_failures: inner.failures,
      last_failure:         inner.last_failure,
      failure_threshold:    self.failure_threshold,
      recovery_timeout:     self.recovery_timeout,
    }
  }
}
