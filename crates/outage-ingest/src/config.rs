//! Runtime configuration, deserialised from `ingest.toml` and `OUTAGE_*`
//! environment variables.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use outage_core::{content_id::IdPolicy, failure::FailureKind};
use serde::Deserialize;

use crate::{
  breaker::CircuitBreaker,
  retry::{BackoffStrategy, RetryPolicy},
};

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
  pub store_path: PathBuf,
  #[serde(default)]
  pub id_policy:  IdPolicy,
  #[serde(default)]
  pub source:     SourceConfig,
  #[serde(default)]
  pub watch:      WatchConfig,
  #[serde(default)]
  pub retry:      RetryConfig,
  #[serde(default)]
  pub breaker:    BreakerConfig,
  #[serde(default)]
  pub backfill:   BackfillConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
  pub base_url:     String,
  pub timeout_secs: u64,
}

impl Default for SourceConfig {
  fn default() -> Self {
    Self {
      base_url:     "https://apps.sec.cl/INTONLINEv1/ClientesAfectados".to_owned(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
  pub interval_secs: u64,
}

impl Default for WatchConfig {
  fn default() -> Self { Self { interval_secs: 300 } }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts:    u32,
  pub base_delay_secs: f64,
  pub max_delay_secs:  f64,
  pub strategy:        BackoffStrategy,
  pub retry_on:        Vec<FailureKind>,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts:    5,
      base_delay_secs: 2.0,
      max_delay_secs:  60.0,
      strategy:        BackoffStrategy::Exponential,
      retry_on:        FailureKind::TRANSIENT.to_vec(),
    }
  }
}

impl RetryConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy::new(
      self.max_attempts,
      secs(self.base_delay_secs),
      secs(self.max_delay_secs),
      self.strategy,
    )
    .with_retry_on(self.retry_on.iter().copied())
  }
}

/// Negative or non-finite values read as zero.
fn secs(value: f64) -> Duration {
  Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
  pub failure_threshold:     u32,
  pub recovery_timeout_secs: u64,
}

impl Default for BreakerConfig {
  fn default() -> Self { Self { failure_threshold: 3, recovery_timeout_secs: 600 } }
}

impl BreakerConfig {
  pub fn breaker(&self) -> CircuitBreaker {
    CircuitBreaker::new(
      self.failure_threshold,
      Duration::from_secs(self.recovery_timeout_secs),
    )
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
  pub max_concurrent: usize,
  pub hours:          Vec<u32>,
  pub checkpoint_dir: PathBuf,
}

impl Default for BackfillConfig {
  fn default() -> Self {
    Self {
      max_concurrent: 50,
      hours:          vec![0, 6, 12, 18],
      checkpoint_dir: PathBuf::from("outputs"),
    }
  }
}

fn environment() -> config::Environment {
  config::Environment::with_prefix("OUTAGE")
    .prefix_separator("_")
    .separator("__")
    .try_parsing(true)
    .list_separator(",")
    .with_list_parse_key("retry.retry_on")
    .with_list_parse_key("backfill.hours")
}

impl IngestConfig {
  /// Layer `path` (optional) under `OUTAGE_*` environment variables. Nested
  /// keys use `__`, e.g. `OUTAGE_RETRY__MAX_ATTEMPTS=3`. List keys take
  /// comma-separated values, e.g. `OUTAGE_BACKFILL__HOURS=0,12`.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    Self::load_with(path, environment())
  }

  fn load_with(path: &Path, env: config::Environment) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(env)
      .build()?
      .try_deserialize()
  }

  pub fn watch_interval(&self) -> Duration {
    Duration::from_secs(self.watch.interval_secs.max(1))
  }

  pub fn source_timeout(&self) -> Duration { Duration::from_secs(self.source.timeout_secs) }
}
