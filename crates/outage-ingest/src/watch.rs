//! Near-real-time ingestion: one cycle every fixed interval, guarded by a
//! circuit breaker, with an execution log of recent cycles.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use outage_core::{observation::SamplePoint, source::ObservationSource, store::OutageStore};
use serde::Serialize;
use tokio::{sync::watch, time::MissedTickBehavior};

use crate::{breaker::CircuitBreaker, pipeline::Pipeline};

// ─── Execution log ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
  Success,
  /// Persisted, but the quality check flagged some records.
  Partial,
  Error,
  /// The breaker refused the cycle.
  Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
  pub started_at: DateTime<Utc>,
  pub status:     CycleStatus,
  pub records:    usize,
  pub inserted:   usize,
  pub message:    Option<String>,
  pub elapsed_ms: u64,
}

/// Bounded history of recent cycles.
#[derive(Debug, Clone)]
pub struct ExecutionLog {
  capacity: usize,
  entries:  VecDeque<CycleRecord>,
}

impl Default for ExecutionLog {
  fn default() -> Self { Self::new(288) }
}

impl ExecutionLog {
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self { capacity, entries: VecDeque::with_capacity(capacity) }
  }

  pub fn push(&mut self, record: CycleRecord) {
    if self.entries.len() == self.capacity {
      self.entries.pop_front();
    }
    self.entries.push_back(record);
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  pub fn count(&self, status: CycleStatus) -> usize {
    self.entries.iter().filter(|e| e.status == status).count()
  }

  /// Share of attempted cycles that fully succeeded. Skipped cycles were
  /// never attempted and are left out. `None` until a cycle has run.
  pub fn success_rate(&self) -> Option<f64> {
    let attempted = self.len() - self.count(CycleStatus::Skipped);
    (attempted > 0).then(|| self.count(CycleStatus::Success) as f64 / attempted as f64)
  }
}

// ─── Watcher ─────────────────────────────────────────────────────────────────

pub struct Watcher<St, So> {
  pipeline: Pipeline<St, So>,
  breaker:  Arc<CircuitBreaker>,
  interval: Duration,
  log:      ExecutionLog,
}

impl<St, So> Watcher<St, So>
where
  St: OutageStore,
  So: ObservationSource,
{
  pub fn new(pipeline: Pipeline<St, So>, breaker: Arc<CircuitBreaker>, interval: Duration) -> Self {
    Self { pipeline, breaker, interval, log: ExecutionLog::default() }
  }

  pub fn log(&self) -> &ExecutionLog { &self.log }

  /// Run one cycle against `point` and record it.
  pub async fn run_cycle(&mut self, point: SamplePoint) -> CycleStatus {
    let started_at = Utc::now();
    let clock = tokio::time::Instant::now();
    let mut record = CycleRecord {
      started_at,
      status: CycleStatus::Skipped,
      records: 0,
      inserted: 0,
      message: None,
      elapsed_ms: 0,
    };

    if !self.breaker.can_execute() {
      tracing::info!(%point, state = ?self.breaker.state(), "circuit open, skipping cycle");
      record.message = Some("circuit open".to_owned());
      self.log.push(record);
      return CycleStatus::Skipped;
    }

    match self.pipeline.fetch(point).await {
      Err(e) => {
        self.breaker.record_failure();
        tracing::error!(%point, error = %e, "fetch failed");
        record.status = CycleStatus::Error;
        record.message = Some(e.to_string());
      }
      Ok(snapshot) => {
        self.breaker.record_success();
        match self.pipeline.ingest(&snapshot).await {
          Ok(outcome) => {
            record.status = if outcome.flagged > 0 {
              CycleStatus::Partial
            } else {
              CycleStatus::Success
            };
            record.records = outcome.records;
            record.inserted = outcome.saved.inserted;
            tracing::info!(
              %point,
              records = outcome.records,
              inserted = outcome.saved.inserted,
              duplicates = outcome.saved.duplicates,
              skipped = outcome.saved.skipped_missing_time,
              "cycle complete"
            );
          }
          Err(e) => {
            tracing::error!(%point, error = %e, "persisting cycle failed");
            record.status = CycleStatus::Error;
            record.message = Some(e.to_string());
          }
        }
      }
    }

    record.elapsed_ms = clock.elapsed().as_millis() as u64;
    let status = record.status;
    self.log.push(record);
    status
  }

  /// Cycle every interval until `shutdown` flips to `true` or its sender is
  /// dropped. The first cycle runs immediately.
  pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> ExecutionLog {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval_secs = self.interval.as_secs(), "watch loop started");

    loop {
      tokio::select! {
        _ = ticker.tick() => {
          self.run_cycle(SamplePoint::now()).await;
          if let Some(rate) = self.log.success_rate() {
            tracing::debug!(success_rate = rate, cycles = self.log.len(), "execution log");
          }
        }
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
        }
      }
    }

    tracing::info!(
      cycles = self.log.len(),
      success_rate = self.log.success_rate().unwrap_or_default(),
      "watch loop stopped"
    );
    self.log
  }
}
