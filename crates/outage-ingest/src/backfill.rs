//! Historical backfill over a date range.
//!
//! The range is expanded into (date, hour) sample points and grouped into
//! calendar-month units. Each unit runs its points through a bounded
//! concurrent stream. A point's failure is recorded and never cancels its
//! siblings. Completed units are checkpointed and skipped on the next run.

use chrono::NaiveDate;
use futures::{StreamExt as _, future, stream};
use outage_core::{
  failure::{Classify, FailureKind},
  observation::{SamplePoint, sample_grid},
  source::ObservationSource,
  store::OutageStore,
};
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, time::Instant};

use crate::{
  Error, Result,
  checkpoint::{Checkpoint, CheckpointDir, CheckpointMetadata},
  pipeline::{IngestOutcome, Pipeline},
};

// ─── Point state ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointState {
  Pending,
  InFlight,
  Succeeded,
  Failed,
}

impl PointState {
  pub fn is_terminal(self) -> bool { matches!(self, Self::Succeeded | Self::Failed) }

  pub fn can_become(self, next: PointState) -> bool {
    matches!(
      (self, next),
      (Self::Pending, Self::InFlight)
        | (Self::InFlight, Self::Succeeded)
        | (Self::InFlight, Self::Failed)
    )
  }
}

/// The fate of one sample point, as stored in checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointResult {
  pub point:   SamplePoint,
  pub state:   PointState,
  #[serde(default)]
  pub outcome: Option<IngestOutcomeSummary>,
  #[serde(default)]
  pub kind:    Option<FailureKind>,
  #[serde(default)]
  pub error:   Option<String>,
}

/// The checkpointed subset of an [`IngestOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcomeSummary {
  pub observations: usize,
  pub records:      usize,
  pub inserted:     usize,
  pub duplicates:   usize,
}

impl From<IngestOutcome> for IngestOutcomeSummary {
  fn from(o: IngestOutcome) -> Self {
    Self {
      observations: o.observations,
      records:      o.records,
      inserted:     o.saved.inserted,
      duplicates:   o.saved.duplicates,
    }
  }
}

impl PointResult {
  pub fn new(point: SamplePoint) -> Self {
    Self { point, state: PointState::Pending, outcome: None, kind: None, error: None }
  }

  pub fn transition(&mut self, next: PointState) -> Result<()> {
    if !self.state.can_become(next) {
      return Err(Error::InvalidTransition { point: self.point, from: self.state, to: next });
    }
    self.state = next;
    Ok(())
  }

  pub fn succeeded(&self) -> bool { self.state == PointState::Succeeded }

  fn records(&self) -> usize { self.outcome.map_or(0, |o| o.records) }

  fn inserted(&self) -> usize { self.outcome.map_or(0, |o| o.inserted) }
}

// ─── Units ───────────────────────────────────────────────────────────────────

/// All sample points of one calendar month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillUnit {
  /// `YYYY_MM`
  pub id:     String,
  pub points: Vec<SamplePoint>,
}

pub fn plan_units(start: NaiveDate, end: NaiveDate, hours: &[u32]) -> Result<Vec<BackfillUnit>> {
  let mut units: Vec<BackfillUnit> = Vec::new();
  for point in sample_grid(start, end, hours)? {
    let id = format!("{:04}_{:02}", point.year(), point.month());
    match units.last_mut() {
      Some(unit) if unit.id == id => unit.points.push(point),
      _ => units.push(BackfillUnit { id, points: vec![point] }),
    }
  }
  Ok(units)
}

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
  pub units_total:         usize,
  pub units_skipped:       usize,
  pub units_completed:     usize,
  pub points_succeeded:    usize,
  pub points_failed:       usize,
  pub records:             usize,
  pub inserted:            usize,
  /// Units whose points all ran but whose checkpoint could not be written.
  /// They are picked up again by the next run.
  pub checkpoint_failures: usize,
  /// Shutdown was requested before every unit finished.
  pub interrupted:         bool,
}

// ─── Backfill ────────────────────────────────────────────────────────────────

pub struct Backfill<St, So> {
  pipeline:       Pipeline<St, So>,
  max_concurrent: usize,
  checkpoints:    CheckpointDir,
}

impl<St, So> Backfill<St, So>
where
  St: OutageStore,
  So: ObservationSource,
{
  pub fn new(pipeline: Pipeline<St, So>, max_concurrent: usize, checkpoints: CheckpointDir) -> Self {
    Self { pipeline, max_concurrent: max_concurrent.max(1), checkpoints }
  }

  /// Backfill `start..=end` at the given hours. Stops submitting new points
  /// once `shutdown` reads `true`; points already in flight finish.
  pub async fn run(
    &self,
    start: NaiveDate,
    end: NaiveDate,
    hours: &[u32],
    shutdown: watch::Receiver<bool>,
  ) -> Result<BackfillReport> {
    let units = plan_units(start, end, hours)?;
    let mut report = BackfillReport { units_total: units.len(), ..Default::default() };
    tracing::info!(
      %start,
      %end,
      units = units.len(),
      max_concurrent = self.max_concurrent,
      "backfill started"
    );

    for unit in &units {
      if *shutdown.borrow() {
        report.interrupted = true;
        break;
      }
      let checkpointed = match self.checkpoints.exists(&unit.id).await {
        Ok(found) => found,
        Err(e) => {
          tracing::error!(unit = %unit.id, error = %e, "checkpoint lookup failed, running unit");
          false
        }
      };
      if checkpointed {
        tracing::info!(unit = %unit.id, "checkpoint found, skipping unit");
        report.units_skipped += 1;
        continue;
      }

      let started = Instant::now();
      let results = self.run_unit(unit, &shutdown).await?;

      let succeeded = results.iter().filter(|r| r.succeeded()).count();
      report.points_succeeded += succeeded;
      report.points_failed += results.len() - succeeded;
      report.records += results.iter().map(PointResult::records).sum::<usize>();
      report.inserted += results.iter().map(PointResult::inserted).sum::<usize>();

      if results.len() < unit.points.len() {
        tracing::warn!(
          unit = %unit.id,
          done = results.len(),
          total = unit.points.len(),
          "shutdown requested, unit left without checkpoint"
        );
        report.interrupted = true;
        break;
      }

      let checkpoint = Checkpoint {
        metadata: CheckpointMetadata {
          unit_id:       unit.id.clone(),
          total_points:  unit.points.len(),
          successful:    succeeded,
          total_records: results.iter().map(PointResult::records).sum(),
          duration:      started.elapsed().as_secs_f64(),
        },
        data:     results,
      };
      if let Err(e) = self.checkpoints.write(&checkpoint).await {
        tracing::error!(unit = %unit.id, error = %e, "checkpoint write failed, unit will re-run");
        report.checkpoint_failures += 1;
        continue;
      }
      report.units_completed += 1;
      tracing::info!(
        unit = %unit.id,
        successful = succeeded,
        total = unit.points.len(),
        secs = checkpoint.metadata.duration,
        "unit complete"
      );
    }

    tracing::info!(
      units_completed = report.units_completed,
      units_skipped = report.units_skipped,
      points_failed = report.points_failed,
      inserted = report.inserted,
      checkpoint_failures = report.checkpoint_failures,
      interrupted = report.interrupted,
      "backfill finished"
    );
    Ok(report)
  }

  /// Results come back in completion order.
  async fn run_unit(
    &self,
    unit: &BackfillUnit,
    shutdown: &watch::Receiver<bool>,
  ) -> Result<Vec<PointResult>> {
    stream::iter(unit.points.iter().copied())
      .take_while(|_| future::ready(!*shutdown.borrow()))
      .map(|point| self.run_point(point))
      .buffer_unordered(self.max_concurrent)
      .collect::<Vec<_>>()
      .await
      .into_iter()
      .collect()
  }

  async fn run_point(&self, point: SamplePoint) -> Result<PointResult> {
    let mut result = PointResult::new(point);
    result.transition(PointState::InFlight)?;

    match self.pipeline.run_point(point).await {
      Ok(outcome) => {
        result.outcome = Some(outcome.into());
        result.transition(PointState::Succeeded)?;
      }
      Err(e) => {
        tracing::warn!(%point, error = %e, "point failed");
        result.kind = Some(e.failure_kind());
        result.error = Some(e.to_string());
        result.transition(PointState::Failed)?;
      }
    }
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use outage_core::normalize::Normalizer;
  use outage_store_sqlite::SqliteStore;

  use super::*;
  use crate::{
    retry::RetryPolicy,
    testing::{FakeSource, seeded_store},
  };

  fn date(m: u32, d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2024, m, d).unwrap() }

  fn backfill(
    store: SqliteStore,
    source: Arc<FakeSource>,
    max_concurrent: usize,
    dir: &std::path::Path,
  ) -> Backfill<SqliteStore, FakeSource> {
    let pipeline = Pipeline::new(
      Arc::new(store),
      source,
      Normalizer::default(),
      RetryPolicy::new(1, Duration::ZERO, Duration::ZERO, Default::default()),
    );
    Backfill::new(pipeline, max_concurrent, CheckpointDir::new(dir))
  }

  fn running() -> watch::Receiver<bool> { watch::channel(false).1 }

  #[test]
  fn units_follow_calendar_months() {
    let units = plan_units(date(1, 30), date(2, 2), &[0, 12]).unwrap();
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].id, "2024_01");
    assert_eq!(units[0].points.len(), 4);
    assert_eq!(units[1].id, "2024_02");
    assert_eq!(units[1].points.len(), 4);
  }

  #[test]
  fn terminal_states_reject_transitions() {
    let mut r = PointResult::new(SamplePoint::new(date(1, 1), 0).unwrap());
    assert!(matches!(
      r.transition(PointState::Succeeded),
      Err(Error::InvalidTransition { from: PointState::Pending, .. })
    ));

    r.transition(PointState::InFlight).unwrap();
    r.transition(PointState::Failed).unwrap();
    assert!(r.state.is_terminal());
    assert!(r.transition(PointState::InFlight).is_err());
    assert!(r.transition(PointState::Succeeded).is_err());
  }

  #[tokio::test]
  async fn full_run_writes_a_checkpoint_per_month() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::per_point());
    let b = backfill(seeded_store().await, source.clone(), 8, dir.path());

    let report = b
      .run(date(1, 1), date(2, 3), &[0, 6, 12, 18], running())
      .await
      .unwrap();

    assert_eq!(report.units_completed, 2);
    assert_eq!(report.points_succeeded, 136);
    assert_eq!(report.points_failed, 0);
    assert_eq!(report.inserted, 136);
    assert!(!report.interrupted);
    assert_eq!(b.pipeline.store().fact_count().await.unwrap(), 136);

    let jan = b.checkpoints.read("2024_01").await.unwrap().unwrap();
    assert_eq!(jan.metadata.total_points, 124);
    assert_eq!(jan.metadata.successful, 124);
    assert_eq!(jan.metadata.total_records, 124);
    assert_eq!(jan.data.len(), 124);
  }

  #[tokio::test]
  async fn failures_do_not_abort_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::per_point().failing_hours([6]));
    let b = backfill(seeded_store().await, source, 4, dir.path());

    let report = b
      .run(date(3, 1), date(3, 10), &[0, 6, 12, 18], running())
      .await
      .unwrap();

    assert_eq!(report.points_failed, 10);
    assert_eq!(report.points_succeeded, 30);

    let march = b.checkpoints.read("2024_03").await.unwrap().unwrap();
    assert_eq!(march.metadata.successful, 30);
    let failed: Vec<_> = march.data.iter().filter(|r| !r.succeeded()).collect();
    assert!(failed.iter().all(|r| r.point.hour == 6 && r.kind == Some(FailureKind::Rejected)));
  }

  #[tokio::test]
  async fn completed_units_are_skipped_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store().await;

    let first = backfill(store.clone(), Arc::new(FakeSource::per_point()), 4, dir.path());
    first.run(date(4, 1), date(5, 5), &[0], running()).await.unwrap();

    let source = Arc::new(FakeSource::per_point());
    let second = backfill(store, source.clone(), 4, dir.path());
    let report = second.run(date(4, 1), date(6, 3), &[0], running()).await.unwrap();

    assert_eq!(report.units_skipped, 2);
    assert_eq!(report.units_completed, 1);
    assert_eq!(source.calls(), 3);
  }

  #[tokio::test]
  async fn unwritable_checkpoints_do_not_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"").unwrap();
    let source = Arc::new(FakeSource::per_point());
    let b = backfill(seeded_store().await, source.clone(), 4, &blocker);

    let report = b.run(date(1, 1), date(3, 1), &[0], running()).await.unwrap();

    assert_eq!(source.calls(), 61);
    assert_eq!(report.points_succeeded, 61);
    assert_eq!(report.units_completed, 0);
    assert_eq!(report.checkpoint_failures, 3);
    assert!(!report.interrupted);
    assert_eq!(b.pipeline.store().fact_count().await.unwrap(), 61);
  }

  #[tokio::test]
  async fn concurrency_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::per_point().with_delay(Duration::from_millis(20)));
    let b = backfill(seeded_store().await, source.clone(), 3, dir.path());

    let report = b
      .run(date(6, 1), date(6, 5), &[0, 6, 12, 18], running())
      .await
      .unwrap();

    assert_eq!(report.points_succeeded, 20);
    assert!(source.max_in_flight() <= 3);
    assert!(source.max_in_flight() > 1);
  }

  #[tokio::test]
  async fn shutdown_stops_before_new_work() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::per_point());
    let b = backfill(seeded_store().await, source.clone(), 4, dir.path());
    let (_tx, rx) = watch::channel(true);

    let report = b.run(date(7, 1), date(7, 31), &[0], rx).await.unwrap();

    assert!(report.interrupted);
    assert_eq!(report.units_completed, 0);
    assert_eq!(source.calls(), 0);
    assert!(!b.checkpoints.exists("2024_07").await.unwrap());
  }
}
