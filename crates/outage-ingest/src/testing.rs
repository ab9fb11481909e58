//! Test doubles shared by the unit tests of this crate.

use std::{
  collections::HashSet,
  sync::atomic::{AtomicU32, AtomicUsize, Ordering},
  time::Duration,
};

use chrono::NaiveDate;
use outage_core::{
  failure::{Classify, FailureKind},
  observation::{FetchedSnapshot, RawObservation, SamplePoint, ServerClock},
  source::ObservationSource,
};
use outage_store_sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
#[error("fake upstream failure ({0:?})")]
pub struct FakeError(pub FailureKind);

impl Classify for FakeError {
  fn failure_kind(&self) -> FailureKind { self.0 }
}

/// A store covering 2024.
pub async fn seeded_store() -> SqliteStore {
  let store = SqliteStore::open_in_memory().await.expect("in-memory store");
  store
    .seed_time_dimension(
      NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
      NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
    )
    .await
    .expect("seed time dimension");
  store
}

/// Scripted upstream. By default every fetch answers `rows` with a clock of
/// 2024-01-20 15:30.
#[derive(Debug, Default)]
pub struct FakeSource {
  rows:          Vec<RawObservation>,
  per_point:     bool,
  fail_first:    u32,
  fail_kind:     Option<FailureKind>,
  fail_hours:    HashSet<u32>,
  delay:         Duration,
  calls:         AtomicU32,
  in_flight:     AtomicUsize,
  max_in_flight: AtomicUsize,
}

impl FakeSource {
  pub fn ok(rows: Vec<RawObservation>) -> Self { Self { rows, ..Default::default() } }

  /// Fail the first `n` calls with `kind`, then answer `rows`.
  pub fn failing_then_ok(n: u32, kind: FailureKind, rows: Vec<RawObservation>) -> Self {
    Self { rows, fail_first: n, fail_kind: Some(kind), ..Default::default() }
  }

  /// One distinct row per point, dated on the point with the point's hour
  /// as the server clock.
  pub fn per_point() -> Self { Self { per_point: true, ..Default::default() } }

  /// Always reject points at these hours.
  pub fn failing_hours(mut self, hours: impl IntoIterator<Item = u32>) -> Self {
    self.fail_hours = hours.into_iter().collect();
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn calls(&self) -> u32 { self.calls.load(Ordering::SeqCst) }

  pub fn max_in_flight(&self) -> usize { self.max_in_flight.load(Ordering::SeqCst) }

  fn snapshot(&self, point: SamplePoint) -> FetchedSnapshot {
    if !self.per_point {
      return FetchedSnapshot {
        observations: self.rows.clone(),
        server_clock: ServerClock::at(
          NaiveDate::from_ymd_opt(2024, 1, 20)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap(),
        ),
      };
    }
    let date = point.date.format("%d/%m/%Y").to_string();
    FetchedSnapshot {
      observations: vec![RawObservation::new(
        "LOS LAGOS",
        "OSORNO",
        "SAESA",
        i64::from(point.hour) + 1,
        &date,
        "0 Dias 0 Horas 5 Minutos",
      )],
      server_clock: ServerClock::at(point.date.and_hms_opt(point.hour, 0, 0).unwrap()),
    }
  }
}

impl ObservationSource for FakeSource {
  type Error = FakeError;

  async fn fetch(&self, point: SamplePoint) -> Result<FetchedSnapshot, FakeError> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst);
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);

    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    if self.fail_hours.contains(&point.hour) {
      return Err(FakeError(FailureKind::Rejected));
    }
    if let Some(kind) = self.fail_kind
      && call < self.fail_first
    {
      return Err(FakeError(kind));
    }
    Ok(self.snapshot(point))
  }
}
