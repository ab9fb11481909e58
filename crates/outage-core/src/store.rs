//! The `OutageStore` trait: the dimensional fact repository.
//!
//! Implemented by storage backends (e.g. `outage-store-sqlite`). The
//! orchestrator depends on this abstraction, not on a concrete backend.

use std::future::Future;

use chrono::NaiveDate;

use crate::record::{NormalizedRecord, SaveSummary};

/// A star-schema store: geography, company and time dimensions around one
/// fact table keyed by content id.
///
/// Fact writes are idempotent. Writing a record whose content id is already
/// stored is a no-op that is reported as a duplicate, never as an error.
pub trait OutageStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Surrogate id for a (region, comuna) pair, creating the row on first
  /// sight. Stable for the lifetime of the store.
  fn get_or_create_geography<'a>(
    &'a self,
    region: &'a str,
    comuna: &'a str,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + 'a;

  /// Surrogate id for a company name, creating the row on first sight.
  fn get_or_create_company<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + 'a;

  /// Time dimension id for `date`. The time dimension is populated ahead of
  /// time; `None` means the date is not covered.
  fn time_id(
    &self,
    date: NaiveDate,
  ) -> impl Future<Output = Result<Option<i64>, Self::Error>> + Send + '_;

  /// Persist a batch of records in a single transaction. Records whose date
  /// has no time dimension row are skipped.
  fn save_records<'a>(
    &'a self,
    records: &'a [NormalizedRecord],
  ) -> impl Future<Output = Result<SaveSummary, Self::Error>> + Send + 'a;
}
