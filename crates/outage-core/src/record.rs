//! Normalised records and the rows they become once persisted.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

// ─── ContentId ───────────────────────────────────────────────────────────────

/// Deterministic identifier of one observed outage snapshot. Two records with
/// the same identity fields always produce the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
  /// Wrap an id read back from storage.
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for ContentId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── NormalizedRecord ────────────────────────────────────────────────────────

/// One outage event as seen in one cycle, after cleaning and aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
  pub content_id:              ContentId,
  /// The cycle's reference instant (upstream clock or local fallback).
  pub server_timestamp:        NaiveDateTime,
  pub incident_date:           NaiveDate,
  pub incident_time:           NaiveTime,
  /// Upper-case, accent-stripped, trimmed.
  pub region:                  String,
  pub comuna:                  String,
  pub company:                 String,
  /// Sum over every upstream row for the same event in this cycle.
  pub affected_customer_count: i64,
  /// Incident date exactly as the upstream reported it.
  pub incident_date_raw:       String,
  pub staleness_raw:           String,
  pub age_in_days:             i64,
}

// ─── FactRow ─────────────────────────────────────────────────────────────────

/// A persisted fact with its dimension keys resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactRow {
  pub content_id:              ContentId,
  pub geography_id:            i64,
  pub company_id:              i64,
  pub time_id:                 i64,
  pub affected_customer_count: i64,
  pub incident_time:           NaiveTime,
  pub server_timestamp:        NaiveDateTime,
  pub incident_date_string:    String,
  pub staleness_raw:           String,
}

// ─── SaveSummary ─────────────────────────────────────────────────────────────

/// Outcome of one batch write. Duplicates are normal steady-state traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSummary {
  pub inserted:             usize,
  pub duplicates:           usize,
  /// Records dropped because their date has no row in the time dimension.
  pub skipped_missing_time: usize,
}
