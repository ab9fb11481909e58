//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Dates are `YYYY-MM-DD`, times `HH:MM`, server timestamps
//! `YYYY-MM-DD HH:MM:SS`. The time dimension key is the date as an integer
//! `YYYYMMDD`.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use outage_core::{
  UNKNOWN,
  record::{ContentId, FactRow, NormalizedRecord},
};

use crate::{Error, Result};

const DATE: &str = "%Y-%m-%d";
const TIME: &str = "%H:%M";
const TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

// ─── Dates and times ─────────────────────────────────────────────────────────

pub fn encode_date(d: NaiveDate) -> String { d.format(DATE).to_string() }

pub fn encode_time(t: NaiveTime) -> String { t.format(TIME).to_string() }

pub fn decode_time(s: &str) -> Result<NaiveTime> {
  NaiveTime::parse_from_str(s, TIME)
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

pub fn encode_timestamp(ts: NaiveDateTime) -> String {
  ts.format(TIMESTAMP).to_string()
}

pub fn decode_timestamp(s: &str) -> Result<NaiveDateTime> {
  NaiveDateTime::parse_from_str(s, TIMESTAMP)
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

/// `2024-01-18` → `20240118`.
pub fn time_key(d: NaiveDate) -> i64 {
  i64::from(d.year()) * 10_000 + i64::from(d.month()) * 100 + i64::from(d.day())
}

// ─── Natural keys ────────────────────────────────────────────────────────────

/// Replace an empty natural-key component with the unknown sentinel.
pub fn or_unknown(s: &str) -> String {
  let trimmed = s.trim();
  if trimmed.is_empty() { UNKNOWN.to_owned() } else { trimmed.to_owned() }
}

// ─── Fact rows ───────────────────────────────────────────────────────────────

/// A fact ready to bind into the batched insert. Everything is owned so it
/// can move onto the database thread.
#[derive(Debug, Clone)]
pub struct PendingFact {
  pub content_id:        String,
  pub geography_id:      i64,
  pub company_id:        i64,
  pub time_id:           i64,
  pub affected:          i64,
  pub incident_time:     String,
  pub server_timestamp:  String,
  pub incident_date_str: String,
  pub staleness_raw:     String,
}

impl PendingFact {
  pub fn new(
    record: &NormalizedRecord,
    geography_id: i64,
    company_id: i64,
    time_id: i64,
  ) -> Self {
    Self {
      content_id: record.content_id.as_str().to_owned(),
      geography_id,
      company_id,
      time_id,
      affected: record.affected_customer_count,
      incident_time: encode_time(record.incident_time),
      server_timestamp: encode_timestamp(record.server_timestamp),
      incident_date_str: record.incident_date_raw.clone(),
      staleness_raw: record.staleness_raw.clone(),
    }
  }
}

/// A fact row exactly as read from SQLite, before decoding.
#[derive(Debug)]
pub struct RawFactRow {
  pub content_id:        String,
  pub geography_id:      i64,
  pub company_id:        i64,
  pub time_id:           i64,
  pub affected:          i64,
  pub incident_time:     String,
  pub server_timestamp:  String,
  pub incident_date_str: String,
  pub staleness_raw:     String,
}

impl RawFactRow {
  pub fn into_fact(self) -> Result<FactRow> {
    Ok(FactRow {
      content_id:              ContentId::new(self.content_id),
      geography_id:            self.geography_id,
      company_id:              self.company_id,
      time_id:                 self.time_id,
      affected_customer_count: self.affected,
      incident_time:           decode_time(&self.incident_time)?,
      server_timestamp:        decode_timestamp(&self.server_timestamp)?,
      incident_date_string:    self.incident_date_str,
      staleness_raw:           self.staleness_raw,
    })
  }
}
