//! Error types for `outage-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("hour out of range: {0}")]
  InvalidHour(u32),

  #[error("invalid date range: {start} is after {end}")]
  InvalidRange {
    start: chrono::NaiveDate,
    end:   chrono::NaiveDate,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
