//! Ingress types: what the upstream source hands to the pipeline each cycle.
//!
//! The upstream payload is loosely shaped. Everything here is converted into
//! a typed value at the boundary so later stages never branch on shape.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// Format of the upstream server clock, e.g. `20/01/2024 15:30`.
pub const CLOCK_FORMAT: &str = "%d/%m/%Y %H:%M";

// ─── RawObservation ──────────────────────────────────────────────────────────

/// One row as reported by the upstream. A single real-world outage may be
/// split across several rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawObservation {
  #[serde(rename = "NOMBRE_REGION", default)]
  pub region:                  Option<String>,
  /// Locality.
  #[serde(rename = "NOMBRE_COMUNA", default)]
  pub comuna:                  Option<String>,
  #[serde(rename = "NOMBRE_EMPRESA", default)]
  pub company:                 Option<String>,
  #[serde(
    rename = "CLIENTES_AFECTADOS",
    default,
    deserialize_with = "lenient_count"
  )]
  pub affected_customer_count: i64,
  /// `DD/MM/YYYY`, sometimes followed by ` HH:MM`.
  #[serde(rename = "FECHA_INT_STR", default)]
  pub incident_date:           String,
  /// `N Dias M Horas K Minutos`.
  #[serde(rename = "ACTUALIZADO_HACE", default)]
  pub staleness:               String,
}

impl RawObservation {
  /// Convenience constructor used by tests and fake sources.
  pub fn new(
    region: &str,
    comuna: &str,
    company: &str,
    affected_customer_count: i64,
    incident_date: &str,
    staleness: &str,
  ) -> Self {
    Self {
      region: Some(region.to_owned()),
      comuna: Some(comuna.to_owned()),
      company: Some(company.to_owned()),
      affected_customer_count,
      incident_date: incident_date.to_owned(),
      staleness: staleness.to_owned(),
    }
  }
}

/// The upstream sends counts as numbers, numeric strings or null.
fn lenient_count<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Option::<serde_json::Value>::deserialize(deserializer)?;
  Ok(match value {
    Some(serde_json::Value::Number(n)) => n
      .as_i64()
      .or_else(|| n.as_f64().map(|f| f as i64))
      .unwrap_or(0),
    Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
    _ => 0,
  })
}

// ─── ServerClock ─────────────────────────────────────────────────────────────

/// The upstream's own notion of "now" for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerClock {
  /// Text exactly as received, if any.
  pub raw_text: Option<String>,
  pub parsed:   Option<NaiveDateTime>,
}

impl ServerClock {
  /// Build from whatever shape the upstream returned: a list of
  /// `{"FECHA": ".."}` objects, a single such object, a bare string, or
  /// nothing at all.
  pub fn from_payload(payload: &serde_json::Value) -> Self {
    use serde_json::Value;

    let text = match payload {
      Value::String(s) => Some(s.as_str()),
      Value::Array(items) => items.first().and_then(|first| match first {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("FECHA").and_then(Value::as_str),
        _ => None,
      }),
      Value::Object(map) => map.get("FECHA").and_then(Value::as_str),
      _ => None,
    };
    Self::from_text(text)
  }

  pub fn from_text(text: Option<&str>) -> Self {
    let raw_text = text.map(str::to_owned);
    let parsed = text.and_then(|t| {
      NaiveDateTime::parse_from_str(t.trim(), CLOCK_FORMAT).ok()
    });
    Self { raw_text, parsed }
  }

  /// A clock that parsed successfully at `at`.
  pub fn at(at: NaiveDateTime) -> Self {
    Self {
      raw_text: Some(at.format(CLOCK_FORMAT).to_string()),
      parsed:   Some(at),
    }
  }

  /// A clock that was absent from the upstream response.
  pub fn missing() -> Self { Self::default() }

  pub fn parsed_ok(&self) -> bool { self.parsed.is_some() }

  /// The reference instant for this cycle, falling back to local wall-clock
  /// time when the upstream clock is absent or unparseable.
  pub fn reference(&self) -> NaiveDateTime {
    match self.parsed {
      Some(at) => at,
      None => {
        tracing::warn!(
          raw = ?self.raw_text,
          "server clock unavailable, using local time as reference"
        );
        Local::now().naive_local()
      }
    }
  }
}

// ─── Fetch contract ──────────────────────────────────────────────────────────

/// One query coordinate against the upstream: a calendar date and an hour.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SamplePoint {
  pub date: NaiveDate,
  pub hour: u32,
}

impl SamplePoint {
  pub fn new(date: NaiveDate, hour: u32) -> Result<Self> {
    if hour > 23 {
      return Err(Error::InvalidHour(hour));
    }
    Ok(Self { date, hour })
  }

  /// The point covering the current local hour.
  pub fn now() -> Self {
    let now = Local::now().naive_local();
    Self { date: now.date(), hour: chrono::Timelike::hour(&now) }
  }

  pub fn year(&self) -> i32 { self.date.year() }

  pub fn month(&self) -> u32 { self.date.month() }

  pub fn day(&self) -> u32 { self.date.day() }
}

/// Every (date, hour) point in `start..=end`, dates ascending, hours in the
/// order given.
pub fn sample_grid(
  start: NaiveDate,
  end: NaiveDate,
  hours: &[u32],
) -> Result<Vec<SamplePoint>> {
  if start > end {
    return Err(Error::InvalidRange { start, end });
  }
  let mut points = Vec::new();
  for date in start.iter_days().take_while(|d| *d <= end) {
    for &hour in hours {
      points.push(SamplePoint::new(date, hour)?);
    }
  }
  Ok(points)
}

impl std::fmt::Display for SamplePoint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {:02}h", self.date, self.hour)
  }
}

/// Everything one upstream fetch produces.
#[derive(Debug, Clone, Default)]
pub struct FetchedSnapshot {
  pub observations: Vec<RawObservation>,
  pub server_clock: ServerClock,
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;
  use serde_json::json;

  use super::*;

  fn ts(d: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, d)
      .unwrap()
      .and_hms_opt(h, m, 0)
      .unwrap()
  }

  #[test]
  fn clock_from_list_payload() {
    let clock = ServerClock::from_payload(&json!([{ "FECHA": "20/01/2024 15:30" }]));
    assert!(clock.parsed_ok());
    assert_eq!(clock.parsed, Some(ts(20, 15, 30)));
    assert_eq!(clock.raw_text.as_deref(), Some("20/01/2024 15:30"));
  }

  #[test]
  fn clock_from_bare_string() {
    let clock = ServerClock::from_payload(&json!("20/01/2024 15:30"));
    assert_eq!(clock.parsed, Some(ts(20, 15, 30)));
  }

  #[test]
  fn clock_garbage_is_kept_but_not_parsed() {
    let clock = ServerClock::from_payload(&json!("yesterday-ish"));
    assert!(!clock.parsed_ok());
    assert_eq!(clock.raw_text.as_deref(), Some("yesterday-ish"));

    let clock = ServerClock::from_payload(&serde_json::Value::Null);
    assert!(!clock.parsed_ok());
    assert!(clock.raw_text.is_none());
  }

  #[test]
  fn raw_observation_from_upstream_json() {
    let raw: RawObservation = serde_json::from_value(json!({
      "MES_INT": 1,
      "NOMBRE_REGION": "LOS LAGOS",
      "NOMBRE_COMUNA": "PUERTO MONTT",
      "NOMBRE_EMPRESA": "SAESA",
      "CLIENTES_AFECTADOS": "300",
      "ACTUALIZADO_HACE": "2 Dias 0 Horas 0 Minutos",
      "FECHA_INT_STR": "18/01/2024"
    }))
    .unwrap();

    assert_eq!(raw.comuna.as_deref(), Some("PUERTO MONTT"));
    assert_eq!(raw.affected_customer_count, 300);
  }

  #[test]
  fn raw_observation_tolerates_missing_fields() {
    let raw: RawObservation =
      serde_json::from_value(json!({ "CLIENTES_AFECTADOS": null })).unwrap();
    assert_eq!(raw.region, None);
    assert_eq!(raw.affected_customer_count, 0);
    assert!(raw.incident_date.is_empty());
  }

  #[test]
  fn sample_point_rejects_bad_hour() {
    let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    assert!(SamplePoint::new(date, 23).is_ok());
    assert!(matches!(SamplePoint::new(date, 24), Err(Error::InvalidHour(24))));
  }

  #[test]
  fn grid_covers_every_date_and_hour() {
    let start = NaiveDate::from_ymd_opt(2024, 2, 28).unwrap();
    let end = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let grid = sample_grid(start, end, &[0, 12]).unwrap();

    assert_eq!(grid.len(), 6);
    assert_eq!(grid[0], SamplePoint::new(start, 0).unwrap());
    assert_eq!(grid[2].date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    assert_eq!(grid[5], SamplePoint::new(end, 12).unwrap());
  }

  #[test]
  fn grid_rejects_inverted_range() {
    let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
    assert!(matches!(
      sample_grid(start, end, &[0]),
      Err(Error::InvalidRange { .. })
    ));
  }
}
