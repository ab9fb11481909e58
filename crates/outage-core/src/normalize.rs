//! Raw upstream rows → [`NormalizedRecord`]s.
//!
//! The upstream tends to split one outage into several partial rows and is
//! inconsistent about case and accents. Normalisation folds names into a
//! canonical form, merges fragments of the same event, and resolves dates
//! against the cycle's server clock. Nothing in here fails: unparseable
//! fields fall back to safe defaults and are logged.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use tracing::{debug, warn};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::{
  content_id::{IdGenerator, KeyParts},
  observation::{RawObservation, ServerClock},
  record::NormalizedRecord,
};

/// Upstream incident date format.
pub const DATE_FORMAT: &str = "%d/%m/%Y";
const DATE_TIME_FORMAT: &str = "%d/%m/%Y %H:%M";

// ─── Field helpers ───────────────────────────────────────────────────────────

/// Trim, collapse inner whitespace, strip diacritics and upper-case.
///
/// Missing input yields an empty string; the storage layer substitutes the
/// unknown sentinel at lookup time.
pub fn normalize_name(raw: Option<&str>) -> String {
  let folded: String = raw
    .unwrap_or_default()
    .nfd()
    .filter(|c| !is_combining_mark(*c))
    .collect();
  folded
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
    .to_uppercase()
}

/// Parse `DD/MM/YYYY`, optionally followed by ` HH:MM`.
pub fn parse_incident_date(raw: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
  let raw = raw.trim();
  if let Ok(at) = NaiveDateTime::parse_from_str(raw, DATE_TIME_FORMAT) {
    return Some((at.date(), Some(at.time())));
  }
  NaiveDate::parse_from_str(raw, DATE_FORMAT)
    .ok()
    .map(|date| (date, None))
}

/// Parse a staleness string such as `2 Dias 3 Horas 15 Minutos`.
///
/// Units may appear in any order and missing units count as zero. Returns
/// `None` when the string is empty, any token pair is not `<number> <unit>`,
/// or the total overflows.
pub fn parse_staleness(raw: &str) -> Option<TimeDelta> {
  let tokens: Vec<&str> = raw.split_whitespace().collect();
  if tokens.is_empty() || tokens.len() % 2 != 0 {
    return None;
  }

  let mut total = TimeDelta::zero();
  for pair in tokens.chunks_exact(2) {
    let amount: i64 = pair[0].parse().ok()?;
    let unit = normalize_name(Some(pair[1]));
    let step = if unit.starts_with("DIA") {
      TimeDelta::try_days(amount)?
    } else if unit.starts_with("HORA") {
      TimeDelta::try_hours(amount)?
    } else if unit.starts_with("MIN") {
      TimeDelta::try_minutes(amount)?
    } else {
      return None;
    };
    total = total.checked_add(&step)?;
  }
  Some(total)
}

fn truncate_to_minute(t: NaiveTime) -> NaiveTime {
  NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

// ─── Normalizer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
  region:        String,
  comuna:        String,
  company:       String,
  incident_date: String,
}

#[derive(Debug)]
struct Group {
  key:       GroupKey,
  affected:  i64,
  /// Staleness of the first row seen for this event.
  staleness: String,
}

/// Cleans and aggregates one cycle's worth of raw observations.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
  ids: IdGenerator,
}

impl Normalizer {
  pub fn new(ids: IdGenerator) -> Self { Self { ids } }

  pub fn id_generator(&self) -> &IdGenerator { &self.ids }

  /// Normalise `raw` against `clock`. Output order follows the first
  /// appearance of each event in the input.
  pub fn normalize(
    &self,
    raw: &[RawObservation],
    clock: &ServerClock,
  ) -> Vec<NormalizedRecord> {
    if raw.is_empty() {
      return Vec::new();
    }

    let reference = clock.reference();

    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();

    for obs in raw {
      let key = GroupKey {
        region:        normalize_name(obs.region.as_deref()),
        comuna:        normalize_name(obs.comuna.as_deref()),
        company:       normalize_name(obs.company.as_deref()),
        incident_date: obs.incident_date.trim().to_owned(),
      };

      match index.get(&key) {
        Some(&i) => {
          groups[i].affected =
            groups[i].affected.saturating_add(obs.affected_customer_count);
        }
        None => {
          index.insert(key.clone(), groups.len());
          groups.push(Group {
            key,
            affected: obs.affected_customer_count,
            staleness: obs.staleness.trim().to_owned(),
          });
        }
      }
    }

    if groups.len() < raw.len() {
      debug!(
        rows = raw.len(),
        events = groups.len(),
        "merged fragmented upstream rows"
      );
    }

    groups
      .into_iter()
      .map(|group| self.finish(group, reference))
      .collect()
  }

  fn finish(&self, group: Group, reference: NaiveDateTime) -> NormalizedRecord {
    let Group { key, affected, staleness } = group;

    let (incident_date, explicit_time, age_in_days) =
      match parse_incident_date(&key.incident_date) {
        Some((date, time)) => (date, time, (reference.date() - date).num_days()),
        None => {
          warn!(
            raw = %key.incident_date,
            comuna = %key.comuna,
            "unparseable incident date, using server date"
          );
          (reference.date(), None, 0)
        }
      };

    let incident_time = explicit_time
      .or_else(|| {
        let ago = parse_staleness(&staleness)?;
        reference.checked_sub_signed(ago).map(|at| at.time())
      })
      .map(truncate_to_minute)
      .unwrap_or_else(|| {
        debug!(raw = %staleness, comuna = %key.comuna, "no incident time available");
        NaiveTime::MIN
      });

    let content_id = self.ids.generate(&KeyParts {
      comuna: &key.comuna,
      company: &key.company,
      incident_date,
      incident_time,
      affected_customer_count: affected,
    });

    NormalizedRecord {
      content_id,
      server_timestamp: reference,
      incident_date,
      incident_time,
      region: key.region,
      comuna: key.comuna,
      company: key.company,
      affected_customer_count: affected,
      incident_date_raw: key.incident_date,
      staleness_raw: staleness,
      age_in_days,
    }
  }
}
