//! Data-quality checks over a normalised batch.
//!
//! Findings are a signal for operators, not a gate: the pipeline logs them
//! and persists the batch anyway.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::{normalize::parse_staleness, record::{ContentId, NormalizedRecord}};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
  UnparseableStaleness(String),
  NonPositiveCount(i64),
  /// Incident date lies after the cycle's reference date.
  FutureIncident(NaiveDate),
  DuplicateContentId,
}

impl std::fmt::Display for Problem {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::UnparseableStaleness(raw) => write!(f, "unparseable staleness {raw:?}"),
      Self::NonPositiveCount(n) => write!(f, "affected customer count {n} <= 0"),
      Self::FutureIncident(d) => write!(f, "incident date {d} is in the future"),
      Self::DuplicateContentId => f.write_str("duplicate content id in batch"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
  /// Position of the record in the checked batch.
  pub index:      usize,
  pub content_id: ContentId,
  pub problem:    Problem,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityReport {
  pub total:      usize,
  pub valid:      usize,
  pub invalid:    usize,
  pub duplicates: usize,
  pub issues:     Vec<Issue>,
}

impl QualityReport {
  pub fn is_clean(&self) -> bool { self.issues.is_empty() }
}

/// Validate every record and count in-batch duplicate ids.
pub fn check_batch(records: &[NormalizedRecord]) -> QualityReport {
  let mut report = QualityReport { total: records.len(), ..Default::default() };
  let mut seen: HashSet<&ContentId> = HashSet::new();

  for (index, record) in records.iter().enumerate() {
    let problems = check_record(record);
    if problems.is_empty() {
      report.valid += 1;
      if !seen.insert(&record.content_id) {
        report.duplicates += 1;
        report.issues.push(Issue {
          index,
          content_id: record.content_id.clone(),
          problem: Problem::DuplicateContentId,
        });
      }
    } else {
      report.invalid += 1;
      report.issues.extend(problems.into_iter().map(|problem| Issue {
        index,
        content_id: record.content_id.clone(),
        problem,
      }));
    }
  }

  report
}

fn check_record(record: &NormalizedRecord) -> Vec<Problem> {
  let mut problems = Vec::new();
  if parse_staleness(&record.staleness_raw).is_none() {
    problems.push(Problem::UnparseableStaleness(record.staleness_raw.clone()));
  }
  if record.affected_customer_count <= 0 {
    problems.push(Problem::NonPositiveCount(record.affected_customer_count));
  }
  if record.incident_date > record.server_timestamp.date() {
    problems.push(Problem::FutureIncident(record.incident_date));
  }
  problems
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;
  use crate::{
    normalize::Normalizer,
    observation::{RawObservation, ServerClock},
  };

  fn normalize(raw: Vec<RawObservation>) -> Vec<NormalizedRecord> {
    let clock = ServerClock::at(
      NaiveDate::from_ymd_opt(2024, 1, 20)
        .unwrap()
        .and_hms_opt(15, 30, 0)
        .unwrap(),
    );
    Normalizer::default().normalize(&raw, &clock)
  }

  #[test]
  fn clean_batch() {
    let records = normalize(vec![
      RawObservation::new("R", "A", "E", 3, "18/01/2024", "2 Dias 0 Horas 0 Minutos"),
      RawObservation::new("R", "B", "E", 4, "19/01/2024", "1 Dias 0 Horas 0 Minutos"),
    ]);
    let report = check_batch(&records);
    assert!(report.is_clean());
    assert_eq!(report.valid, 2);
  }

  #[test]
  fn flags_each_problem() {
    let records = normalize(vec![
      RawObservation::new("R", "A", "E", 0, "18/01/2024", "0 Dias 1 Horas 0 Minutos"),
      RawObservation::new("R", "B", "E", 5, "25/01/2024", "0 Dias 1 Horas 0 Minutos"),
      RawObservation::new("R", "C", "E", 5, "18/01/2024", "recently"),
    ]);
    let report = check_batch(&records);

    assert_eq!(report.invalid, 3);
    assert_eq!(report.valid, 0);
    let problems: Vec<_> = report.issues.iter().map(|i| &i.problem).collect();
    assert!(problems.contains(&&Problem::NonPositiveCount(0)));
    assert!(problems.contains(&&Problem::FutureIncident(
      NaiveDate::from_ymd_opt(2024, 1, 25).unwrap()
    )));
    assert!(problems.contains(&&Problem::UnparseableStaleness("recently".into())));
  }

  #[test]
  fn counts_duplicate_ids() {
    let mut records = normalize(vec![RawObservation::new(
      "R", "A", "E", 3, "18/01/2024", "2 Dias 0 Horas 0 Minutos",
    )]);
    records.push(records[0].clone());
    let report = check_batch(&records);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.issues[0].index, 1);
  }
}
