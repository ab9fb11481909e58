//! One fetch → normalise → persist cycle, shared by watch and backfill.

use std::sync::Arc;

use outage_core::{
  normalize::Normalizer,
  observation::{FetchedSnapshot, SamplePoint},
  quality::check_batch,
  record::SaveSummary,
  source::ObservationSource,
  store::OutageStore,
};
use serde::Serialize;

use crate::{Error, Result, retry::RetryPolicy};

/// What one ingested snapshot amounted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
  pub observations: usize,
  pub records:      usize,
  /// Records the quality check flagged. They are persisted anyway.
  pub flagged:      usize,
  pub clock_ok:     bool,
  #[serde(flatten)]
  pub saved:        SaveSummary,
}

pub struct Pipeline<St, So> {
  store:      Arc<St>,
  source:     Arc<So>,
  normalizer: Normalizer,
  retry:      RetryPolicy,
}

impl<St, So> Clone for Pipeline<St, So> {
  fn clone(&self) -> Self {
    Self {
      store:      self.store.clone(),
      source:     self.source.clone(),
      normalizer: self.normalizer,
      retry:      self.retry.clone(),
    }
  }
}

impl<St, So> Pipeline<St, So>
where
  St: OutageStore,
  So: ObservationSource,
{
  pub fn new(
    store: Arc<St>,
    source: Arc<So>,
    normalizer: Normalizer,
    retry: RetryPolicy,
  ) -> Self {
    Self { store, source, normalizer, retry }
  }

  pub fn store(&self) -> &St { &self.store }

  pub fn source(&self) -> &So { &self.source }

  /// Fetch `point` under the retry policy.
  pub async fn fetch(&self, point: SamplePoint) -> Result<FetchedSnapshot, So::Error> {
    let op = format!("fetch {point}");
    self.retry.execute(&op, || self.source.fetch(point)).await
  }

  /// Normalise, check and persist one snapshot.
  pub async fn ingest(&self, snapshot: &FetchedSnapshot) -> Result<IngestOutcome> {
    let records = self
      .normalizer
      .normalize(&snapshot.observations, &snapshot.server_clock);

    let report = check_batch(&records);
    if !report.is_clean() {
      tracing::warn!(
        total = report.total,
        invalid = report.invalid,
        duplicates = report.duplicates,
        "data quality issues in batch"
      );
      for issue in &report.issues {
        tracing::debug!(index = issue.index, content_id = %issue.content_id, "{}", issue.problem);
      }
    }

    let saved = self.store.save_records(&records).await.map_err(Error::store)?;

    Ok(IngestOutcome {
      observations: snapshot.observations.len(),
      records: records.len(),
      flagged: report.invalid + report.duplicates,
      clock_ok: snapshot.server_clock.parsed_ok(),
      saved,
    })
  }

  /// Fetch then ingest. Fetch failures keep their classification.
  pub async fn run_point(&self, point: SamplePoint) -> Result<IngestOutcome> {
    let snapshot = self.fetch(point).await.map_err(Error::fetch)?;
    self.ingest(&snapshot).await
  }
}
