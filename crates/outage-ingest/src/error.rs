//! Error type for `outage-ingest`.

use std::path::PathBuf;

use outage_core::{
  failure::{Classify, FailureKind},
  observation::SamplePoint,
};
use thiserror::Error;

use crate::backfill::PointState;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] outage_core::Error),
  #[error("fetch failed ({kind:?}): {source}")]
  Source {
    kind:   FailureKind,
    #[source]
    source: BoxError,
  },
  #[error("store error: {0}")]
  Store(#[source] BoxError),
  #[error("checkpoint {path:?}: {source}")]
  CheckpointIo {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("checkpoint format: {0}")]
  CheckpointFormat(#[from] serde_json::Error),
  #[error("point {point}: cannot move from {from:?} to {to:?}")]
  InvalidTransition {
    point: SamplePoint,
    from:  PointState,
    to:    PointState,
  },
}

impl Error {
  pub fn fetch<E>(err: E) -> Self
  where
    E: std::error::Error + Classify + Send + Sync + 'static,
  {
    Self::Source { kind: err.failure_kind(), source: Box::new(err) }
  }

  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

impl Classify for Error {
  fn failure_kind(&self) -> FailureKind {
    match self {
      Self::Source { kind, .. } => *kind,
      Self::Store(_) | Self::CheckpointIo { .. } => FailureKind::Storage,
      Self::CheckpointFormat(_) => FailureKind::Decode,
      Self::Core(_) | Self::InvalidTransition { .. } => FailureKind::Other,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
