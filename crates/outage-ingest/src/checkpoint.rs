//! Per-unit backfill checkpoints: `checkpoint_<unit_id>.json` files.
//!
//! A checkpoint is only written once every point of its unit has reached a
//! terminal state. Its presence marks the unit as done for resume purposes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, backfill::PointResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
  pub unit_id:       String,
  pub total_points:  usize,
  pub successful:    usize,
  pub total_records: usize,
  /// Wall time spent on the unit, in seconds.
  pub duration:      f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
  pub metadata: CheckpointMetadata,
  pub data:     Vec<PointResult>,
}

#[derive(Debug, Clone)]
pub struct CheckpointDir {
  root: PathBuf,
}

impl CheckpointDir {
  pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

  pub fn path_for(&self, unit_id: &str) -> PathBuf {
    self.root.join(format!("checkpoint_{unit_id}.json"))
  }

  pub async fn exists(&self, unit_id: &str) -> Result<bool> {
    let path = self.path_for(unit_id);
    tokio::fs::try_exists(&path)
      .await
      .map_err(|source| Error::CheckpointIo { path, source })
  }

  /// Write atomically: serialise to a sibling temp file, then rename over
  /// the final name.
  pub async fn write(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
    tokio::fs::create_dir_all(&self.root)
      .await
      .map_err(io_error(&self.root))?;

    let path = self.path_for(&checkpoint.metadata.unit_id);
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(checkpoint)?;

    tokio::fs::write(&tmp, bytes).await.map_err(io_error(&tmp))?;
    tokio::fs::rename(&tmp, &path).await.map_err(io_error(&path))?;

    tracing::info!(
      unit = %checkpoint.metadata.unit_id,
      path = %path.display(),
      "checkpoint written"
    );
    Ok(path)
  }

  pub async fn read(&self, unit_id: &str) -> Result<Option<Checkpoint>> {
    let path = self.path_for(unit_id);
    match tokio::fs::read(&path).await {
      Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(source) => Err(Error::CheckpointIo { path, source }),
    }
  }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + use<> {
  let path = path.to_path_buf();
  move |source| Error::CheckpointIo { path, source }
}
