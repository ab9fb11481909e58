//! The `ObservationSource` trait: the upstream fetch collaborator.
//!
//! How observations are obtained (HTTP, browser automation, replay from disk)
//! is the implementor's business. The pipeline only relies on this contract.

use std::future::Future;

use crate::{
  failure::Classify,
  observation::{FetchedSnapshot, SamplePoint},
};

pub trait ObservationSource: Send + Sync {
  type Error: std::error::Error + Classify + Send + Sync + 'static;

  /// Fetch every observation the upstream reports for `point`, along with
  /// its server clock.
  fn fetch(
    &self,
    point: SamplePoint,
  ) -> impl Future<Output = Result<FetchedSnapshot, Self::Error>> + Send + '_;
}
