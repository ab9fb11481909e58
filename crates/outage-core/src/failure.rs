//! Failure classification shared by sources, stores and the retry policy.

use serde::{Deserialize, Serialize};

/// Coarse category of a failure, used to decide whether it is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  Timeout,
  Connection,
  /// Upstream answered with a 5xx.
  Server,
  RateLimited,
  /// Upstream answered but the body was not what we expected.
  Decode,
  /// Upstream refused the request (4xx other than rate limiting).
  Rejected,
  Storage,
  Other,
}

impl FailureKind {
  /// Kinds that usually clear up on their own.
  pub const TRANSIENT: [FailureKind; 4] = [
    FailureKind::Timeout,
    FailureKind::Connection,
    FailureKind::Server,
    FailureKind::RateLimited,
  ];
}

/// Implemented by error types that can say what kind of failure they are.
pub trait Classify {
  fn failure_kind(&self) -> FailureKind;
}
