//! Resilient ingestion of upstream outage observations.
//!
//! [`pipeline::Pipeline`] runs one fetch → normalise → persist cycle.
//! [`watch::Watcher`] repeats it on a fixed interval behind a
//! [`breaker::CircuitBreaker`]; [`backfill::Backfill`] replays a historical
//! date range with bounded concurrency and resumable checkpoints.

pub mod backfill;
pub mod breaker;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod watch;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
