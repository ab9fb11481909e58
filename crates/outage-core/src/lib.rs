//! Core types and trait definitions for the outage ingestion pipeline.
//!
//! This crate is deliberately free of HTTP and database dependencies. It owns
//! the typed record for every pipeline stage, the pure normalisation and
//! identity logic, and the traits that storage backends and upstream sources
//! implement.

pub mod content_id;
pub mod error;
pub mod failure;
pub mod normalize;
pub mod observation;
pub mod quality;
pub mod record;
pub mod source;
pub mod store;

pub use error::{Error, Result};

/// Substituted for a missing natural-key component before a dimension lookup.
pub const UNKNOWN: &str = "DESCONOCIDO";
