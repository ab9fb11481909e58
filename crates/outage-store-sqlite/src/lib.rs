//! SQLite backend for the outage fact store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Dimension lookups are memoised in a
//! [`dimension::DimensionCache`] shared by every clone of a store.

mod encode;
mod schema;
mod store;

pub mod dimension;
pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
