//! SQLite backend for the Annals versioning engine.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Each declared entity type gets its own
//! table, with unique indexes enforcing the business key and the single open
//! version per chain.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
