//! Core types and the versioning engine for Annals.
//!
//! Rows managed here are never updated in place once closed. Every version
//! carries a `created_dt`/`obsoleted_dt` interval; the open version of a chain
//! has an `obsoleted_dt` of infinity.
//!
//! This crate is free of database dependencies. Storage backends (e.g.
//! `annals-store-sqlite`) implement [`storage::Storage`], and the
//! [`engine::Engine`] drives the write pipeline over it.

pub mod engine;
pub mod entity;
pub mod error;
pub mod guard;
pub mod identity;
pub mod interval;
pub mod query;
pub mod record;
pub mod registry;
pub mod storage;
pub mod uniqueness;
pub mod validation;
pub mod value;
pub mod writer;

pub use engine::{Engine, Supersession};
pub use entity::{EntityType, Reference, Versioned};
pub use error::{Error, Result};
pub use identity::{ActorId, Identity};
pub use interval::Bound;
pub use record::{Draft, Record};
pub use registry::Registry;
pub use storage::Storage;
pub use validation::{ValidationError, ValidationErrors, ViolationKind};
pub use value::{Attributes, Scalar};
