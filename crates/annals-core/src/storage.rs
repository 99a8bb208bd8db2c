//! The `Storage` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `annals-store-sqlite`).
//! The engine depends on this abstraction, not on any concrete backend.
//!
//! Backends must enforce the enforced uniqueness key and "one open version
//! per group" themselves (e.g. with unique indexes) and report violations as
//! [`crate::Error::Invalid`]; the engine's checks are only pre-checks.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  EntityType, Record, Result, Scalar,
  identity::ActorId,
  interval::Bound,
  uniqueness::KeyProbe,
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`Storage::select`]. Empty means every row.
#[derive(Debug, Clone, Default)]
pub struct Selection {
  /// Only rows visible at this point in time.
  pub as_of:    Option<Bound>,
  /// Only rows of this version chain.
  pub group_id: Option<Uuid>,
  /// Attribute equality filters; nulls compare equal.
  pub equals:   Vec<(String, Scalar)>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Row storage for versioned entity types.
///
/// Attribute names passed in have been checked against the entity type's
/// declaration.
pub trait Storage: Send + Sync {
  /// Retrieve a row by id. Returns `None` if not found.
  fn fetch<'a>(
    &'a self,
    entity: &'a EntityType,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Record>>> + Send + 'a;

  /// Rows matching `selection`, ordered by `created_dt`.
  fn select<'a>(
    &'a self,
    entity: &'a EntityType,
    selection: &'a Selection,
  ) -> impl Future<Output = Result<Vec<Record>>> + Send + 'a;

  /// Id of some row colliding with `probe`, if any.
  fn find_conflict<'a>(
    &'a self,
    entity: &'a EntityType,
    probe: &'a KeyProbe,
  ) -> impl Future<Output = Result<Option<Uuid>>> + Send + 'a;

  /// Number of open `dependent` rows whose `foreign_key` is `parent_id`.
  fn count_open_dependents<'a>(
    &'a self,
    dependent: &'a EntityType,
    foreign_key: &'a str,
    parent_id: Uuid,
  ) -> impl Future<Output = Result<u64>> + Send + 'a;

  /// Persist a new row.
  fn insert<'a>(
    &'a self,
    entity: &'a EntityType,
    record: &'a Record,
  ) -> impl Future<Output = Result<()>> + Send + 'a;

  /// Rewrite the business attributes and `user_id` of an existing row. No
  /// other column is written.
  fn update<'a>(
    &'a self,
    entity: &'a EntityType,
    record: &'a Record,
  ) -> impl Future<Output = Result<()>> + Send + 'a;

  /// Close the open row `id` at `at`. Returns `false` if no open row has
  /// that id.
  fn close<'a>(
    &'a self,
    entity: &'a EntityType,
    id: Uuid,
    at: DateTime<Utc>,
    o_user_id: Option<ActorId>,
  ) -> impl Future<Output = Result<bool>> + Send + 'a;

  /// Atomically close the open row `id` at `at` and insert `replacement`.
  /// Returns `false`, writing nothing, if no open row has that id.
  fn supersede<'a>(
    &'a self,
    entity: &'a EntityType,
    id: Uuid,
    at: DateTime<Utc>,
    o_user_id: Option<ActorId>,
    replacement: &'a Record,
  ) -> impl Future<Output = Result<bool>> + Send + 'a;

  /// Physically remove a row. Returns `false` if it did not exist.
  fn delete<'a>(
    &'a self,
    entity: &'a EntityType,
    id: Uuid,
  ) -> impl Future<Output = Result<bool>> + Send + 'a;
}
