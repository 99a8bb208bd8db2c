//! Version writer: the first stage of every write.
//!
//! Stamps the actor and the open end on a changed row. It never splits a
//! version chain by itself; closing and replacing versions is requested
//! explicitly through [`crate::engine::Engine::obsolete`] and
//! [`crate::engine::Engine::supersede`].

use crate::{
  Draft,
  identity::{ActorId, Identity},
  interval::Bound,
};

pub struct VersionWriter<'a, I: ?Sized> {
  identity: &'a I,
}

impl<'a, I: Identity + ?Sized> VersionWriter<'a, I> {
  pub fn new(identity: &'a I) -> Self { Self { identity } }

  /// Stamp `row` if `changed`. Returns `false` and leaves the row untouched
  /// otherwise.
  ///
  /// Only an unset `obsoleted_dt` is initialised; `created_dt` and
  /// `group_id` are never touched here.
  pub fn stamp(&self, row: &mut Draft, changed: bool) -> bool {
    if !changed {
      return false;
    }
    row.user_id = self.resolve_actor();
    row.obsoleted_dt.get_or_insert(Bound::Infinity);
    true
  }

  /// The current actor, or `None` when it cannot be resolved.
  pub fn resolve_actor(&self) -> Option<ActorId> {
    match self.identity.current_actor() {
      Ok(actor) => actor,
      Err(e) => {
        tracing::debug!(error = %e, "actor unresolved, leaving it unset");
        None
      }
    }
  }
}
