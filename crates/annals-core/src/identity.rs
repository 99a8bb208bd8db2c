//! Actor identity: who is making the current change.
//!
//! Resolving the actor is best-effort. The version writer swallows every
//! [`IdentityError`] and leaves the actor unset; nothing here may abort a
//! write.

use std::{fmt, future::Future};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of the actor recorded in `user_id` / `o_user_id`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ActorId(pub i64);

impl fmt::Display for ActorId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

#[derive(Debug, Error)]
pub enum IdentityError {
  #[error("no actor is bound to the current task")]
  Unbound,

  #[error("identity lookup failed: {0}")]
  Lookup(String),
}

/// Accessor for the current actor.
pub trait Identity: Send + Sync {
  /// `Ok(None)` means "known to be anonymous"; errors mean the lookup itself
  /// failed.
  fn current_actor(&self) -> Result<Option<ActorId>, IdentityError>;
}

impl<I: Identity + ?Sized> Identity for std::sync::Arc<I> {
  fn current_actor(&self) -> Result<Option<ActorId>, IdentityError> {
    (**self).current_actor()
  }
}

/// No actor is ever recorded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl Identity for Anonymous {
  fn current_actor(&self) -> Result<Option<ActorId>, IdentityError> { Ok(None) }
}

/// Every change is attributed to one actor.
#[derive(Debug, Clone, Copy)]
pub struct Fixed(pub ActorId);

impl Identity for Fixed {
  fn current_actor(&self) -> Result<Option<ActorId>, IdentityError> {
    Ok(Some(self.0))
  }
}

// ─── Whodunnit ───────────────────────────────────────────────────────────────

tokio::task_local! {
  static WHODUNNIT: Option<ActorId>;
}

/// Request-scoped identity: reads the actor bound by [`scope`] on the current
/// task. Outside any scope the lookup fails with [`IdentityError::Unbound`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Whodunnit;

impl Identity for Whodunnit {
  fn current_actor(&self) -> Result<Option<ActorId>, IdentityError> {
    WHODUNNIT.try_with(|actor| *actor).map_err(|_| IdentityError::Unbound)
  }
}

/// Run `fut` with `actor` bound as the current actor for [`Whodunnit`].
pub async fn scope<F: Future>(actor: Option<ActorId>, fut: F) -> F::Output {
  WHODUNNIT.scope(actor, fut).await
}
