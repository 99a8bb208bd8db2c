//! Point-in-time reads.
//!
//! [`as_of`] normalises the timestamp, then hands the caller a [`Scope`] whose
//! every read is restricted to rows visible at that instant. Whatever the
//! caller's closure returns is passed back unchanged.

use std::future::Future;

use uuid::Uuid;

use crate::{
  Record, Registry, Result, Scalar,
  interval::{self, Bound},
  storage::{Selection, Storage},
};

/// Reads constrained to rows open at [`Scope::ts`].
pub struct Scope<'a, S> {
  storage:  &'a S,
  registry: &'a Registry,
  ts:       Bound,
}

impl<S> Clone for Scope<'_, S> {
  fn clone(&self) -> Self { *self }
}

impl<S> Copy for Scope<'_, S> {}

impl<'a, S: Storage> Scope<'a, S> {
  /// The normalised point in time.
  pub fn ts(&self) -> Bound { self.ts }

  /// Every row of `entity` visible at `ts`.
  pub async fn all(&self, entity: &str) -> Result<Vec<Record>> {
    self.find_by(entity, Vec::<(String, Scalar)>::new()).await
  }

  /// Rows of `entity` visible at `ts` whose attributes equal `equals`.
  pub async fn find_by<I, K, V>(&self, entity: &str, equals: I) -> Result<Vec<Record>>
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Scalar>,
  {
    let entity = self.registry.get(entity)?;
    let equals: Vec<(String, Scalar)> = equals
      .into_iter()
      .map(|(k, v)| (k.into(), v.into()))
      .collect();
    entity.check_attributes(equals.iter().map(|(k, _)| k))?;

    let selection = Selection { as_of: Some(self.ts), group_id: None, equals };
    self.storage.select(entity, &selection).await
  }

  /// The version of chain `group_id` visible at `ts`.
  pub async fn group(&self, entity: &str, group_id: Uuid) -> Result<Option<Record>> {
    let entity = self.registry.get(entity)?;
    let selection = Selection {
      as_of: Some(self.ts),
      group_id: Some(group_id),
      equals: Vec::new(),
    };
    Ok(self.storage.select(entity, &selection).await?.into_iter().next())
  }
}

/// Run `f` with reads constrained to rows open at `ts`.
///
/// Fails with [`crate::Error::InvalidTimestamp`] before touching storage if
/// `ts` is null or unreadable.
pub async fn as_of<'a, S, F, Fut, T>(
  storage: &'a S,
  registry: &'a Registry,
  ts: impl Into<Scalar>,
  f: F,
) -> Result<T>
where
  S: Storage,
  F: FnOnce(Scope<'a, S>) -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let ts = interval::point_in_time(ts)?;
  tracing::trace!(%ts, "point-in-time scope");
  f(Scope { storage, registry, ts }).await
}
