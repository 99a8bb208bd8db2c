//! The versioning engine.
//!
//! Every write runs the same ordered stages:
//!
//! 1. stamp (actor, open end) with the [`VersionWriter`];
//! 2. interval and open-version checks;
//! 3. business-key uniqueness;
//! 4. reference validity;
//! 5. persist.
//!
//! Stages 2–4 collect into one [`ValidationErrors`] set; any error blocks
//! stage 5.

use std::{future::Future, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Attributes, Draft, EntityType, Error, Record, Registry, Result, Scalar,
  Versioned, guard,
  identity::{Anonymous, Identity},
  interval::{self, Bound},
  query::{self, Scope},
  record::GROUP_ID,
  storage::{Selection, Storage},
  uniqueness,
  validation::{ValidationError, ValidationErrors, ViolationKind},
  writer::VersionWriter,
};

/// The closed version and its replacement, from [`Engine::supersede`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supersession {
  pub previous: Record,
  pub current:  Record,
}

pub struct Engine<S, I = Anonymous> {
  storage:  S,
  registry: Arc<Registry>,
  identity: I,
}

impl<S: Storage> Engine<S> {
  /// An engine that records no actor.
  pub fn anonymous(storage: S, registry: impl Into<Arc<Registry>>) -> Result<Self> {
    Self::new(storage, registry, Anonymous)
  }
}

impl<S: Storage, I: Identity> Engine<S, I> {
  /// Fails if any declared reference names an unregistered parent type.
  pub fn new(
    storage: S,
    registry: impl Into<Arc<Registry>>,
    identity: I,
  ) -> Result<Self> {
    let registry = registry.into();
    registry.check_references()?;
    Ok(Self { storage, registry, identity })
  }

  pub fn storage(&self) -> &S { &self.storage }

  pub fn registry(&self) -> &Registry { &self.registry }

  pub fn identity(&self) -> &I { &self.identity }

  fn entity(&self, name: &str) -> Result<&EntityType> { self.registry.get(name) }

  fn writer(&self) -> VersionWriter<'_, I> { VersionWriter::new(&self.identity) }

  async fn fetch_existing(&self, entity: &EntityType, id: Uuid) -> Result<Record> {
    self.storage.fetch(entity, id).await?.ok_or_else(|| Error::NotFound {
      entity: entity.name().to_owned(),
      id,
    })
  }

  /// Uniqueness and reference stages, shared by every write.
  async fn validate(
    &self,
    entity: &EntityType,
    record: &Record,
    exclude: &[Uuid],
    mut errors: ValidationErrors,
  ) -> Result<()> {
    if let Some(error) =
      uniqueness::check(&self.storage, entity, record, exclude).await?
    {
      errors.push(error);
    }
    errors.extend(
      guard::check_references(
        &self.storage,
        &self.registry,
        entity,
        &record.attributes,
      )
      .await?,
    );

    if !errors.is_empty() {
      tracing::debug!(
        entity = entity.name(),
        id = %record.id,
        %errors,
        "write rejected"
      );
    }
    errors.into_result()
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  /// Insert a new version: the first of a new chain, or, with
  /// [`Draft::in_group`], another version of an existing chain.
  pub async fn create(&self, entity: &str, mut draft: Draft) -> Result<Record> {
    let entity = self.entity(entity)?;
    entity.check_attributes(draft.attributes.keys())?;

    self.writer().stamp(&mut draft, true);

    let mut attributes = draft.attributes;
    for name in entity.business_attributes() {
      attributes.entry(name.clone()).or_insert(Scalar::Null);
    }
    guard::normalize_foreign_keys(entity, &mut attributes)?;

    let created_dt = interval::truncate(draft.created_dt.unwrap_or_else(interval::now));
    let id = Uuid::new_v4();
    let record = Record {
      id,
      group_id: draft.group_id.unwrap_or(id),
      user_id: draft.user_id,
      created_dt: interval::storable(created_dt)?,
      obsoleted_dt: draft.obsoleted_dt.unwrap_or(Bound::Infinity).storable()?,
      o_user_id: None,
      attributes,
    };

    let mut errors = ValidationErrors::new();
    errors.extend(interval::check(record.created_dt, record.obsoleted_dt));
    if record.is_open()
      && draft.group_id.is_some()
      && self.open_version(entity, record.group_id).await?.is_some()
    {
      errors.push(ValidationError::on(
        GROUP_ID,
        ViolationKind::OpenVersionExists,
        "version chain already has an open version",
      ));
    }
    self.validate(entity, &record, &[], errors).await?;

    self.storage.insert(entity, &record).await?;
    tracing::debug!(entity = entity.name(), id = %record.id, "version created");
    Ok(record)
  }

  /// Typed counterpart of [`Engine::create`].
  pub async fn create_entity<T: Versioned>(&self, value: &T) -> Result<Record> {
    self.create(T::ENTITY, Draft::from_entity(value)?).await
  }

  /// Overwrite business attributes of row `id` in place.
  ///
  /// If no attribute actually changes this is a no-op returning the stored
  /// row. Read-only columns are never written.
  pub async fn update(
    &self,
    entity: &str,
    id: Uuid,
    changes: Attributes,
  ) -> Result<Record> {
    let entity = self.entity(entity)?;
    entity.check_attributes(changes.keys())?;
    let existing = self.fetch_existing(entity, id).await?;

    let mut attributes = existing.attributes.clone();
    attributes.extend(changes);
    guard::normalize_foreign_keys(entity, &mut attributes)?;
    let changed = attributes != existing.attributes;

    let mut draft = Draft {
      group_id: Some(existing.group_id),
      created_dt: Some(existing.created_dt),
      obsoleted_dt: Some(existing.obsoleted_dt),
      user_id: existing.user_id,
      attributes,
    };
    if !self.writer().stamp(&mut draft, changed) {
      return Ok(existing);
    }

    let record = Record {
      user_id: draft.user_id,
      attributes: draft.attributes,
      ..existing
    };
    self.validate(entity, &record, &[], ValidationErrors::new()).await?;

    self.storage.update(entity, &record).await?;
    Ok(record)
  }

  /// Close the open version `id` at `at` (default now).
  pub async fn obsolete(
    &self,
    entity: &str,
    id: Uuid,
    at: Option<DateTime<Utc>>,
  ) -> Result<Record> {
    let entity = self.entity(entity)?;
    let existing = self.fetch_existing(entity, id).await?;
    if !existing.is_open() {
      return Err(self.already_obsoleted(entity, id));
    }

    let at = interval::storable(interval::truncate(at.unwrap_or_else(interval::now)))?;
    if let Some(error) = interval::check(existing.created_dt, Bound::At(at)) {
      return Err(ValidationErrors::from(error).into());
    }

    let o_user_id = self.writer().resolve_actor();
    if !self.storage.close(entity, id, at, o_user_id).await? {
      return Err(self.already_obsoleted(entity, id));
    }

    tracing::debug!(entity = entity.name(), %id, %at, "version obsoleted");
    Ok(Record { obsoleted_dt: Bound::At(at), o_user_id, ..existing })
  }

  /// Replace the open version `id` with a new version of the same chain
  /// carrying `changes`. The old version closes at the instant the new one is
  /// created.
  ///
  /// Returns `None`, writing nothing, if `changes` alter no attribute.
  pub async fn supersede(
    &self,
    entity: &str,
    id: Uuid,
    changes: Attributes,
  ) -> Result<Option<Supersession>> {
    let entity = self.entity(entity)?;
    entity.check_attributes(changes.keys())?;
    let existing = self.fetch_existing(entity, id).await?;
    if !existing.is_open() {
      return Err(self.already_obsoleted(entity, id));
    }

    let mut attributes = existing.attributes.clone();
    attributes.extend(changes);
    guard::normalize_foreign_keys(entity, &mut attributes)?;
    let changed = attributes != existing.attributes;

    let at = interval::now();
    let mut draft = Draft {
      group_id: Some(existing.group_id),
      created_dt: Some(at),
      obsoleted_dt: None,
      user_id: None,
      attributes,
    };
    if !self.writer().stamp(&mut draft, changed) {
      return Ok(None);
    }

    let current = Record {
      id:           Uuid::new_v4(),
      group_id:     existing.group_id,
      user_id:      draft.user_id,
      created_dt:   at,
      obsoleted_dt: draft.obsoleted_dt.unwrap_or(Bound::Infinity),
      o_user_id:    None,
      attributes:   draft.attributes,
    };

    let errors: ValidationErrors =
      interval::check(existing.created_dt, Bound::At(at)).into_iter().collect();
    self.validate(entity, &current, &[existing.id], errors).await?;

    let closed = self
      .storage
      .supersede(entity, existing.id, at, current.user_id, &current)
      .await?;
    if !closed {
      return Err(self.already_obsoleted(entity, id));
    }

    tracing::debug!(
      entity = entity.name(),
      previous = %existing.id,
      current = %current.id,
      "version superseded"
    );
    let previous = Record {
      obsoleted_dt: Bound::At(at),
      o_user_id: current.user_id,
      ..existing
    };
    Ok(Some(Supersession { previous, current }))
  }

  /// Physically remove row `id`.
  ///
  /// For append-only types this is refused with
  /// [`ViolationKind::ReferentialBlock`] while open dependents reference the
  /// row. This is a removal, not an obsoletion; history is lost.
  pub async fn remove(&self, entity: &str, id: Uuid) -> Result<()> {
    let entity = self.entity(entity)?;
    let existing = self.fetch_existing(entity, id).await?;

    guard::check_destroy(&self.storage, &self.registry, entity, &existing)
      .await?
      .into_result()?;

    if !self.storage.delete(entity, id).await? {
      return Err(Error::NotFound { entity: entity.name().to_owned(), id });
    }
    tracing::info!(entity = entity.name(), %id, "record removed");
    Ok(())
  }

  fn already_obsoleted(&self, entity: &EntityType, id: Uuid) -> Error {
    Error::AlreadyObsoleted { entity: entity.name().to_owned(), id }
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub async fn get(&self, entity: &str, id: Uuid) -> Result<Option<Record>> {
    let entity = self.entity(entity)?;
    self.storage.fetch(entity, id).await
  }

  /// Every version of chain `group_id`, oldest first.
  pub async fn history(&self, entity: &str, group_id: Uuid) -> Result<Vec<Record>> {
    let entity = self.entity(entity)?;
    let selection = Selection { group_id: Some(group_id), ..Selection::default() };
    self.storage.select(entity, &selection).await
  }

  async fn open_version(
    &self,
    entity: &EntityType,
    group_id: Uuid,
  ) -> Result<Option<Record>> {
    let selection = Selection {
      as_of: Some(Bound::Infinity),
      group_id: Some(group_id),
      equals: Vec::new(),
    };
    Ok(self.storage.select(entity, &selection).await?.into_iter().next())
  }

  /// Run `f` with every read constrained to rows open at `ts`.
  ///
  /// `ts` may be a timestamp, any infinity marker (meaning "current"), or
  /// integer Unix seconds. A null `ts` fails with
  /// [`Error::InvalidTimestamp`] before `f` runs.
  pub async fn as_of<'a, F, Fut, T>(
    &'a self,
    ts: impl Into<Scalar>,
    f: F,
  ) -> Result<T>
  where
    F: FnOnce(Scope<'a, S>) -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    query::as_of(&self.storage, &self.registry, ts, f).await
  }
}
