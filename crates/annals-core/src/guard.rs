//! Referential guard.
//!
//! Two independent checks:
//!
//! - association validity, before a child row is written: a reference must be
//!   null or point at an open parent version;
//! - destruction, before an append-only row is physically removed: no open
//!   dependent row may still reference it.
//!
//! Both are pre-checks. Between the destruction check and the delete a
//! concurrent writer can still add a dependent unless storage serialises the
//! removal.

use crate::{
  Attributes, EntityType, Error, Record, Registry, Result, Scalar,
  entity::Reference,
  storage::Storage,
  validation::{ValidationError, ValidationErrors, ViolationKind},
};

pub const OBSOLETED_ASSOCIATION: &str = "obsoleted association value";

/// Check one reference against the parent row it resolved to.
///
/// A missing parent passes, as a null reference does.
pub fn check_association(
  reference: &Reference,
  parent: Option<&Record>,
) -> Option<ValidationError> {
  match parent {
    Some(parent) if !parent.is_open() => Some(ValidationError::on(
      &reference.name,
      ViolationKind::DanglingReference,
      OBSOLETED_ASSOCIATION,
    )),
    _ => None,
  }
}

/// Rewrite every foreign key of `entity` in `attributes` to the canonical
/// hyphenated lowercase id, so storage lookups by parent id match however the
/// caller spelled it. Null stays null; anything that is not an id fails.
pub fn normalize_foreign_keys(
  entity: &EntityType,
  attributes: &mut Attributes,
) -> Result<()> {
  for reference in entity.references() {
    let Some(value) = attributes.get_mut(&reference.foreign_key) else {
      continue;
    };
    if value.is_null() {
      continue;
    }
    let id = value.as_uuid().ok_or_else(|| Error::UnsupportedValue {
      attribute: reference.foreign_key.clone(),
      kind:      "value that is not a record id",
    })?;
    *value = Scalar::from(id);
  }
  Ok(())
}

/// Resolve and check every reference declared on `entity`.
pub async fn check_references<S: Storage>(
  storage: &S,
  registry: &Registry,
  entity: &EntityType,
  attributes: &Attributes,
) -> Result<ValidationErrors> {
  let mut errors = ValidationErrors::new();

  for reference in entity.references() {
    let Some(parent_id) =
      attributes.get(&reference.foreign_key).and_then(|v| v.as_uuid())
    else {
      continue;
    };

    let parent_type = registry.get(&reference.parent)?;
    let parent = storage.fetch(parent_type, parent_id).await?;
    if let Some(error) = check_association(reference, parent.as_ref()) {
      tracing::debug!(
        entity = entity.name(),
        reference = %reference.name,
        %parent_id,
        "reference to an obsoleted parent"
      );
      errors.push(error);
    }
  }

  Ok(errors)
}

/// Collect a [`ViolationKind::ReferentialBlock`] for every dependent type
/// with open rows referencing `record`. Types not declared append-only are
/// never blocked.
pub async fn check_destroy<S: Storage>(
  storage: &S,
  registry: &Registry,
  entity: &EntityType,
  record: &Record,
) -> Result<ValidationErrors> {
  let mut errors = ValidationErrors::new();
  if !entity.is_append_only() {
    return Ok(errors);
  }

  for dependent in registry.dependents_of(entity.name()) {
    let dependent_type = registry.get(&dependent.entity)?;
    let open = storage
      .count_open_dependents(dependent_type, &dependent.foreign_key, record.id)
      .await?;
    if open > 0 {
      errors.push(ValidationError::base(
        ViolationKind::ReferentialBlock,
        format!(
          "{} can't be deleted because {} records exist",
          entity.name(),
          dependent.entity
        ),
      ));
    }
  }

  Ok(errors)
}
