//! Business-key uniqueness scoped to versions sharing an `obsoleted_dt`.
//!
//! The enforced key is the declared attributes, then the scope attributes,
//! then `obsoleted_dt`. Open rows therefore only collide with other open
//! rows, and a closed row only with rows closed at the same instant.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Attributes, EntityType, Error, Record, Result, Scalar,
  interval::Bound,
  record::OBSOLETED_DT,
  storage::Storage,
  validation::{ValidationError, ViolationKind},
};

pub const UNIQUENESS_MESSAGE: &str = "record must be unique";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uniqueness {
  attributes: Vec<String>,
  scope:      Vec<String>,
}

impl Uniqueness {
  pub fn new<A, S>(attributes: A, scope: S) -> Result<Self>
  where
    A: IntoIterator,
    A::Item: Into<String>,
    S: IntoIterator,
    S::Item: Into<String>,
  {
    let attributes: Vec<String> = attributes.into_iter().map(Into::into).collect();
    let scope: Vec<String> = scope.into_iter().map(Into::into).collect();

    if attributes.is_empty() {
      return Err(Error::Declaration(
        "uniqueness needs at least one attribute".to_owned(),
      ));
    }
    let mut seen = std::collections::BTreeSet::new();
    for name in attributes.iter().chain(&scope) {
      if name == OBSOLETED_DT {
        return Err(Error::Declaration(format!(
          "{OBSOLETED_DT} is always part of the uniqueness scope"
        )));
      }
      if !seen.insert(name.as_str()) {
        return Err(Error::Declaration(format!(
          "{name:?} appears twice in the uniqueness key"
        )));
      }
    }

    Ok(Self { attributes, scope })
  }

  /// The declared key: attributes followed by scope, without `obsoleted_dt`.
  pub fn business_key(&self) -> Vec<&str> {
    self.attributes.iter().chain(&self.scope).map(String::as_str).collect()
  }

  /// The key storage enforces: [`Self::business_key`] plus `obsoleted_dt`.
  pub fn enforced_key(&self) -> Vec<&str> {
    let mut key = self.business_key();
    key.push(OBSOLETED_DT);
    key
  }

  /// The error attached to the first declared attribute on a collision.
  pub fn violation(&self) -> ValidationError {
    ValidationError::on(
      &self.attributes[0],
      ViolationKind::UniquenessViolation,
      UNIQUENESS_MESSAGE,
    )
  }

  /// Build the lookup for rows that would collide with `attributes` at
  /// `obsoleted_dt`, ignoring the rows in `exclude`.
  pub fn probe(
    &self,
    attributes: &Attributes,
    obsoleted_dt: Bound,
    exclude: &[Uuid],
  ) -> KeyProbe {
    let columns = self
      .business_key()
      .into_iter()
      .map(|name| {
        let value = attributes.get(name).cloned().unwrap_or_default();
        (name.to_owned(), value)
      })
      .collect();

    KeyProbe { columns, obsoleted_dt, exclude: exclude.to_vec() }
  }
}

/// Equality lookup over an enforced key. Nulls compare equal.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyProbe {
  pub columns:      Vec<(String, Scalar)>,
  pub obsoleted_dt: Bound,
  pub exclude:      Vec<Uuid>,
}

/// Pre-check `record` against stored rows. Storage's unique index stays the
/// authoritative guard under concurrent writers.
pub async fn check<S: Storage>(
  storage: &S,
  entity: &EntityType,
  record: &Record,
  exclude: &[Uuid],
) -> Result<Option<ValidationError>> {
  let Some(uniqueness) = entity.uniqueness() else {
    return Ok(None);
  };

  let mut exclude = exclude.to_vec();
  exclude.push(record.id);
  let probe = uniqueness.probe(&record.attributes, record.obsoleted_dt, &exclude);

  match storage.find_conflict(entity, &probe).await? {
    Some(other) => {
      tracing::debug!(
        entity = entity.name(),
        conflicting = %other,
        "business key already taken"
      );
      Ok(Some(uniqueness.violation()))
    }
    None => Ok(None),
  }
}
