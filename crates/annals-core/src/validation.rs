//! Structured validation failures.
//!
//! Checks in the write and removal pipelines never abort on the first
//! problem; they add to a [`ValidationErrors`] set attached to the offending
//! record, which is surfaced as [`crate::Error::Invalid`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Result;

/// What kind of rule a [`ValidationError`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
  /// Another open row already holds the same business key.
  UniquenessViolation,
  /// A reference points at a closed parent version.
  DanglingReference,
  /// Removal refused because open dependent rows still reference the row.
  ReferentialBlock,
  /// `created_dt` is not strictly before a concrete `obsoleted_dt`.
  InvalidInterval,
  /// The version chain already has an open version.
  OpenVersionExists,
}

/// A single failed rule. `field` is `None` for errors on the record as a
/// whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
  pub field:   Option<String>,
  pub kind:    ViolationKind,
  pub message: String,
}

impl ValidationError {
  pub fn on(
    field: impl Into<String>,
    kind: ViolationKind,
    message: impl Into<String>,
  ) -> Self {
    Self { field: Some(field.into()), kind, message: message.into() }
  }

  pub fn base(kind: ViolationKind, message: impl Into<String>) -> Self {
    Self { field: None, kind, message: message.into() }
  }
}

impl fmt::Display for ValidationError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.field {
      Some(field) => write!(f, "{field}: {}", self.message),
      None => f.write_str(&self.message),
    }
  }
}

/// The validation-error set of one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
  pub fn new() -> Self { Self::default() }

  pub fn push(&mut self, error: ValidationError) { self.0.push(error); }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn iter(&self) -> impl Iterator<Item = &ValidationError> { self.0.iter() }

  /// Errors attached to `field`.
  pub fn on<'a>(
    &'a self,
    field: &'a str,
  ) -> impl Iterator<Item = &'a ValidationError> + 'a {
    self.0.iter().filter(move |e| e.field.as_deref() == Some(field))
  }

  pub fn has(&self, kind: ViolationKind) -> bool {
    self.0.iter().any(|e| e.kind == kind)
  }

  /// `Ok(())` when empty, otherwise [`crate::Error::Invalid`].
  pub fn into_result(self) -> Result<()> {
    if self.is_empty() { Ok(()) } else { Err(self.into()) }
  }
}

impl Extend<ValidationError> for ValidationErrors {
  fn extend<T: IntoIterator<Item = ValidationError>>(&mut self, iter: T) {
    self.0.extend(iter);
  }
}

impl FromIterator<ValidationError> for ValidationErrors {
  fn from_iter<T: IntoIterator<Item = ValidationError>>(iter: T) -> Self {
    Self(iter.into_iter().collect())
  }
}

impl From<ValidationError> for ValidationErrors {
  fn from(error: ValidationError) -> Self { Self(vec![error]) }
}

impl IntoIterator for ValidationErrors {
  type Item = ValidationError;
  type IntoIter = std::vec::IntoIter<ValidationError>;

  fn into_iter(self) -> Self::IntoIter { self.0.into_iter() }
}

impl fmt::Display for ValidationErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, error) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str("; ")?;
      }
      write!(f, "{error}")?;
    }
    Ok(())
  }
}
