//! Error types for `annals-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::validation::ValidationErrors;

#[derive(Debug, Error)]
pub enum Error {
  /// A point-in-time argument was null or could not be read as a timestamp.
  #[error("invalid timestamp: {0}")]
  InvalidTimestamp(String),

  /// The write or removal was rejected; the set lists every failed check.
  #[error("validation failed: {0}")]
  Invalid(ValidationErrors),

  #[error("{entity} record not found: {id}")]
  NotFound { entity: String, id: Uuid },

  #[error("{entity} record {id} is already obsoleted")]
  AlreadyObsoleted { entity: String, id: Uuid },

  #[error("unknown entity type: {0:?}")]
  UnknownEntity(String),

  #[error("unknown attribute {attribute:?} on {entity}")]
  UnknownAttribute { entity: String, attribute: String },

  #[error("unsupported value for attribute {attribute:?}: {kind}")]
  UnsupportedValue { attribute: String, kind: &'static str },

  #[error("invalid declaration: {0}")]
  Declaration(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<ValidationErrors> for Error {
  fn from(errors: ValidationErrors) -> Self { Self::Invalid(errors) }
}

impl Error {
  /// The validation-error set, if this is a validation failure.
  pub fn validation(&self) -> Option<&ValidationErrors> {
    match self {
      Self::Invalid(errors) => Some(errors),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
