//! Error type for `annals-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] annals_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held a value with no [`annals_core::Scalar`] counterpart.
  #[error("unsupported value in column {column}: {kind}")]
  ColumnType { column: String, kind: &'static str },

  /// A constraint failed that does not correspond to a validation rule.
  #[error("constraint violation: {0}")]
  Constraint(String),
}

impl From<Error> for annals_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::Core(inner) => inner,
      other => annals_core::Error::Storage(Box::new(other)),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
