//! Scalar values held in business attributes.
//!
//! The variants mirror the storage classes of a relational column. Typed
//! entities are bridged through `serde_json`, see
//! [`crate::record::Draft::from_entity`] and [`crate::record::Record::decode`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Business attributes of a row, keyed by column name.
pub type Attributes = BTreeMap<String, Scalar>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
  #[default]
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
}

impl Scalar {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  pub fn as_text(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      _ => None,
    }
  }

  /// Read a text value as a record id. Anything else yields `None`.
  pub fn as_uuid(&self) -> Option<Uuid> {
    self.as_text().and_then(|s| Uuid::parse_str(s).ok())
  }

  /// Convert a JSON value produced by serialising a typed entity field.
  pub fn from_json(attribute: &str, value: serde_json::Value) -> Result<Self> {
    use serde_json::Value;

    match value {
      Value::Null => Ok(Self::Null),
      Value::Bool(b) => Ok(Self::Integer(i64::from(b))),
      Value::Number(n) => match n.as_i64() {
        Some(i) => Ok(Self::Integer(i)),
        None => n.as_f64().map(Self::Real).ok_or(Error::UnsupportedValue {
          attribute: attribute.to_owned(),
          kind:      "number out of range",
        }),
      },
      Value::String(s) => Ok(Self::Text(s)),
      Value::Array(_) => Err(Error::UnsupportedValue {
        attribute: attribute.to_owned(),
        kind:      "array",
      }),
      Value::Object(_) => Err(Error::UnsupportedValue {
        attribute: attribute.to_owned(),
        kind:      "object",
      }),
    }
  }

  pub fn to_json(&self) -> serde_json::Value {
    use serde_json::Value;

    match self {
      Self::Null => Value::Null,
      Self::Integer(i) => Value::from(*i),
      // Non-finite reals have no JSON form.
      Self::Real(f) => serde_json::Number::from_f64(*f)
        .map(Value::Number)
        .unwrap_or(Value::Null),
      Self::Text(s) => Value::String(s.clone()),
    }
  }
}

impl From<i64> for Scalar {
  fn from(v: i64) -> Self { Self::Integer(v) }
}

impl From<i32> for Scalar {
  fn from(v: i32) -> Self { Self::Integer(v.into()) }
}

impl From<f64> for Scalar {
  fn from(v: f64) -> Self { Self::Real(v) }
}

impl From<&str> for Scalar {
  fn from(v: &str) -> Self { Self::Text(v.to_owned()) }
}

impl From<String> for Scalar {
  fn from(v: String) -> Self { Self::Text(v) }
}

impl From<Uuid> for Scalar {
  fn from(v: Uuid) -> Self { Self::Text(v.hyphenated().to_string()) }
}

impl From<DateTime<Utc>> for Scalar {
  fn from(v: DateTime<Utc>) -> Self { Self::Text(v.to_rfc3339()) }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
  fn from(v: Option<T>) -> Self { v.map_or(Self::Null, Into::into) }
}
