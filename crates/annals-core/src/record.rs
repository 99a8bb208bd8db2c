//! Rows managed by the engine, and the proposed state submitted for writing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
  Attributes, Error, Result, Scalar,
  identity::ActorId,
  interval::{self, Bound},
};

// ─── Special columns ─────────────────────────────────────────────────────────

pub const ID: &str = "id";
pub const GROUP_ID: &str = "group_id";
pub const USER_ID: &str = "user_id";
pub const CREATED_DT: &str = "created_dt";
pub const OBSOLETED_DT: &str = "obsoleted_dt";
pub const O_USER_ID: &str = "o_user_id";

/// Columns every versioned table carries, in storage order.
pub const SPECIAL_COLUMNS: [&str; 6] =
  [ID, GROUP_ID, USER_ID, CREATED_DT, OBSOLETED_DT, O_USER_ID];

// ─── Record ──────────────────────────────────────────────────────────────────

/// One version of a logical entity.
///
/// `id`, `group_id` and `created_dt` never change after insertion.
/// `obsoleted_dt` changes exactly once, from infinity to the close instant,
/// together with `o_user_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub id:           Uuid,
  /// Shared by every version of the same logical entity.
  pub group_id:     Uuid,
  /// Actor who wrote this version, if one could be resolved.
  pub user_id:      Option<ActorId>,
  pub created_dt:   DateTime<Utc>,
  pub obsoleted_dt: Bound,
  /// Actor who closed this version.
  pub o_user_id:    Option<ActorId>,
  pub attributes:   Attributes,
}

impl Record {
  pub fn is_open(&self) -> bool { self.obsoleted_dt.is_infinite() }

  /// Whether this version is visible at `t`.
  pub fn contains(&self, t: Bound) -> bool {
    interval::contains(self.created_dt, self.obsoleted_dt, t)
  }

  pub fn get(&self, attribute: &str) -> Option<&Scalar> {
    self.attributes.get(attribute)
  }

  /// Deserialise the business attributes into a typed entity.
  pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
    let map = self
      .attributes
      .iter()
      .map(|(k, v)| (k.clone(), v.to_json()))
      .collect::<serde_json::Map<_, _>>();
    Ok(serde_json::from_value(serde_json::Value::Object(map))?)
  }
}

// ─── Draft ───────────────────────────────────────────────────────────────────

/// Proposed state of a new version, passed to
/// [`crate::engine::Engine::create`].
///
/// Unset fields are filled in by the write pipeline: `group_id` defaults to
/// the new row's id, `created_dt` to now, `obsoleted_dt` to infinity.
#[derive(Debug, Clone, Default)]
pub struct Draft {
  pub group_id:     Option<Uuid>,
  pub created_dt:   Option<DateTime<Utc>>,
  pub obsoleted_dt: Option<Bound>,
  pub user_id:      Option<ActorId>,
  pub attributes:   Attributes,
}

impl Draft {
  pub fn new() -> Self { Self::default() }

  pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Scalar>) -> Self {
    self.attributes.insert(attribute.into(), value.into());
    self
  }

  /// Open the draft as a new version of an existing chain.
  pub fn in_group(mut self, group_id: Uuid) -> Self {
    self.group_id = Some(group_id);
    self
  }

  pub fn created_at(mut self, dt: DateTime<Utc>) -> Self {
    self.created_dt = Some(dt);
    self
  }

  pub fn obsoleted_at(mut self, bound: impl Into<Bound>) -> Self {
    self.obsoleted_dt = Some(bound.into());
    self
  }

  /// Build a draft from the serialised fields of a typed entity.
  pub fn from_entity<T: Serialize>(entity: &T) -> Result<Self> {
    let serde_json::Value::Object(fields) = serde_json::to_value(entity)?
    else {
      return Err(Error::UnsupportedValue {
        attribute: "<entity>".to_owned(),
        kind:      "entities must serialise to a map",
      });
    };

    let attributes = fields
      .into_iter()
      .map(|(k, v)| {
        let value = Scalar::from_json(&k, v)?;
        Ok((k, value))
      })
      .collect::<Result<Attributes>>()?;

    Ok(Self { attributes, ..Self::default() })
  }
}
