//! Encoding and decoding helpers between Rust domain types and the values
//! stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width UTC text and open ends as
//! `'infinity'`, so interval predicates compare as plain strings. UUIDs are
//! stored as hyphenated lowercase strings, actor ids as integers.

use annals_core::{ActorId, Attributes, Bound, Record, Scalar};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── Bound / DateTime<Utc> ───────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { Bound::At(dt).encode() }

pub fn decode_bound(s: &str) -> Result<Bound> {
  Bound::decode(&Scalar::from(s)).map_err(|e| Error::DateParse(e.to_string()))
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  decode_bound(s)?
    .instant()
    .ok_or_else(|| Error::DateParse(format!("{s:?} is not a concrete instant")))
}

// ─── ActorId ─────────────────────────────────────────────────────────────────

pub fn encode_actor(actor: Option<ActorId>) -> Option<i64> { actor.map(|a| a.0) }

pub fn decode_actor(raw: Option<i64>) -> Option<ActorId> { raw.map(ActorId) }

// ─── Scalar ──────────────────────────────────────────────────────────────────

pub fn encode_scalar(value: &Scalar) -> Value {
  match value {
    Scalar::Null => Value::Null,
    Scalar::Integer(i) => Value::Integer(*i),
    Scalar::Real(f) => Value::Real(*f),
    Scalar::Text(s) => Value::Text(s.clone()),
  }
}

pub fn decode_scalar(column: &str, value: Value) -> Result<Scalar> {
  match value {
    Value::Null => Ok(Scalar::Null),
    Value::Integer(i) => Ok(Scalar::Integer(i)),
    Value::Real(f) => Ok(Scalar::Real(f)),
    Value::Text(s) => Ok(Scalar::Text(s)),
    Value::Blob(_) => Err(Error::ColumnType {
      column: column.to_owned(),
      kind:   "blob",
    }),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a versioned row, in
/// [`crate::schema::select_list`] order.
pub struct RawRecord {
  pub id:           String,
  pub group_id:     String,
  pub user_id:      Option<i64>,
  pub created_dt:   String,
  pub obsoleted_dt: String,
  pub o_user_id:    Option<i64>,
  pub attributes:   Vec<(String, Value)>,
}

impl RawRecord {
  pub fn read(row: &rusqlite::Row<'_>, attributes: &[String]) -> rusqlite::Result<Self> {
    let mut values = Vec::with_capacity(attributes.len());
    for (i, name) in attributes.iter().enumerate() {
      values.push((name.clone(), row.get::<_, Value>(6 + i)?));
    }

    Ok(Self {
      id:           row.get(0)?,
      group_id:     row.get(1)?,
      user_id:      row.get(2)?,
      created_dt:   row.get(3)?,
      obsoleted_dt: row.get(4)?,
      o_user_id:    row.get(5)?,
      attributes:   values,
    })
  }

  pub fn into_record(self) -> Result<Record> {
    let attributes = self
      .attributes
      .into_iter()
      .map(|(name, value)| {
        let scalar = decode_scalar(&name, value)?;
        Ok((name, scalar))
      })
      .collect::<Result<Attributes>>()?;

    Ok(Record {
      id: decode_uuid(&self.id)?,
      group_id: decode_uuid(&self.group_id)?,
      user_id: decode_actor(self.user_id),
      created_dt: decode_dt(&self.created_dt)?,
      obsoleted_dt: decode_bound(&self.obsoleted_dt)?,
      o_user_id: decode_actor(self.o_user_id),
      attributes,
    })
  }
}

/// Column values for an `INSERT` in [`crate::schema::select_list`] order.
pub fn insert_values(record: &Record, attributes: &[String]) -> Vec<Value> {
  let mut values = vec![
    Value::Text(encode_uuid(record.id)),
    Value::Text(encode_uuid(record.group_id)),
    encode_actor(record.user_id).map_or(Value::Null, Value::Integer),
    Value::Text(encode_dt(record.created_dt)),
    Value::Text(record.obsoleted_dt.encode()),
    encode_actor(record.o_user_id).map_or(Value::Null, Value::Integer),
  ];
  values.extend(
    attributes
      .iter()
      .map(|a| record.attributes.get(a).map_or(Value::Null, encode_scalar)),
  );
  values
}
