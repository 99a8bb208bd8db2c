//! Validity intervals.
//!
//! A version is visible over `(created_dt, obsoleted_dt]`: not at the instant
//! it was created, but still at the instant it was obsoleted. The open end of
//! the current version is [`Bound::Infinity`].
//!
//! Stored values may spell infinity three ways (numeric `f64::INFINITY`,
//! `"infinity"`, `"Infinity"`). They are folded into [`Bound::Infinity`] when
//! read and always written back as [`INFINITY`].

use std::fmt;

use chrono::{DateTime, Datelike as _, SubsecRound as _, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result, Scalar,
  validation::{ValidationError, ViolationKind},
};

/// Canonical storage spelling of an open end.
pub const INFINITY: &str = "infinity";

/// Fixed-width UTC encoding of concrete timestamps. Lexicographic order of the
/// encoded strings matches chronological order, and every encoded timestamp
/// sorts before [`INFINITY`], for years 0000 to 9999 only. Outside that range
/// `%Y` gains a sign and the order breaks; see [`storable`].
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Years whose encoding stays four digits wide.
pub const STORABLE_YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

/// True iff `value` is one of the accepted spellings of positive infinity.
pub fn is_open_ended_marker(value: &Scalar) -> bool {
  match value {
    Scalar::Real(f) => *f == f64::INFINITY,
    Scalar::Text(s) => s == "infinity" || s == "Infinity",
    _ => false,
  }
}

/// Fold every infinity spelling into [`INFINITY`]; other values pass through.
pub fn normalize_open_ended(value: Scalar) -> Scalar {
  if is_open_ended_marker(&value) {
    Scalar::Text(INFINITY.to_owned())
  } else {
    value
  }
}

/// Current time at storage precision.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

/// Truncate to storage precision so values survive a round trip unchanged.
pub fn truncate(dt: DateTime<Utc>) -> DateTime<Utc> { dt.trunc_subsecs(6) }

/// Pass `dt` through if its encoding sorts correctly, otherwise fail with
/// [`Error::InvalidTimestamp`].
pub fn storable(dt: DateTime<Utc>) -> Result<DateTime<Utc>> {
  if STORABLE_YEARS.contains(&dt.year()) {
    Ok(dt)
  } else {
    Err(Error::InvalidTimestamp(format!(
      "{} is outside years 0000-9999",
      dt.to_rfc3339()
    )))
  }
}

// ─── Bound ───────────────────────────────────────────────────────────────────

/// An interval endpoint: a concrete instant, or the open end.
///
/// `Infinity` orders after every concrete instant.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "Scalar", try_from = "Scalar")]
pub enum Bound {
  At(DateTime<Utc>),
  Infinity,
}

impl Bound {
  pub fn is_infinite(&self) -> bool { matches!(self, Self::Infinity) }

  /// The concrete instant, if any.
  pub fn instant(&self) -> Option<DateTime<Utc>> {
    match self {
      Self::At(dt) => Some(*dt),
      Self::Infinity => None,
    }
  }

  /// Storage encoding: [`TIMESTAMP_FORMAT`] or [`INFINITY`].
  pub fn encode(&self) -> String {
    match self {
      Self::At(dt) => dt.format(TIMESTAMP_FORMAT).to_string(),
      Self::Infinity => INFINITY.to_owned(),
    }
  }

  /// Fail with [`Error::InvalidTimestamp`] unless the bound is infinite or
  /// [`storable`].
  pub fn storable(self) -> Result<Self> {
    match self {
      Self::At(dt) => storable(dt).map(Self::At),
      Self::Infinity => Ok(self),
    }
  }

  /// Read a stored or caller-supplied endpoint.
  ///
  /// Accepts any infinity marker, RFC 3339 text, or integer Unix seconds.
  /// Null, instants outside [`STORABLE_YEARS`] and anything else fail with
  /// [`Error::InvalidTimestamp`].
  pub fn decode(value: &Scalar) -> Result<Self> {
    if is_open_ended_marker(value) {
      return Ok(Self::Infinity);
    }
    Self::decode_concrete(value)?.storable()
  }

  fn decode_concrete(value: &Scalar) -> Result<Self> {
    match value {
      Scalar::Null => {
        Err(Error::InvalidTimestamp("time cannot be null".to_owned()))
      }
      Scalar::Text(s) => DateTime::parse_from_rfc3339(s)
        .map(|dt| Self::At(truncate(dt.with_timezone(&Utc))))
        .map_err(|e| Error::InvalidTimestamp(format!("{s:?}: {e}"))),
      Scalar::Integer(secs) => DateTime::from_timestamp(*secs, 0)
        .map(Self::At)
        .ok_or_else(|| {
          Error::InvalidTimestamp(format!("{secs} is out of range"))
        }),
      Scalar::Real(f) => {
        Err(Error::InvalidTimestamp(format!("{f} is not a timestamp")))
      }
    }
  }
}

impl From<DateTime<Utc>> for Bound {
  fn from(dt: DateTime<Utc>) -> Self { Self::At(truncate(dt)) }
}

impl From<Bound> for Scalar {
  fn from(b: Bound) -> Self { Scalar::Text(b.encode()) }
}

impl TryFrom<Scalar> for Bound {
  type Error = Error;

  fn try_from(value: Scalar) -> Result<Self> { Self::decode(&value) }
}

impl fmt::Display for Bound {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.encode())
  }
}

// ─── Interval tests ──────────────────────────────────────────────────────────

/// Whether a version spanning `created_dt`..`obsoleted_dt` is visible at `t`:
/// `obsoleted_dt >= t AND created_dt < t`.
pub fn contains(created_dt: DateTime<Utc>, obsoleted_dt: Bound, t: Bound) -> bool {
  obsoleted_dt >= t && Bound::At(created_dt) < t
}

/// Normalise a point-in-time argument. Null is a caller error.
pub fn point_in_time(ts: impl Into<Scalar>) -> Result<Bound> {
  Bound::decode(&normalize_open_ended(ts.into()))
}

/// Reject zero-width and inverted intervals.
pub fn check(
  created_dt: DateTime<Utc>,
  obsoleted_dt: Bound,
) -> Option<ValidationError> {
  match obsoleted_dt {
    Bound::At(end) if end <= created_dt => Some(ValidationError::on(
      crate::record::OBSOLETED_DT,
      ViolationKind::InvalidInterval,
      format!("must be after created_dt ({})", Bound::At(created_dt)),
    )),
    _ => None,
  }
}
