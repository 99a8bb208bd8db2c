//! [`SqliteStore`]: the SQLite implementation of [`Storage`].

use std::path::Path;

use annals_core::{
  EntityType, Record, Registry,
  identity::ActorId,
  interval::INFINITY,
  record::{GROUP_ID, OBSOLETED_DT},
  storage::{Selection, Storage},
  uniqueness::KeyProbe,
  validation::{ValidationError, ViolationKind},
};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, types::Value};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    RawRecord, encode_actor, encode_dt, encode_scalar, encode_uuid, decode_uuid,
    insert_values,
  },
  schema::{PRAGMAS, quote, select_list, table_ddl},
};

// ─── Statement helpers ───────────────────────────────────────────────────────

fn where_clause(conds: &[String]) -> String {
  if conds.is_empty() {
    String::new()
  } else {
    format!("WHERE {}", conds.join(" AND "))
  }
}

fn insert_sql(entity: &EntityType) -> String {
  let columns = select_list(entity);
  let placeholders = (1..=6 + entity.business_attributes().len())
    .map(|i| format!("?{i}"))
    .collect::<Vec<_>>()
    .join(", ");
  format!(
    "INSERT INTO {} ({columns}) VALUES ({placeholders})",
    quote(entity.name())
  )
}

fn close_sql(entity: &EntityType) -> String {
  format!(
    "UPDATE {} SET obsoleted_dt = ?1, o_user_id = ?2
     WHERE id = ?3 AND obsoleted_dt = '{INFINITY}'",
    quote(entity.name())
  )
}

/// The message of a constraint failure, if `e` is one.
fn constraint_message(e: &rusqlite::Error) -> Option<String> {
  if let rusqlite::Error::SqliteFailure(err, msg) = e
    && err.code == rusqlite::ErrorCode::ConstraintViolation
  {
    return Some(msg.clone().unwrap_or_default());
  }
  None
}

/// Map a constraint failure onto the validation rule it enforces.
///
/// SQLite names the columns of the violated index, e.g.
/// `UNIQUE constraint failed: products.sku, products.obsoleted_dt`.
fn constraint_violation(entity: &EntityType, message: &str) -> Error {
  let error = if message.starts_with("UNIQUE") {
    if message.contains(&format!(".{OBSOLETED_DT}"))
      && let Some(uniqueness) = entity.uniqueness()
    {
      Some(uniqueness.violation())
    } else if message.ends_with(&format!(".{GROUP_ID}")) {
      Some(ValidationError::on(
        GROUP_ID,
        ViolationKind::OpenVersionExists,
        "version chain already has an open version",
      ))
    } else {
      None
    }
  } else if message.starts_with("CHECK") {
    Some(ValidationError::on(
      OBSOLETED_DT,
      ViolationKind::InvalidInterval,
      "must be after created_dt",
    ))
  } else {
    None
  };

  match error {
    Some(error) => {
      tracing::debug!(entity = entity.name(), reason = message, "constraint rejected write");
      Error::Core(annals_core::Error::Invalid(error.into()))
    }
    None => Error::Constraint(message.to_owned()),
  }
}

/// A `COUNT(*)` result. A negative count fails rather than reading as "no
/// dependents".
fn dependent_count(count: i64) -> Result<u64> {
  u64::try_from(count)
    .map_err(|_| Error::Constraint(format!("negative dependent count {count}")))
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Versioned tables backed by a single SQLite file.
///
/// Clones share one connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and create the tables for every type
  /// in `registry`.
  pub async fn open(path: impl AsRef<Path>, registry: &Registry) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema(registry).await?;
    Ok(store)
  }

  /// Open an in-memory store.
  pub async fn open_in_memory(registry: &Registry) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema(registry).await?;
    Ok(store)
  }

  async fn init_schema(&self, registry: &Registry) -> Result<()> {
    let mut ddl = PRAGMAS.to_owned();
    for entity in registry.entities() {
      ddl.push_str(&table_ddl(entity));
    }

    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&ddl)?;
        Ok(())
      })
      .await?;
    tracing::debug!("schema initialised");
    Ok(())
  }

  /// Execute one write statement; constraint failures come back as
  /// `Err(message)` instead of a database error.
  async fn execute(
    &self,
    sql: String,
    params: Vec<Value>,
  ) -> Result<std::result::Result<usize, String>> {
    let outcome = self
      .conn
      .call(move |conn| {
        match conn.execute(&sql, rusqlite::params_from_iter(params)) {
          Ok(n) => Ok(Ok(n)),
          Err(e) => match constraint_message(&e) {
            Some(message) => Ok(Err(message)),
            None => Err(e.into()),
          },
        }
      })
      .await?;
    Ok(outcome)
  }

  async fn fetch_row(&self, entity: &EntityType, id: Uuid) -> Result<Option<Record>> {
    let sql = format!(
      "SELECT {} FROM {} WHERE id = ?1",
      select_list(entity),
      quote(entity.name())
    );
    let attributes = entity.business_attributes().to_vec();
    let id_str = encode_uuid(id);

    let raw: Option<RawRecord> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id_str], |row| {
              RawRecord::read(row, &attributes)
            })
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRecord::into_record).transpose()
  }

  async fn select_rows(
    &self,
    entity: &EntityType,
    selection: &Selection,
  ) -> Result<Vec<Record>> {
    let mut conds: Vec<String> = vec![];
    let mut params: Vec<Value> = vec![];

    if let Some(ts) = selection.as_of {
      params.push(Value::Text(ts.encode()));
      let n = params.len();
      conds.push(format!("obsoleted_dt >= ?{n} AND created_dt < ?{n}"));
    }
    if let Some(group_id) = selection.group_id {
      params.push(Value::Text(encode_uuid(group_id)));
      conds.push(format!("group_id = ?{}", params.len()));
    }
    for (column, value) in &selection.equals {
      params.push(encode_scalar(value));
      conds.push(format!("{} IS ?{}", quote(column), params.len()));
    }

    let sql = format!(
      "SELECT {} FROM {} {} ORDER BY created_dt, id",
      select_list(entity),
      quote(entity.name()),
      where_clause(&conds)
    );
    let attributes = entity.business_attributes().to_vec();

    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |row| {
            RawRecord::read(row, &attributes)
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecord::into_record).collect()
  }

  async fn find_conflicting(
    &self,
    entity: &EntityType,
    probe: &KeyProbe,
  ) -> Result<Option<Uuid>> {
    let mut conds: Vec<String> = vec![];
    let mut params: Vec<Value> = vec![];

    for (column, value) in &probe.columns {
      params.push(encode_scalar(value));
      conds.push(format!("{} IS ?{}", quote(column), params.len()));
    }
    params.push(Value::Text(probe.obsoleted_dt.encode()));
    conds.push(format!("obsoleted_dt = ?{}", params.len()));
    for id in &probe.exclude {
      params.push(Value::Text(encode_uuid(*id)));
      conds.push(format!("id != ?{}", params.len()));
    }

    let sql = format!(
      "SELECT id FROM {} {} LIMIT 1",
      quote(entity.name()),
      where_clause(&conds)
    );

    let found: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params_from_iter(params), |r| r.get(0))
            .optional()?,
        )
      })
      .await?;

    found.as_deref().map(decode_uuid).transpose()
  }

  async fn count_dependents(
    &self,
    dependent: &EntityType,
    foreign_key: &str,
    parent_id: Uuid,
  ) -> Result<u64> {
    let sql = format!(
      "SELECT COUNT(*) FROM {} WHERE obsoleted_dt = '{INFINITY}' AND {} = ?1",
      quote(dependent.name()),
      quote(foreign_key)
    );
    let parent_str = encode_uuid(parent_id);

    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(&sql, rusqlite::params![parent_str], |r| r.get(0))?)
      })
      .await?;

    dependent_count(count)
  }

  async fn insert_row(&self, entity: &EntityType, record: &Record) -> Result<()> {
    let params = insert_values(record, entity.business_attributes());
    match self.execute(insert_sql(entity), params).await? {
      Ok(_) => Ok(()),
      Err(message) => Err(constraint_violation(entity, &message)),
    }
  }

  async fn update_row(&self, entity: &EntityType, record: &Record) -> Result<()> {
    let mut sets = vec!["user_id = ?1".to_owned()];
    let mut params = vec![
      encode_actor(record.user_id).map_or(Value::Null, Value::Integer),
    ];
    for name in entity.business_attributes() {
      let value = record.attributes.get(name).map_or(Value::Null, encode_scalar);
      params.push(value);
      sets.push(format!("{} = ?{}", quote(name), params.len()));
    }
    params.push(Value::Text(encode_uuid(record.id)));

    let sql = format!(
      "UPDATE {} SET {} WHERE id = ?{}",
      quote(entity.name()),
      sets.join(", "),
      params.len()
    );

    match self.execute(sql, params).await? {
      Ok(_) => Ok(()),
      Err(message) => Err(constraint_violation(entity, &message)),
    }
  }

  async fn close_row(
    &self,
    entity: &EntityType,
    id: Uuid,
    at: DateTime<Utc>,
    o_user_id: Option<ActorId>,
  ) -> Result<bool> {
    let params = vec![
      Value::Text(encode_dt(at)),
      encode_actor(o_user_id).map_or(Value::Null, Value::Integer),
      Value::Text(encode_uuid(id)),
    ];
    match self.execute(close_sql(entity), params).await? {
      Ok(n) => Ok(n == 1),
      Err(message) => Err(constraint_violation(entity, &message)),
    }
  }

  async fn supersede_rows(
    &self,
    entity: &EntityType,
    id: Uuid,
    at: DateTime<Utc>,
    o_user_id: Option<ActorId>,
    replacement: &Record,
  ) -> Result<bool> {
    let close = close_sql(entity);
    let close_params = vec![
      Value::Text(encode_dt(at)),
      encode_actor(o_user_id).map_or(Value::Null, Value::Integer),
      Value::Text(encode_uuid(id)),
    ];
    let insert = insert_sql(entity);
    let insert_params = insert_values(replacement, entity.business_attributes());

    // Ok(Some(true)) committed, Ok(Some(false)) nothing open to close,
    // Err(message) constraint failure. Dropping the transaction rolls back.
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let closed = match tx.execute(&close, rusqlite::params_from_iter(close_params)) {
          Ok(n) => n,
          Err(e) => match constraint_message(&e) {
            Some(message) => return Ok(Err(message)),
            None => return Err(e.into()),
          },
        };
        if closed != 1 {
          return Ok(Ok(false));
        }

        if let Err(e) = tx.execute(&insert, rusqlite::params_from_iter(insert_params)) {
          return match constraint_message(&e) {
            Some(message) => Ok(Err(message)),
            None => Err(e.into()),
          };
        }

        tx.commit()?;
        Ok(Ok(true))
      })
      .await?;

    outcome.map_err(|message| constraint_violation(entity, &message))
  }

  async fn delete_row(&self, entity: &EntityType, id: Uuid) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", quote(entity.name()));
    match self.execute(sql, vec![Value::Text(encode_uuid(id))]).await? {
      Ok(n) => Ok(n > 0),
      Err(message) => Err(constraint_violation(entity, &message)),
    }
  }
}

// ─── Storage impl ────────────────────────────────────────────────────────────

impl Storage for SqliteStore {
  async fn fetch(
    &self,
    entity: &EntityType,
    id: Uuid,
  ) -> annals_core::Result<Option<Record>> {
    Ok(self.fetch_row(entity, id).await?)
  }

  async fn select(
    &self,
    entity: &EntityType,
    selection: &Selection,
  ) -> annals_core::Result<Vec<Record>> {
    Ok(self.select_rows(entity, selection).await?)
  }

  async fn find_conflict(
    &self,
    entity: &EntityType,
    probe: &KeyProbe,
  ) -> annals_core::Result<Option<Uuid>> {
    Ok(self.find_conflicting(entity, probe).await?)
  }

  async fn count_open_dependents(
    &self,
    dependent: &EntityType,
    foreign_key: &str,
    parent_id: Uuid,
  ) -> annals_core::Result<u64> {
    Ok(self.count_dependents(dependent, foreign_key, parent_id).await?)
  }

  async fn insert(&self, entity: &EntityType, record: &Record) -> annals_core::Result<()> {
    Ok(self.insert_row(entity, record).await?)
  }

  async fn update(&self, entity: &EntityType, record: &Record) -> annals_core::Result<()> {
    Ok(self.update_row(entity, record).await?)
  }

  async fn close(
    &self,
    entity: &EntityType,
    id: Uuid,
    at: DateTime<Utc>,
    o_user_id: Option<ActorId>,
  ) -> annals_core::Result<bool> {
    Ok(self.close_row(entity, id, at, o_user_id).await?)
  }

  async fn supersede(
    &self,
    entity: &EntityType,
    id: Uuid,
    at: DateTime<Utc>,
    o_user_id: Option<ActorId>,
    replacement: &Record,
  ) -> annals_core::Result<bool> {
    Ok(self.supersede_rows(entity, id, at, o_user_id, replacement).await?)
  }

  async fn delete(&self, entity: &EntityType, id: Uuid) -> annals_core::Result<bool> {
    Ok(self.delete_row(entity, id).await?)
  }
}
