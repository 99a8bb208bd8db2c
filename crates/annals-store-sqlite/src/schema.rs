//! SQL schema for declared entity types.
//!
//! Executed once at connection startup; every statement is idempotent thanks
//! to `IF NOT EXISTS`. Column changes to an existing table are not handled.

use annals_core::{EntityType, record::SPECIAL_COLUMNS};

/// Connection-level settings applied before any table DDL.
pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
";

/// Quote an identifier. Declarations are validated, so this never needs to
/// escape.
pub fn quote(ident: &str) -> String { format!("\"{ident}\"") }

/// Comma-separated column list in storage order: special columns, then the
/// business attributes in declaration order.
pub fn select_list(entity: &EntityType) -> String {
  SPECIAL_COLUMNS
    .iter()
    .map(|c| (*c).to_owned())
    .chain(entity.business_attributes().iter().map(|a| quote(a)))
    .collect::<Vec<_>>()
    .join(", ")
}

/// Table and index DDL for one entity type.
pub fn table_ddl(entity: &EntityType) -> String {
  let table = entity.name();
  let business: String = entity
    .business_attributes()
    .iter()
    .map(|a| format!(",\n    {}", quote(a)))
    .collect();

  let mut ddl = format!(
    "
CREATE TABLE IF NOT EXISTS \"{table}\" (
    id            TEXT PRIMARY KEY,
    group_id      TEXT NOT NULL,
    user_id       INTEGER,
    created_dt    TEXT NOT NULL,   -- fixed-width UTC, see interval::TIMESTAMP_FORMAT
    obsoleted_dt  TEXT NOT NULL DEFAULT 'infinity',
    o_user_id     INTEGER{business},
    CHECK (obsoleted_dt = 'infinity' OR created_dt < obsoleted_dt)
);

-- At most one open version per chain.
CREATE UNIQUE INDEX IF NOT EXISTS \"{table}_open_version\"
    ON \"{table}\"(group_id) WHERE obsoleted_dt = 'infinity';

CREATE INDEX IF NOT EXISTS \"{table}_interval_idx\" ON \"{table}\"(obsoleted_dt, created_dt);
CREATE INDEX IF NOT EXISTS \"{table}_group_idx\"    ON \"{table}\"(group_id, created_dt);
"
  );

  if let Some(uniqueness) = entity.uniqueness() {
    let key = uniqueness
      .enforced_key()
      .into_iter()
      .map(quote)
      .collect::<Vec<_>>()
      .join(", ");
    ddl.push_str(&format!(
      "CREATE UNIQUE INDEX IF NOT EXISTS \"{table}_business_key\" ON \"{table}\"({key});\n"
    ));
  }

  for reference in entity.references() {
    let fk = &reference.foreign_key;
    ddl.push_str(&format!(
      "CREATE INDEX IF NOT EXISTS \"{table}_{fk}_idx\" ON \"{table}\"(\"{fk}\", obsoleted_dt);\n"
    ));
  }

  ddl
}
