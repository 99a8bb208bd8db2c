//! Subcommands and their execution against an [`Engine`].

use annals_core::{Attributes, Draft, Engine, Identity, Scalar, Storage};
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde_json::{Value, json};
use uuid::Uuid;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Create tables for every declared entity type and list them.
  Init,

  /// Insert a new version. Without `--group` it starts a new chain.
  Create {
    entity: String,
    /// Attribute values as KEY=VALUE. VALUE is read as JSON, falling back to
    /// plain text.
    #[arg(value_parser = parse_assignment)]
    values: Vec<(String, Scalar)>,
    /// Add the version to an existing chain.
    #[arg(long)]
    group: Option<Uuid>,
    #[arg(long)]
    created: Option<DateTime<Utc>>,
    /// Close the version at this instant instead of leaving it open.
    #[arg(long)]
    obsoleted: Option<DateTime<Utc>>,
  },

  /// Overwrite attributes of a row in place.
  Update {
    entity: String,
    id:     Uuid,
    #[arg(value_parser = parse_assignment)]
    values: Vec<(String, Scalar)>,
  },

  /// Close an open version and open its replacement.
  Supersede {
    entity: String,
    id:     Uuid,
    #[arg(value_parser = parse_assignment)]
    values: Vec<(String, Scalar)>,
  },

  /// Close an open version.
  Obsolete {
    entity: String,
    id:     Uuid,
    /// Close instant (default now).
    #[arg(long)]
    at:     Option<DateTime<Utc>>,
  },

  /// Physically delete a row.
  Remove { entity: String, id: Uuid },

  /// Print one row.
  Get { entity: String, id: Uuid },

  /// Print every version of a chain, oldest first.
  History { entity: String, group_id: Uuid },

  /// Print the rows open at TS, optionally filtered by KEY=VALUE pairs.
  ///
  /// TS is an RFC 3339 timestamp, Unix seconds, or `infinity` for the
  /// current rows.
  AsOf {
    entity:  String,
    #[arg(value_parser = parse_scalar)]
    ts:      Scalar,
    #[arg(value_parser = parse_assignment)]
    filters: Vec<(String, Scalar)>,
  },
}

/// Parse a command-line value: JSON where it parses, text otherwise.
pub fn parse_scalar(raw: &str) -> Result<Scalar, String> {
  let json = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
  Scalar::from_json("value", json).map_err(|e| e.to_string())
}

/// Parse `KEY=VALUE`.
pub fn parse_assignment(raw: &str) -> Result<(String, Scalar), String> {
  let (key, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
  if key.is_empty() {
    return Err(format!("missing attribute name in {raw:?}"));
  }
  Ok((key.to_owned(), parse_scalar(value)?))
}

fn attributes(values: Vec<(String, Scalar)>) -> Attributes { values.into_iter().collect() }

pub async fn run<S, I>(engine: &Engine<S, I>, command: Command) -> anyhow::Result<Value>
where
  S: Storage,
  I: Identity,
{
  let output = match command {
    Command::Init => {
      let entities: Vec<&str> = engine.registry().entities().map(|e| e.name()).collect();
      json!({ "entities": entities })
    }

    Command::Create { entity, values, group, created, obsoleted } => {
      let mut draft = Draft { attributes: attributes(values), ..Draft::new() };
      if let Some(group) = group {
        draft = draft.in_group(group);
      }
      if let Some(created) = created {
        draft = draft.created_at(created);
      }
      if let Some(obsoleted) = obsoleted {
        draft = draft.obsoleted_at(obsoleted);
      }
      let record = engine
        .create(&entity, draft)
        .await
        .with_context(|| format!("failed to create {entity}"))?;
      serde_json::to_value(record)?
    }

    Command::Update { entity, id, values } => {
      let record = engine
        .update(&entity, id, attributes(values))
        .await
        .with_context(|| format!("failed to update {entity} {id}"))?;
      serde_json::to_value(record)?
    }

    Command::Supersede { entity, id, values } => {
      let supersession = engine
        .supersede(&entity, id, attributes(values))
        .await
        .with_context(|| format!("failed to supersede {entity} {id}"))?;
      match supersession {
        Some(supersession) => serde_json::to_value(supersession)?,
        None => json!({ "unchanged": id }),
      }
    }

    Command::Obsolete { entity, id, at } => {
      let record = engine
        .obsolete(&entity, id, at)
        .await
        .with_context(|| format!("failed to obsolete {entity} {id}"))?;
      serde_json::to_value(record)?
    }

    Command::Remove { entity, id } => {
      engine
        .remove(&entity, id)
        .await
        .with_context(|| format!("failed to remove {entity} {id}"))?;
      json!({ "removed": id })
    }

    Command::Get { entity, id } => {
      let record = engine
        .get(&entity, id)
        .await?
        .with_context(|| format!("{entity} record not found: {id}"))?;
      serde_json::to_value(record)?
    }

    Command::History { entity, group_id } => {
      serde_json::to_value(engine.history(&entity, group_id).await?)?
    }

    Command::AsOf { entity, ts, filters } => {
      let entity = entity.as_str();
      let records = engine
        .as_of(ts, |scope| async move { scope.find_by(entity, filters).await })
        .await?;
      serde_json::to_value(records)?
    }
  };
  Ok(output)
}
