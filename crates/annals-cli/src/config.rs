//! Configuration for the `annals` binary.
//!
//! Read from a TOML file, then overridden by `ANNALS_`-prefixed environment
//! variables (`ANNALS_STORE_PATH`, `ANNALS_ACTOR_ID`).
//!
//! ```toml
//! store_path = "annals.db"
//! actor_id   = 7
//!
//! [[entities]]
//! name        = "categories"
//! unique      = ["name"]
//! append_only = true
//!
//! [[entities]]
//! name       = "products"
//! attributes = ["price"]
//! unique     = ["sku"]
//! belongs_to = [{ name = "category", parent = "categories" }]
//! ```

use std::path::{Path, PathBuf};

use annals_core::{EntityType, Error, Registry};
use anyhow::Context as _;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  /// Actor recorded on every write made by this invocation.
  #[serde(default)]
  pub actor_id:   Option<i64>,
  #[serde(default)]
  pub entities:   Vec<EntityConfig>,
}

fn default_store_path() -> PathBuf { PathBuf::from("annals.db") }

/// One declared entity type.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
  pub name:        String,
  #[serde(default)]
  pub attributes:  Vec<String>,
  /// Business key. Declares the attributes it names.
  #[serde(default)]
  pub unique:      Vec<String>,
  /// Extra attributes the business key is unique within.
  #[serde(default)]
  pub scope:       Vec<String>,
  #[serde(default)]
  pub append_only: bool,
  #[serde(default)]
  pub belongs_to:  Vec<ReferenceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceConfig {
  pub name:        String,
  /// Defaults to `{name}_id`.
  pub foreign_key: Option<String>,
  pub parent:      String,
}

impl ReferenceConfig {
  fn foreign_key(&self) -> String {
    self
      .foreign_key
      .clone()
      .unwrap_or_else(|| format!("{}_id", self.name))
  }
}

impl CliConfig {
  /// Layer `path` (optional) and the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    Self::build(
      config::Config::builder()
        .add_source(config::File::from(path.to_path_buf()).required(false)),
    )
  }

  fn build(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
  ) -> anyhow::Result<Self> {
    builder
      .add_source(config::Environment::with_prefix("ANNALS"))
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise CliConfig")
  }

  /// Build and cross-check the declared entity types.
  pub fn registry(&self) -> annals_core::Result<Registry> {
    let mut registry = Registry::new();
    for entity in &self.entities {
      registry.register(entity.declare()?)?;
    }
    registry.check_references()?;
    Ok(registry)
  }
}

impl EntityConfig {
  fn declare(&self) -> annals_core::Result<EntityType> {
    let mut entity =
      EntityType::versioned(&self.name).attributes(self.attributes.iter().cloned());

    if !self.unique.is_empty() {
      entity = entity
        .validates_uniqueness_of(self.unique.iter().cloned(), self.scope.iter().cloned())?;
    } else if !self.scope.is_empty() {
      return Err(Error::Declaration(format!(
        "{} declares a uniqueness scope without a unique key",
        self.name
      )));
    }

    for reference in &self.belongs_to {
      entity =
        entity.belongs_to(&reference.name, reference.foreign_key(), &reference.parent);
    }
    if self.append_only {
      entity = entity.append_only();
    }
    Ok(entity)
  }
}
