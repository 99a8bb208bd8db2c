//! `annals`: operate on versioned records in a SQLite store.
//!
//! Entity types are declared in the TOML config (see [`config`]); every
//! invocation opens the store, creates any missing tables, runs one command
//! and prints the result as JSON.
//!
//! # Usage
//!
//! ```text
//! annals --config shop.toml create products sku=A-1 price=10
//! annals --actor 7 supersede products <id> price=12
//! annals as-of products 2024-06-01T00:00:00Z sku=A-1
//! ```

mod commands;
mod config;

use std::path::{Path, PathBuf};

use annals_core::{
  ActorId, Engine,
  identity::{self, Whodunnit},
};
use annals_store_sqlite::SqliteStore;
use anyhow::Context as _;
use clap::Parser;
use commands::Command;
use config::CliConfig;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Bitemporal record versioning over SQLite")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "annals.toml")]
  config: PathBuf,

  /// Actor recorded on writes; overrides `actor_id` from the config.
  #[arg(long)]
  actor: Option<i64>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Logs go to stderr; stdout carries the JSON result.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let cfg = CliConfig::load(&cli.config)?;
  let registry = cfg.registry().context("invalid entity declarations")?;

  let store_path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path, &registry)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  tracing::debug!(path = ?store_path, "store opened");

  let engine = Engine::new(store, registry, Whodunnit)?;
  let actor = cli.actor.or(cfg.actor_id).map(ActorId);

  let output = identity::scope(actor, commands::run(&engine, cli.command)).await?;
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
