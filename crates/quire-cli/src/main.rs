//! `quire` — command-line front end for a Quire knowledge base.
//!
//! # Usage
//!
//! ```
//! quire init
//! quire type-set '{"name": "task", "fields_schema": [{"name": "due", "type": "date"}]}'
//! quire item-add '{"title": "File taxes", "type": "task", "data": {"due": "2025-04-15"}}'
//! quire item-search taxes task
//! quire --db /tmp/scratch.db item-list '{"status": "active", "limit": 10}'
//! ```
//!
//! Every command prints one JSON value to stdout. Failures print
//! `{"status": "error", ...}` and exit with status 1. Diagnostics go to
//! stderr and are controlled with `RUST_LOG`.

mod commands;
mod config;

use std::{path::PathBuf, process::ExitCode};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use commands::Command;
use config::Settings;
use quire_store_sqlite::SqliteStore;
use serde_json::{Value, json};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "quire", version, about = "Typed personal knowledge base on SQLite")]
struct Cli {
  /// Path to a TOML config file (default: ~/.config/quire/config.toml).
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Database file; overrides the config file and QUIRE_DB_PATH.
  #[arg(long, value_name = "PATH")]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
  /// Create or upgrade the database and report where it lives.
  Init,
  #[command(flatten)]
  Store(Command),
}

// ─── Entry point ──────────────────────────────────────────────────────────────

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let value = execute(cli).unwrap_or_else(|e| {
    tracing::debug!(error = ?e, "setup failed");
    error_body(None, &format!("{e:#}"))
  });
  print_json(&value);

  if value["status"] == "error" {
    ExitCode::FAILURE
  } else {
    ExitCode::SUCCESS
  }
}

/// Set up settings and the store, then run the command. Setup failures come
/// back as `Err`; command failures are already rendered as JSON.
fn execute(cli: Cli) -> anyhow::Result<Value> {
  let settings = Settings::load(cli.config.as_deref(), cli.db.as_deref())?;

  if let Some(parent) = settings.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }

  let mut store = SqliteStore::open(&settings.db_path)
    .with_context(|| format!("failed to open store at {:?}", settings.db_path))?;

  let command = match cli.command {
    Action::Init => {
      return Ok(json!({
        "status": "ok",
        "message": "Database initialized",
        "path": settings.db_path,
        "search": store.search_strategy().as_str(),
      }));
    }
    Action::Store(command) => command,
  };

  match commands::run(&mut store, command, &settings) {
    Ok(value) => Ok(value),
    Err(e) => {
      // Exit status is decided by the "status" field of the body.
      tracing::debug!(kind = %e.kind(), error = %e, "operation rejected");
      Ok(error_body(Some(e.kind()), &e.to_string()))
    }
  }
}

fn error_body(kind: Option<quire_core::ErrorKind>, message: &str) -> Value {
  let mut body = json!({ "status": "error", "message": message });
  if let Some(kind) = kind {
    body["kind"] = json!(kind.to_string());
  }
  body
}

fn print_json(value: &Value) {
  match serde_json::to_string_pretty(value) {
    Ok(s) => println!("{s}"),
    Err(e) => println!("{{\"status\": \"error\", \"message\": \"{e}\"}}"),
  }
}
