//! Layered settings: defaults, then the TOML config file, then `QUIRE_*`
//! environment variables, then command-line flags.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use quire_core::query::{DEFAULT_LIST_LIMIT, DEFAULT_SEARCH_LIMIT};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "~/.config/quire/config.toml";
pub const DEFAULT_DB_PATH: &str = "~/.quire/data.db";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  /// SQLite database file. A leading `~` is expanded.
  pub db_path:      PathBuf,
  /// Default page size for `item-search`.
  pub search_limit: usize,
  /// Default page size for `item-list`.
  pub list_limit:   usize,
}

impl Settings {
  /// Load settings. An explicitly named config file must exist; the default
  /// one is optional.
  pub fn load(config_file: Option<&Path>, db_override: Option<&Path>) -> anyhow::Result<Self> {
    let file = config_file
      .map(Path::to_path_buf)
      .unwrap_or_else(|| expand_tilde(Path::new(DEFAULT_CONFIG_FILE)));

    let mut builder = config::Config::builder()
      .set_default("db_path", DEFAULT_DB_PATH)?
      .set_default("search_limit", DEFAULT_SEARCH_LIMIT as i64)?
      .set_default("list_limit", DEFAULT_LIST_LIMIT as i64)?
      .add_source(config::File::from(file).required(config_file.is_some()))
      .add_source(config::Environment::with_prefix("QUIRE").try_parsing(true));

    if let Some(db) = db_override {
      builder = builder.set_override("db_path", db.to_string_lossy().into_owned())?;
    }

    let mut settings: Settings = builder
      .build()
      .context("failed to read configuration")?
      .try_deserialize()
      .context("failed to deserialise settings")?;
    settings.db_path = expand_tilde(&settings.db_path);
    Ok(settings)
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/") {
    if let Ok(home) = std::env::var("HOME") {
      return PathBuf::from(home).join(rest);
    }
  }
  path.to_path_buf()
}
