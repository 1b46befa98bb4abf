//! Subcommands and their dispatch onto a [`KnowledgeStore`].
//!
//! Every command produces exactly one JSON value. Arguments that carry JSON
//! are parsed with [`quire_core::input`] so that malformed input is reported
//! before the store is touched.

use clap::Subcommand;
use quire_core::{
  Error as CoreError,
  input::{parse, parse_or_default},
  item::{ItemId, ItemPatch, NewItem},
  query::ItemFilter,
  schema::TypeDefinition,
  store::KnowledgeStore,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::Settings;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Define a type, or replace the definition of an existing one.
  TypeSet {
    /// `{"name", "parent_type"?, "abstract"?, "fields_schema"?, ...}`
    json: String,
  },
  /// Show a type with its resolved fields, children and parent.
  TypeGet { name: String },
  /// List every type.
  TypeList,
  /// Show all types as a tree.
  TypeTree,
  /// Delete a type. Its items and child types are detached, not deleted.
  TypeDelete { name: String },

  /// Add an item: `{"title", "type"?, "content"?, "data"?, "parent_id"?, "status"?}`.
  ItemAdd { json: String },
  /// Add a JSON array of items in one transaction.
  ItemAddBatch { json: String },
  /// Show an item with its relation fields and children.
  ItemGet { id: String },
  /// Partially update an item; `data` is merged into the stored object.
  ItemUpdate { id: String, json: String },
  /// Delete an item.
  ItemDelete { id: String },
  /// List items matching an optional JSON filter.
  ItemList { filter: Option<String> },
  /// Search items by keyword, optionally restricted to a type or filter.
  ItemSearch {
    keyword:   String,
    /// Shorthand for `--filter '{"type": "<type>"}'`.
    #[arg(value_name = "TYPE", conflicts_with = "filter")]
    item_type: Option<String>,
    #[arg(long)]
    filter:    Option<String>,
  },
}

fn ok<T: Serialize>(value: T) -> Result<Value, CoreError> { Ok(serde_json::to_value(value)?) }

fn with_default_limit(mut filter: ItemFilter, limit: usize) -> ItemFilter {
  filter.limit = filter.limit.or(Some(limit));
  filter
}

/// Run a store command against any backend.
pub fn run<S>(store: &mut S, command: Command, settings: &Settings) -> Result<Value, S::Error>
where
  S: KnowledgeStore,
  S::Error: From<CoreError>,
{
  let out = match command {
    // ── Types ──────────────────────────────────────────────────────────
    Command::TypeSet { json } => {
      let def = store.define_type(parse::<TypeDefinition>(&json)?)?;
      json!({ "status": "ok", "name": def.name })
    }
    Command::TypeGet { name } => match store.get_type(&name)? {
      Some(detail) => ok(detail)?,
      None => return Err(CoreError::TypeNotFound(name).into()),
    },
    Command::TypeList => ok(store.list_types()?)?,
    Command::TypeTree => ok(store.type_tree()?)?,
    Command::TypeDelete { name } => {
      store.delete_type(&name)?;
      json!({ "status": "ok", "name": name })
    }

    // ── Items ──────────────────────────────────────────────────────────
    Command::ItemAdd { json } => {
      let id = store.add_item(parse::<NewItem>(&json)?)?;
      json!({ "status": "ok", "id": id })
    }
    Command::ItemAddBatch { json } => {
      let ids = store.add_items(parse::<Vec<NewItem>>(&json)?)?;
      json!({ "status": "ok", "count": ids.len(), "ids": ids })
    }
    Command::ItemGet { id } => {
      let id = parse::<ItemId>(&id)?;
      match store.get_item(id)? {
        Some(detail) => ok(detail)?,
        None => return Err(CoreError::ItemNotFound(id).into()),
      }
    }
    Command::ItemUpdate { id, json } => {
      let id = parse::<ItemId>(&id)?;
      store.update_item(id, parse::<ItemPatch>(&json)?)?;
      json!({ "status": "ok", "id": id })
    }
    Command::ItemDelete { id } => {
      let id = parse::<ItemId>(&id)?;
      store.delete_item(id)?;
      json!({ "status": "ok", "id": id })
    }
    Command::ItemList { filter } => {
      let filter = parse_or_default::<ItemFilter>(filter.as_deref())?;
      ok(store.list_items(&with_default_limit(filter, settings.list_limit))?)?
    }
    Command::ItemSearch { keyword, item_type, filter } => {
      let filter = match item_type {
        Some(t) => ItemFilter::of_type(t),
        None => parse_or_default::<ItemFilter>(filter.as_deref())?,
      };
      let filter = with_default_limit(filter, settings.search_limit);
      ok(store.search_items(&keyword, &filter)?)?
    }
  };
  Ok(out)
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use quire_store_sqlite::SqliteStore;

  use super::*;

  fn settings() -> Settings {
    Settings { db_path: PathBuf::from(":memory:"), search_limit: 50, list_limit: 2 }
  }

  fn exec(store: &mut SqliteStore, command: Command) -> Value {
    run(store, command, &settings()).unwrap()
  }

  #[test]
  fn add_then_get_round_trips_through_json() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    exec(&mut store, Command::TypeSet { json: r#"{"name": "note"}"#.into() });
    let added = exec(&mut store, Command::ItemAdd {
      json: r#"{"title": "Hello", "type": "note", "data": {"mood": "good"}}"#.into(),
    });
    assert_eq!(added["status"], "ok");

    let got = exec(&mut store, Command::ItemGet { id: added["id"].to_string() });
    assert_eq!(got["title"], "Hello");
    assert_eq!(got["type"], "note");
    assert_eq!(got["data"]["mood"], "good");
    assert_eq!(got["children"], json!([]));
  }

  #[test]
  fn list_applies_configured_default_limit() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    exec(&mut store, Command::ItemAddBatch {
      json: r#"[{"title": "a"}, {"title": "b"}, {"title": "c"}]"#.into(),
    });
    let listed = exec(&mut store, Command::ItemList { filter: None });
    assert_eq!(listed.as_array().unwrap().len(), 2);
  }

  #[test]
  fn malformed_json_and_missing_items_are_errors() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let err = run(&mut store, Command::ItemAdd { json: "{oops".into() }, &settings())
      .unwrap_err();
    assert_eq!(err.kind(), quire_core::ErrorKind::MalformedInput);

    let err = run(&mut store, Command::ItemGet { id: "41".into() }, &settings()).unwrap_err();
    assert_eq!(err.kind(), quire_core::ErrorKind::NotFound);

    let err = run(&mut store, Command::TypeGet { name: "ghost".into() }, &settings())
      .unwrap_err();
    assert_eq!(err.to_string(), "type not found: ghost");
  }
}
