//! Forward-only schema migration.
//!
//! Migration is an ordered list of named steps. Each step decides from the
//! live schema (`sqlite_master` and `pragma_table_info`) whether it still has
//! work to do, and applies its transform inside its own transaction. Running
//! the list against an up-to-date store applies nothing.

use quire_core::{item::ItemId, payload};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::{info, warn};

use crate::{
  Error, Result,
  schema::{
    BASE_INDEXES, BASE_TABLES, FTS_DDL, FTS_TABLE, INDEXES_DDL, ITEMS_DDL,
    RELATIONS_DDL, TYPES_DDL,
  },
  store::load_registry,
};

struct Migration {
  name:     &'static str,
  pending:  fn(&Connection) -> Result<bool>,
  apply:    fn(&Transaction<'_>) -> Result<()>,
  /// A failing optional step is logged and skipped instead of aborting.
  optional: bool,
}

const MIGRATIONS: &[Migration] = &[
  Migration {
    name:     "legacy_tag_schemas_to_types",
    pending:  |c| table_exists(c, "tag_schemas"),
    apply:    tag_schemas_to_types,
    optional: false,
  },
  Migration {
    name:     "legacy_collection_items_to_items",
    pending:  |c| table_exists(c, "collection_items"),
    apply:    collection_items_to_items,
    optional: false,
  },
  Migration {
    name:     "types_hierarchy_columns",
    pending:  |c| {
      Ok(
        table_exists(c, "types")?
          && !(column_exists(c, "types", "parent_type")?
            && column_exists(c, "types", "abstract")?),
      )
    },
    apply:    types_hierarchy_columns,
    optional: false,
  },
  Migration {
    name:     "inline_refs_to_relations",
    pending:  |c| {
      Ok(
        !table_exists(c, "item_relations")?
          && table_exists(c, "items")?
          && table_exists(c, "types")?,
      )
    },
    apply:    inline_refs_to_relations,
    optional: false,
  },
  Migration {
    name:     "legacy_timestamps",
    pending:  legacy_timestamps_pending,
    apply:    legacy_timestamps,
    optional: false,
  },
  Migration {
    name:     "base_tables",
    pending:  base_tables_missing,
    apply:    |tx| {
      tx.execute_batch(TYPES_DDL)?;
      tx.execute_batch(ITEMS_DDL)?;
      tx.execute_batch(RELATIONS_DDL)?;
      tx.execute_batch(INDEXES_DDL)?;
      Ok(())
    },
    optional: false,
  },
  Migration {
    name:     "search_index",
    pending:  |c| Ok(!table_exists(c, FTS_TABLE)?),
    apply:    |tx| Ok(tx.execute_batch(FTS_DDL)?),
    optional: true,
  },
];

/// Bring the schema up to date. Returns the names of the steps applied.
pub fn run(conn: &mut Connection) -> Result<Vec<&'static str>> {
  let mut applied = Vec::new();

  for step in MIGRATIONS {
    if !(step.pending)(conn)? {
      continue;
    }

    let outcome = conn.transaction().map_err(Error::from).and_then(|tx| {
      (step.apply)(&tx)?;
      tx.commit()?;
      Ok(())
    });

    match outcome {
      Ok(()) => {
        info!(step = step.name, "applied schema migration");
        applied.push(step.name);
      }
      Err(e) if step.optional => {
        warn!(step = step.name, error = %e, "optional migration failed; continuing without it");
      }
      Err(e) => {
        return Err(Error::Migration { step: step.name, source: Box::new(e) });
      }
    }
  }

  Ok(applied)
}

// ─── Introspection ───────────────────────────────────────────────────────────

pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
  Ok(conn.query_row(
    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
    [name],
    |row| row.get(0),
  )?)
}

fn index_exists(conn: &Connection, name: &str) -> Result<bool> {
  Ok(conn.query_row(
    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1)",
    [name],
    |row| row.get(0),
  )?)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
  Ok(conn.query_row(
    "SELECT EXISTS(SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2)",
    [table, column],
    |row| row.get(0),
  )?)
}

fn base_tables_missing(conn: &Connection) -> Result<bool> {
  for table in BASE_TABLES {
    if !table_exists(conn, table)? {
      return Ok(true);
    }
  }
  for index in BASE_INDEXES {
    if !index_exists(conn, index)? {
      return Ok(true);
    }
  }
  Ok(false)
}

// ─── Legacy layout ───────────────────────────────────────────────────────────

/// SQL converting a legacy local-time `YYYY-MM-DD HH:MM:SS` column to the
/// current timestamp format, falling back to now for unreadable values.
fn legacy_timestamp(column: &str) -> String {
  format!(
    "COALESCE(strftime('%Y-%m-%dT%H:%M:%S.000000Z', {column}, 'utc'), \
     strftime('%Y-%m-%dT%H:%M:%S.000000Z', 'now'))"
  )
}

fn tag_schemas_to_types(tx: &Transaction<'_>) -> Result<()> {
  tx.execute_batch(TYPES_DDL)?;
  let copied = tx.execute(
    &format!(
      "INSERT OR IGNORE INTO types
         (name, display_name, description, fields_schema, created_at, updated_at)
       SELECT tag, COALESCE(display_name, ''), COALESCE(description, ''),
              COALESCE(fields_schema, '[]'), {}, {}
       FROM tag_schemas",
      legacy_timestamp("created_at"),
      legacy_timestamp("updated_at"),
    ),
    [],
  )?;
  tx.execute_batch("DROP TABLE tag_schemas;")?;
  info!(copied, "converted tag schemas into types");
  Ok(())
}

fn collection_items_to_items(tx: &Transaction<'_>) -> Result<()> {
  tx.execute_batch(TYPES_DDL)?;
  tx.execute_batch(ITEMS_DDL)?;
  // Child rows may precede their parent.
  tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;

  let has_collections = table_exists(tx, "collections")?;
  if has_collections {
    tx.execute(
      &format!(
        "INSERT OR IGNORE INTO types
           (name, display_name, description, fields_schema, created_at, updated_at)
         SELECT name, COALESCE(display_name, name), COALESCE(description, ''),
                COALESCE(fields_schema, '[]'), {}, {}
         FROM collections",
        legacy_timestamp("created_at"),
        legacy_timestamp("updated_at"),
      ),
      [],
    )?;
  }

  let first_typed_tag = if table_exists(tx, "collection_item_tags")? {
    "(SELECT t.tag FROM collection_item_tags t
       JOIN types ty ON ty.name = t.tag
      WHERE t.item_id = ci.id
      ORDER BY t.rowid LIMIT 1)"
  } else {
    "NULL"
  };
  let collection_name = if has_collections {
    "(SELECT c.name FROM collections c WHERE c.id = ci.collection_id)"
  } else {
    "NULL"
  };

  let copied = tx.execute(
    &format!(
      "INSERT INTO items
         (id, type, title, content, data, parent_id, status, created_at, updated_at)
       SELECT ci.id, COALESCE({first_typed_tag}, {collection_name}),
              ci.title, COALESCE(ci.content, ''), COALESCE(ci.data, '{{}}'),
              ci.parent_id, COALESCE(ci.status, 'active'), {}, {}
       FROM collection_items ci
       ORDER BY ci.id",
      legacy_timestamp("ci.created_at"),
      legacy_timestamp("ci.updated_at"),
    ),
    [],
  )?;

  tx.execute_batch(
    "DROP TRIGGER IF EXISTS collection_items_fts_ai;
     DROP TRIGGER IF EXISTS collection_items_fts_ad;
     DROP TRIGGER IF EXISTS collection_items_fts_au;
     DROP TABLE IF EXISTS collection_items_fts;
     DROP TABLE IF EXISTS collection_item_tags;
     DROP TABLE collection_items;
     DROP TABLE IF EXISTS collections;",
  )?;
  info!(copied, "converted collection items into items; free-text tags were dropped");
  Ok(())
}

/// Tables whose `created_at`/`updated_at` may still hold legacy values.
const TIMESTAMPED: &[&str] = &["types", "items"];

/// Matches the legacy `YYYY-MM-DD HH:MM:SS` form.
fn is_legacy_timestamp(column: &str) -> String {
  format!("{column} GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9] *'")
}

fn legacy_timestamps_pending(conn: &Connection) -> Result<bool> {
  for table in TIMESTAMPED {
    if !table_exists(conn, table)? {
      continue;
    }
    for column in ["created_at", "updated_at"] {
      if !column_exists(conn, table, column)? {
        continue;
      }
      let found: bool = conn.query_row(
        &format!(
          "SELECT EXISTS(SELECT 1 FROM {table} WHERE {})",
          is_legacy_timestamp(column)
        ),
        [],
        |row| row.get(0),
      )?;
      if found {
        return Ok(true);
      }
    }
  }
  Ok(false)
}

fn legacy_timestamps(tx: &Transaction<'_>) -> Result<()> {
  for table in TIMESTAMPED {
    if !table_exists(tx, table)? {
      continue;
    }
    for column in ["created_at", "updated_at"] {
      if !column_exists(tx, table, column)? {
        continue;
      }
      let rewritten = tx.execute(
        &format!(
          "UPDATE {table} SET {column} = {} WHERE {}",
          legacy_timestamp(column),
          is_legacy_timestamp(column),
        ),
        [],
      )?;
      info!(table, column, rewritten, "converted legacy timestamps to UTC");
    }
  }
  Ok(())
}

fn types_hierarchy_columns(tx: &Transaction<'_>) -> Result<()> {
  if !column_exists(tx, "types", "parent_type")? {
    tx.execute_batch("ALTER TABLE types ADD COLUMN parent_type TEXT;")?;
  }
  if !column_exists(tx, "types", "abstract")? {
    tx.execute_batch(
      "ALTER TABLE types ADD COLUMN abstract INTEGER NOT NULL DEFAULT 0;",
    )?;
  }
  Ok(())
}

// ─── Inline references ───────────────────────────────────────────────────────

/// Move ref values stored inside `items.data` into `item_relations`.
fn inline_refs_to_relations(tx: &Transaction<'_>) -> Result<()> {
  tx.execute_batch(RELATIONS_DDL)?;
  let registry = load_registry(tx)?;

  let rows: Vec<(i64, String, String)> = {
    let mut stmt =
      tx.prepare("SELECT id, type, data FROM items WHERE type IS NOT NULL ORDER BY id")?;
    stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
      .collect::<rusqlite::Result<_>>()?
  };

  let mut moved = 0usize;
  for (id, item_type, raw) in rows {
    let ref_fields = registry.ref_fields(&item_type);
    if ref_fields.is_empty() {
      continue;
    }
    let Ok(serde_json::Value::Object(mut data)) = serde_json::from_str(&raw) else {
      continue;
    };

    let mut changed = false;
    for field in &ref_fields {
      let Some(value) = data.remove(&field.name) else {
        continue;
      };
      changed = true;

      let values = match value {
        serde_json::Value::Array(values) => values,
        serde_json::Value::Null => Vec::new(),
        other => vec![other],
      };
      for value in values {
        let target = match payload::coerce_id(&field.name, &value) {
          Ok(target) => target,
          Err(e) => {
            warn!(item_id = id, field = %field.name, error = %e, "dropping invalid inline reference");
            continue;
          }
        };
        if !item_exists(tx, target)? {
          warn!(item_id = id, field = %field.name, target = %target, "dropping reference to missing item");
          continue;
        }
        tx.execute(
          "INSERT OR IGNORE INTO item_relations (item_id, related_item_id, field_name)
           VALUES (?1, ?2, ?3)",
          params![id, target.0, field.name],
        )?;
        moved += 1;
      }
    }

    if changed {
      tx.execute(
        "UPDATE items SET data = ?1 WHERE id = ?2",
        params![serde_json::to_string(&data)?, id],
      )?;
    }
  }

  info!(moved, "moved inline references into item_relations");
  Ok(())
}

fn item_exists(conn: &Connection, id: ItemId) -> Result<bool> {
  Ok(
    conn
      .query_row("SELECT 1 FROM items WHERE id = ?1", [id.0], |_| Ok(()))
      .optional()?
      .is_some(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn legacy_db(path: &std::path::Path) {
    let conn = Connection::open(path).unwrap();
    conn
      .execute_batch(
        "CREATE TABLE collections (
           id INTEGER PRIMARY KEY AUTOINCREMENT,
           name TEXT UNIQUE NOT NULL,
           display_name TEXT NOT NULL,
           description TEXT NOT NULL DEFAULT '',
           fields_schema TEXT NOT NULL DEFAULT '[]',
           created_at TEXT DEFAULT (datetime('now', 'localtime')),
           updated_at TEXT DEFAULT (datetime('now', 'localtime'))
         );
         CREATE TABLE collection_items (
           id INTEGER PRIMARY KEY AUTOINCREMENT,
           collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
           title TEXT NOT NULL,
           content TEXT NOT NULL DEFAULT '',
           data TEXT NOT NULL DEFAULT '{}',
           parent_id INTEGER REFERENCES collection_items(id) ON DELETE SET NULL,
           status TEXT DEFAULT 'active',
           created_at TEXT DEFAULT (datetime('now', 'localtime')),
           updated_at TEXT DEFAULT (datetime('now', 'localtime'))
         );
         CREATE TABLE collection_item_tags (
           item_id INTEGER NOT NULL REFERENCES collection_items(id) ON DELETE CASCADE,
           tag TEXT NOT NULL,
           PRIMARY KEY (item_id, tag)
         );
         CREATE TABLE tag_schemas (
           tag TEXT PRIMARY KEY,
           display_name TEXT NOT NULL DEFAULT '',
           description TEXT NOT NULL DEFAULT '',
           fields_schema TEXT NOT NULL DEFAULT '[]',
           created_at TEXT DEFAULT (datetime('now', 'localtime')),
           updated_at TEXT DEFAULT (datetime('now', 'localtime'))
         );

         INSERT INTO collections (id, name, display_name) VALUES (1, 'notes', 'Notes');
         INSERT INTO tag_schemas (tag, display_name, fields_schema)
           VALUES ('recipe', 'Recipe', '[{\"name\":\"servings\",\"type\":\"number\"}]');

         INSERT INTO collection_items (id, collection_id, title, data, created_at)
           VALUES (3, 1, 'Pancakes', '{\"servings\": 4}', '2023-11-05 14:30:00');
         INSERT INTO collection_items (id, collection_id, title, parent_id, status)
           VALUES (4, 1, 'Shopping', NULL, NULL);
         INSERT INTO collection_items (id, collection_id, title, parent_id)
           VALUES (5, 1, 'Eggs', 4);
         INSERT INTO collection_item_tags (item_id, tag) VALUES (3, 'breakfast');
         INSERT INTO collection_item_tags (item_id, tag) VALUES (3, 'recipe');",
      )
      .unwrap();
  }

  /// `types` and `items` as they were before relations moved out of `data`.
  const PREVIOUS_GENERATION: &str = "
    CREATE TABLE types (
      name TEXT PRIMARY KEY,
      display_name TEXT NOT NULL DEFAULT '',
      description TEXT NOT NULL DEFAULT '',
      fields_schema TEXT NOT NULL DEFAULT '[]',
      created_at TEXT DEFAULT (datetime('now', 'localtime')),
      updated_at TEXT DEFAULT (datetime('now', 'localtime'))
    );
    CREATE TABLE items (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      type TEXT,
      title TEXT NOT NULL,
      content TEXT NOT NULL DEFAULT '',
      data TEXT NOT NULL DEFAULT '{}',
      parent_id INTEGER,
      status TEXT NOT NULL DEFAULT 'active',
      created_at TEXT DEFAULT (datetime('now', 'localtime')),
      updated_at TEXT DEFAULT (datetime('now', 'localtime'))
    );";

  fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
  }

  #[test]
  fn fresh_database_gets_base_schema() {
    let mut conn = Connection::open_in_memory().unwrap();
    let applied = run(&mut conn).unwrap();
    assert!(applied.contains(&"base_tables"));
    for table in BASE_TABLES {
      assert!(table_exists(&conn, table).unwrap());
    }
  }

  #[test]
  fn second_run_applies_nothing() {
    let mut conn = Connection::open_in_memory().unwrap();
    run(&mut conn).unwrap();
    assert!(run(&mut conn).unwrap().is_empty());
  }

  #[test]
  fn legacy_collections_are_converted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");
    legacy_db(&path);

    let mut conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    let applied = run(&mut conn).unwrap();
    assert_eq!(&applied[..2], [
      "legacy_tag_schemas_to_types",
      "legacy_collection_items_to_items"
    ]);

    for gone in ["collections", "collection_items", "collection_item_tags", "tag_schemas"] {
      assert!(!table_exists(&conn, gone).unwrap(), "{gone} still present");
    }
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM types WHERE name IN ('notes', 'recipe')"), 2);

    let (item_type, created_at): (String, String) = conn
      .query_row("SELECT type, created_at FROM items WHERE id = 3", [], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })
      .unwrap();
    assert_eq!(item_type, "recipe");
    assert!(created_at.ends_with(".000000Z"));

    let (item_type, status): (String, String) = conn
      .query_row("SELECT type, status FROM items WHERE id = 4", [], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })
      .unwrap();
    assert_eq!(item_type, "notes");
    assert_eq!(status, "active");
    assert_eq!(count(&conn, "SELECT parent_id FROM items WHERE id = 5"), 4);

    assert!(run(&mut conn).unwrap().is_empty());
  }

  #[test]
  fn inline_references_become_edges() {
    let mut conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(PREVIOUS_GENERATION).unwrap();
    conn
      .execute_batch(
        "INSERT INTO types (name, fields_schema, created_at, updated_at)
           VALUES ('person', '[]', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');
         INSERT INTO types (name, fields_schema, created_at, updated_at)
           VALUES ('task',
             '[{\"name\":\"assignee\",\"type\":\"ref\",\"ref_type\":\"person\"},
               {\"name\":\"watchers\",\"type\":\"ref\",\"ref_type\":\"person\",\"multiple\":true}]',
             '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');
         INSERT INTO items (id, type, title, created_at, updated_at)
           VALUES (1, 'person', 'Ada', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');
         INSERT INTO items (id, type, title, created_at, updated_at)
           VALUES (2, 'person', 'Grace', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');
         INSERT INTO items (id, type, title, data, created_at, updated_at)
           VALUES (3, 'task', 'Review',
             '{\"assignee\": \"1\", \"watchers\": [2, 99, \"x\"], \"due\": \"2024-05-01\"}',
             '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');",
      )
      .unwrap();

    let applied = run(&mut conn).unwrap();
    assert!(applied.contains(&"types_hierarchy_columns"));
    assert!(applied.contains(&"inline_refs_to_relations"));

    let data: String = conn
      .query_row("SELECT data FROM items WHERE id = 3", [], |row| row.get(0))
      .unwrap();
    assert_eq!(data, r#"{"due":"2024-05-01"}"#);

    let mut stmt = conn
      .prepare(
        "SELECT field_name, related_item_id FROM item_relations
         WHERE item_id = 3 ORDER BY field_name, related_item_id",
      )
      .unwrap();
    let edges: Vec<(String, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .unwrap()
      .collect::<rusqlite::Result<_>>()
      .unwrap();
    assert_eq!(edges, [("assignee".to_owned(), 1), ("watchers".to_owned(), 2)]);
  }

  fn previous_generation_with_legacy_timestamps(path: &std::path::Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(PREVIOUS_GENERATION).unwrap();
    conn
      .execute_batch(
        "INSERT INTO types (name, created_at, updated_at)
           VALUES ('note', '2024-04-30 09:15:00', '2024-04-30 09:15:00');
         INSERT INTO items (id, type, title, created_at, updated_at)
           VALUES (1, 'note', 'May Day', '2024-05-01 12:00:00', '2024-05-02 12:00:00');
         INSERT INTO items (id, type, title, created_at, updated_at)
           VALUES (2, 'note', 'Already current',
             '2024-06-01T08:00:00.000000Z', '2024-06-01T08:00:00.000000Z');",
      )
      .unwrap();
  }

  #[test]
  fn legacy_timestamps_are_rewritten_in_utc_form() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("previous.db");
    previous_generation_with_legacy_timestamps(&path);

    let mut conn = Connection::open(&path).unwrap();
    let applied = run(&mut conn).unwrap();
    assert!(applied.contains(&"legacy_timestamps"));

    let current = "GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T*.[0-9][0-9][0-9][0-9][0-9][0-9]Z'";
    for table in ["types", "items"] {
      let total = count(&conn, &format!("SELECT COUNT(*) FROM {table}"));
      let converted = count(
        &conn,
        &format!("SELECT COUNT(*) FROM {table} WHERE created_at {current} AND updated_at {current}"),
      );
      assert_eq!(converted, total, "{table} still has legacy timestamps");
    }

    let untouched: String = conn
      .query_row("SELECT created_at FROM items WHERE id = 2", [], |row| row.get(0))
      .unwrap();
    assert_eq!(untouched, "2024-06-01T08:00:00.000000Z");

    assert!(run(&mut conn).unwrap().is_empty());
  }

  #[test]
  fn migrated_timestamps_match_date_filters() {
    use chrono::NaiveDate;
    use quire_core::{
      query::{DateBound, ItemFilter},
      store::KnowledgeStore,
    };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("previous.db");
    previous_generation_with_legacy_timestamps(&path);

    let store = crate::SqliteStore::open(&path).unwrap();
    let may_day = Some(DateBound::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()));
    let filter = ItemFilter {
      created_from: may_day,
      created_to: may_day,
      ..ItemFilter::default()
    };
    let found = store.list_items(&filter).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "May Day");
  }
}
