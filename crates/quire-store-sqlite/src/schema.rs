//! SQL schema for the Quire SQLite store.
//!
//! Each table group is its own constant so that migration steps can create
//! exactly the structures they need. Every statement is idempotent.

/// Per-connection settings, applied on every open.
pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
";

pub const TYPES_DDL: &str = "
CREATE TABLE IF NOT EXISTS types (
    name          TEXT PRIMARY KEY,
    display_name  TEXT NOT NULL DEFAULT '',
    description   TEXT NOT NULL DEFAULT '',
    parent_type   TEXT,                       -- NULL for root types
    abstract      INTEGER NOT NULL DEFAULT 0,
    fields_schema TEXT NOT NULL DEFAULT '[]', -- JSON array of field declarations
    created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%f000Z', 'now')),
    updated_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%f000Z', 'now'))
);
";

pub const ITEMS_DDL: &str = "
CREATE TABLE IF NOT EXISTS items (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    type       TEXT,                          -- NULL for untyped items
    title      TEXT NOT NULL,
    content    TEXT NOT NULL DEFAULT '',
    data       TEXT NOT NULL DEFAULT '{}',    -- JSON object, ref fields excluded
    parent_id  INTEGER REFERENCES items(id) ON DELETE SET NULL,
    status     TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%f000Z', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%f000Z', 'now'))
);
";

/// One row per ref-field value. Multiplicity lives on the field declaration.
pub const RELATIONS_DDL: &str = "
CREATE TABLE IF NOT EXISTS item_relations (
    item_id         INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    related_item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    field_name      TEXT NOT NULL,
    PRIMARY KEY (item_id, field_name, related_item_id)
);
";

pub const INDEXES_DDL: &str = "
CREATE INDEX IF NOT EXISTS idx_types_parent_type       ON types(parent_type);
CREATE INDEX IF NOT EXISTS idx_items_type              ON items(type);
CREATE INDEX IF NOT EXISTS idx_items_parent_id         ON items(parent_id);
CREATE INDEX IF NOT EXISTS idx_items_status            ON items(status);
CREATE INDEX IF NOT EXISTS idx_items_created_at        ON items(created_at);
CREATE INDEX IF NOT EXISTS idx_item_relations_related  ON item_relations(related_item_id);
";

/// Tables and indexes that must exist once migration has finished.
pub const BASE_TABLES: &[&str] = &["types", "items", "item_relations"];
pub const BASE_INDEXES: &[&str] = &[
  "idx_types_parent_type",
  "idx_items_type",
  "idx_items_parent_id",
  "idx_items_status",
  "idx_items_created_at",
  "idx_item_relations_related",
];

/// Trigram full-text index over `items`, kept in sync by triggers so every
/// row write updates the index in the same transaction.
pub const FTS_DDL: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS items_fts USING fts5(
    title, content, data,
    content=items, content_rowid=id,
    tokenize='trigram'
);

CREATE TRIGGER IF NOT EXISTS items_fts_ai AFTER INSERT ON items BEGIN
    INSERT INTO items_fts(rowid, title, content, data)
    VALUES (new.id, new.title, new.content, new.data);
END;

CREATE TRIGGER IF NOT EXISTS items_fts_ad AFTER DELETE ON items BEGIN
    INSERT INTO items_fts(items_fts, rowid, title, content, data)
    VALUES ('delete', old.id, old.title, old.content, old.data);
END;

CREATE TRIGGER IF NOT EXISTS items_fts_au AFTER UPDATE ON items BEGIN
    INSERT INTO items_fts(items_fts, rowid, title, content, data)
    VALUES ('delete', old.id, old.title, old.content, old.data);
    INSERT INTO items_fts(rowid, title, content, data)
    VALUES (new.id, new.title, new.content, new.data);
END;

INSERT INTO items_fts(items_fts) VALUES ('rebuild');
";

pub const FTS_TABLE: &str = "items_fts";
