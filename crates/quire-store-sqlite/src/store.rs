//! [`SqliteStore`] — the SQLite implementation of [`KnowledgeStore`].

use std::{collections::HashMap, path::Path};

use chrono::Utc;
use rusqlite::{
  Connection, OptionalExtension as _, params, params_from_iter,
  types::Value as SqlValue,
};
use tracing::debug;

use quire_core::{
  Error as CoreError,
  item::{Item, ItemDetail, ItemId, ItemPatch, NewItem},
  payload::{self, RelationRef},
  query::{DEFAULT_LIST_LIMIT, DEFAULT_SEARCH_LIMIT, ItemFilter},
  registry::TypeRegistry,
  schema::{FieldDecl, TypeDef, TypeDefinition, TypeDetail, TypeNode, TypeSummary},
  store::KnowledgeStore,
};

use crate::{
  Result,
  encode::{ITEM_COLUMNS, RawItem, RawType, TYPE_COLUMNS, encode_data, encode_dt, encode_fields},
  migrate,
  schema::PRAGMAS,
  search::{SearchStrategy, compile_filter, direct_matches, order_clause},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Quire knowledge base backed by a single SQLite file.
pub struct SqliteStore {
  pub(crate) conn:     Connection,
  pub(crate) strategy: SearchStrategy,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and bring its schema up to date.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::init(Connection::open(path)?)
  }

  /// Open an in-memory store — useful for testing.
  pub fn open_in_memory() -> Result<Self> { Self::init(Connection::open_in_memory()?) }

  fn init(conn: Connection) -> Result<Self> {
    conn.execute_batch(PRAGMAS)?;
    let mut store = Self { conn, strategy: SearchStrategy::ScanFallback };
    store.ensure_schema()?;
    Ok(store)
  }

  /// Run every pending migration step and re-detect the search strategy.
  /// Returns the names of the steps applied; empty on an up-to-date store.
  pub fn ensure_schema(&mut self) -> Result<Vec<&'static str>> {
    let applied = migrate::run(&mut self.conn)?;
    self.strategy = SearchStrategy::detect(&self.conn)?;
    debug!(?applied, strategy = ?self.strategy, "schema ready");
    Ok(applied)
  }

  pub fn search_strategy(&self) -> SearchStrategy { self.strategy }

  fn search_with(
    &self,
    strategy: SearchStrategy,
    keyword: &str,
    filter: &ItemFilter,
    registry: &TypeRegistry,
  ) -> Result<Vec<Item>> {
    let matched = direct_matches(&self.conn, strategy, keyword)?;
    if matched.is_empty() {
      return Ok(Vec::new());
    }
    let matched_json = SqlValue::Text(serde_json::to_string(&matched)?);
    let compiled = compile_filter(filter, registry)?;

    let direct_sql = format!(
      "SELECT {ITEM_COLUMNS} FROM items i
       WHERE i.id IN (SELECT value FROM json_each(?)){}
       ORDER BY {}",
      compiled.and_clause(),
      order_clause(filter),
    );
    let params = std::iter::once(matched_json.clone()).chain(compiled.params.iter().cloned());
    let mut direct = query_items(&self.conn, &direct_sql, params_from_iter(params))?;

    // Relevance order unless the caller asked for a specific sort.
    if strategy == SearchStrategy::Indexed && filter.sort.is_none() {
      let position: HashMap<i64, usize> =
        matched.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
      direct.sort_by_key(|item| position.get(&item.id.0).copied().unwrap_or(usize::MAX));
    }

    let related_sql = format!(
      "SELECT {ITEM_COLUMNS} FROM items i
       WHERE i.id IN (
               SELECT r.item_id FROM item_relations r
               WHERE r.related_item_id IN (SELECT value FROM json_each(?)))
         AND i.id NOT IN (SELECT value FROM json_each(?)){}
       ORDER BY {}",
      compiled.and_clause(),
      order_clause(filter),
    );
    let params = [matched_json.clone(), matched_json]
      .into_iter()
      .chain(compiled.params.iter().cloned());
    let related = query_items(&self.conn, &related_sql, params_from_iter(params))?;

    debug!(
      ?strategy,
      direct = direct.len(),
      related = related.len(),
      "keyword search"
    );

    let mut merged = direct;
    merged.extend(related);
    let mut page = filter.paginate(merged, DEFAULT_SEARCH_LIMIT);
    reassemble(&self.conn, registry, &mut page)?;
    Ok(page)
  }
}

// ─── Shared helpers ──────────────────────────────────────────────────────────
//
// Free functions over `&Connection` so that they work equally on the store's
// connection and inside a `Transaction`.

pub(crate) fn load_registry(conn: &Connection) -> Result<TypeRegistry> {
  let mut stmt = conn.prepare(&format!("SELECT {TYPE_COLUMNS} FROM types ORDER BY name"))?;
  let raws = stmt
    .query_map([], RawType::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  let types = raws
    .into_iter()
    .map(RawType::into_type)
    .collect::<Result<Vec<_>>>()?;
  Ok(TypeRegistry::new(types))
}

fn read_type(conn: &Connection, name: &str) -> Result<Option<TypeDef>> {
  conn
    .query_row(
      &format!("SELECT {TYPE_COLUMNS} FROM types WHERE name = ?1"),
      [name],
      RawType::from_row,
    )
    .optional()?
    .map(RawType::into_type)
    .transpose()
}

fn query_items(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Item>> {
  let mut stmt = conn.prepare(sql)?;
  let raws = stmt
    .query_map(params, RawItem::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawItem::into_item).collect()
}

/// The stored row only; relation fields are not reassembled.
fn fetch_item(conn: &Connection, id: ItemId) -> Result<Option<Item>> {
  conn
    .query_row(
      &format!("SELECT {ITEM_COLUMNS} FROM items i WHERE i.id = ?1"),
      [id.0],
      RawItem::from_row,
    )
    .optional()?
    .map(RawItem::into_item)
    .transpose()
}

fn item_exists(conn: &Connection, id: ItemId) -> Result<bool> {
  Ok(
    conn
      .query_row("SELECT 1 FROM items WHERE id = ?1", [id.0], |_| Ok(()))
      .optional()?
      .is_some(),
  )
}

/// Whether `candidate` sits anywhere below `root` in the item hierarchy.
fn is_descendant(conn: &Connection, root: ItemId, candidate: ItemId) -> Result<bool> {
  Ok(conn.query_row(
    "WITH RECURSIVE below(id) AS (
       SELECT id FROM items WHERE parent_id = ?1
       UNION
       SELECT i.id FROM items i JOIN below b ON i.parent_id = b.id
     )
     SELECT EXISTS(SELECT 1 FROM below WHERE id = ?2)",
    [root.0, candidate.0],
    |row| row.get(0),
  )?)
}

// ── Relations ─────────────────────────────────────────────────────────────

fn check_targets(conn: &Connection, relations: &[RelationRef]) -> Result<()> {
  for rel in relations {
    if !item_exists(conn, rel.target)? {
      return Err(
        CoreError::RelatedItemNotFound { field: rel.field.clone(), id: rel.target }.into(),
      );
    }
  }
  Ok(())
}

fn save_relations(conn: &Connection, id: ItemId, relations: &[RelationRef]) -> Result<()> {
  let mut stmt = conn.prepare_cached(
    "INSERT OR IGNORE INTO item_relations (item_id, related_item_id, field_name)
     VALUES (?1, ?2, ?3)",
  )?;
  for rel in relations {
    stmt.execute(params![id.0, rel.target.0, rel.field])?;
  }
  Ok(())
}

fn has_edges(conn: &Connection, id: ItemId, field: &str) -> Result<bool> {
  Ok(conn.query_row(
    "SELECT EXISTS(SELECT 1 FROM item_relations WHERE item_id = ?1 AND field_name = ?2)",
    params![id.0, field],
    |row| row.get(0),
  )?)
}

/// Edges of every item in `ids`, in insertion order per item.
fn load_relations(conn: &Connection, ids: &[i64]) -> Result<HashMap<ItemId, Vec<RelationRef>>> {
  let mut stmt = conn.prepare(
    "SELECT item_id, field_name, related_item_id FROM item_relations
     WHERE item_id IN (SELECT value FROM json_each(?1))
     ORDER BY item_id, rowid",
  )?;
  let rows = stmt
    .query_map([serde_json::to_string(ids)?], |row| {
      Ok((
        ItemId(row.get(0)?),
        RelationRef { field: row.get(1)?, target: ItemId(row.get(2)?) },
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut grouped: HashMap<ItemId, Vec<RelationRef>> = HashMap::new();
  for (id, rel) in rows {
    grouped.entry(id).or_default().push(rel);
  }
  Ok(grouped)
}

/// Fold relation edges back into the `data` of every item, with a single
/// edge query for the whole batch.
fn reassemble(conn: &Connection, registry: &TypeRegistry, items: &mut [Item]) -> Result<()> {
  if items.is_empty() {
    return Ok(());
  }
  let ids: Vec<i64> = items.iter().map(|i| i.id.0).collect();
  let mut edges = load_relations(conn, &ids)?;
  let mut ref_fields: HashMap<String, Vec<FieldDecl>> = HashMap::new();

  for item in items.iter_mut() {
    let Some(item_type) = item.item_type.as_deref() else {
      continue;
    };
    let Some(relations) = edges.remove(&item.id) else {
      continue;
    };
    let fields = ref_fields
      .entry(item_type.to_owned())
      .or_insert_with(|| registry.ref_fields(item_type));
    payload::inject(&mut item.data, fields, &relations);
  }
  Ok(())
}

// ── Item writes ───────────────────────────────────────────────────────────

/// Validate and insert one item. Nothing is written unless every check
/// passes.
fn insert_item(conn: &Connection, registry: &TypeRegistry, input: NewItem) -> Result<ItemId> {
  input.validate()?;

  let item_type = input.item_type.filter(|t| !t.is_empty());
  let fields = match item_type.as_deref() {
    Some(name) => {
      registry.concrete(name)?;
      registry.resolve_fields(name)
    }
    None => Vec::new(),
  };

  if let Some(parent) = input.parent_id {
    if !item_exists(conn, parent)? {
      return Err(CoreError::ItemNotFound(parent).into());
    }
  }

  let extracted = payload::extract(&fields, input.data)?;
  payload::check_relation_fields(item_type.as_deref(), &fields, &extracted.relations)?;
  check_targets(conn, &extracted.relations)?;

  let now = encode_dt(Utc::now());
  conn.execute(
    "INSERT INTO items
       (type, title, content, data, parent_id, status, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
    params![
      item_type,
      input.title,
      input.content,
      encode_data(&extracted.data)?,
      input.parent_id.map(|p| p.0),
      input.status,
      now,
    ],
  )?;
  let id = ItemId(conn.last_insert_rowid());
  save_relations(conn, id, &extracted.relations)?;
  Ok(id)
}

fn apply_patch(
  conn: &Connection,
  registry: &TypeRegistry,
  id: ItemId,
  patch: ItemPatch,
) -> Result<()> {
  let current = fetch_item(conn, id)?.ok_or(CoreError::ItemNotFound(id))?;

  let retyped = patch.item_type.is_some();
  let item_type = match &patch.item_type {
    Some(new) => new.clone().filter(|t| !t.is_empty()),
    None => current.item_type.clone(),
  };
  if let Some(Some(name)) = &patch.item_type {
    registry.concrete(name)?;
  }

  let parent_id = match patch.parent_id {
    Some(Some(parent)) => {
      if parent == id || is_descendant(conn, id, parent)? {
        return Err(CoreError::InvalidParent { item: id, parent }.into());
      }
      if !item_exists(conn, parent)? {
        return Err(CoreError::ItemNotFound(parent).into());
      }
      Some(parent)
    }
    Some(None) => None,
    None => current.parent_id,
  };

  // Data is re-extracted whenever it or the type that governs it changes.
  let mut new_data = None;
  let mut relations = None;
  if patch.data.is_some() || retyped {
    let fields = item_type
      .as_deref()
      .map(|name| registry.resolve_fields(name))
      .unwrap_or_default();

    let patch_data = patch.data.unwrap_or_default();
    let patch_keys: Vec<String> = patch_data.keys().cloned().collect();
    let mut merged = current.data;
    merged.extend(patch_data);

    let extracted = payload::extract(&fields, merged)?;
    payload::check_relation_fields(item_type.as_deref(), &fields, &extracted.relations)?;
    check_targets(conn, &extracted.relations)?;

    let mut replaced = extracted.touched;
    for key in patch_keys {
      if !replaced.contains(&key) && has_edges(conn, id, &key)? {
        replaced.push(key);
      }
    }
    new_data = Some(encode_data(&extracted.data)?);
    relations = Some((replaced, extracted.relations));
  }

  conn.execute(
    "UPDATE items
     SET type = ?1, title = ?2, content = ?3, data = COALESCE(?4, data),
         parent_id = ?5, status = ?6, updated_at = ?7
     WHERE id = ?8",
    params![
      item_type,
      patch.title.unwrap_or(current.title),
      patch.content.unwrap_or(current.content),
      new_data,
      parent_id.map(|p| p.0),
      patch.status.unwrap_or(current.status),
      encode_dt(Utc::now()),
      id.0,
    ],
  )?;

  if retyped {
    // Edges may only name ref fields of the item's current type.
    let kept: Vec<String> = item_type
      .as_deref()
      .map(|name| registry.ref_fields(name).into_iter().map(|f| f.name).collect())
      .unwrap_or_default();
    conn.execute(
      "DELETE FROM item_relations
       WHERE item_id = ?1 AND field_name NOT IN (SELECT value FROM json_each(?2))",
      params![id.0, serde_json::to_string(&kept)?],
    )?;
  }

  if let Some((replaced, relations)) = relations {
    for field in &replaced {
      conn.execute(
        "DELETE FROM item_relations WHERE item_id = ?1 AND field_name = ?2",
        params![id.0, field],
      )?;
    }
    save_relations(conn, id, &relations)?;
  }
  Ok(())
}

// ─── KnowledgeStore impl ─────────────────────────────────────────────────────

impl KnowledgeStore for SqliteStore {
  type Error = crate::Error;

  // ── Types ─────────────────────────────────────────────────────────────

  fn define_type(&mut self, def: TypeDefinition) -> Result<TypeDef> {
    def.validate()?;
    let parent_type = def.parent_type.as_deref().filter(|p| !p.is_empty());

    let tx = self.conn.transaction()?;
    let registry = load_registry(&tx)?;
    registry.check_parent(&def.name, parent_type)?;

    let now = encode_dt(Utc::now());
    tx.execute(
      "INSERT INTO types
         (name, display_name, description, parent_type, abstract, fields_schema,
          created_at, updated_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
       ON CONFLICT(name) DO UPDATE SET
         display_name  = excluded.display_name,
         description   = excluded.description,
         parent_type   = excluded.parent_type,
         abstract      = excluded.abstract,
         fields_schema = excluded.fields_schema,
         updated_at    = excluded.updated_at",
      params![
        def.name,
        def.display_name,
        def.description,
        parent_type,
        def.is_abstract,
        encode_fields(&def.fields_schema)?,
        now,
      ],
    )?;

    let stored = read_type(&tx, &def.name)?
      .ok_or_else(|| CoreError::TypeNotFound(def.name.clone()))?;
    tx.commit()?;
    debug!(name = %stored.name, parent = ?stored.parent_type, "defined type");
    Ok(stored)
  }

  fn get_type(&self, name: &str) -> Result<Option<TypeDetail>> {
    let registry = load_registry(&self.conn)?;
    let Some(def) = registry.get(name).cloned() else {
      return Ok(None);
    };
    let parent = def
      .parent_type
      .as_deref()
      .and_then(|p| registry.get(p))
      .map(TypeSummary::from);

    Ok(Some(TypeDetail {
      resolved_fields: registry.resolve_fields(name),
      children: registry.children(name).into_iter().cloned().collect(),
      parent,
      def,
    }))
  }

  fn list_types(&self) -> Result<Vec<TypeDef>> {
    Ok(load_registry(&self.conn)?.iter().cloned().collect())
  }

  fn type_tree(&self) -> Result<Vec<TypeNode>> { Ok(load_registry(&self.conn)?.tree()) }

  fn delete_type(&mut self, name: &str) -> Result<()> {
    let tx = self.conn.transaction()?;
    let detached = tx.execute("UPDATE items SET type = NULL WHERE type = ?1", [name])?;
    tx.execute("UPDATE types SET parent_type = NULL WHERE parent_type = ?1", [name])?;
    let removed = tx.execute("DELETE FROM types WHERE name = ?1", [name])?;
    tx.commit()?;
    debug!(name, removed, detached, "deleted type");
    Ok(())
  }

  // ── Items — writes ────────────────────────────────────────────────────

  fn add_item(&mut self, input: NewItem) -> Result<ItemId> {
    let tx = self.conn.transaction()?;
    let registry = load_registry(&tx)?;
    let id = insert_item(&tx, &registry, input)?;
    tx.commit()?;
    Ok(id)
  }

  fn add_items(&mut self, inputs: Vec<NewItem>) -> Result<Vec<ItemId>> {
    let tx = self.conn.transaction()?;
    let registry = load_registry(&tx)?;
    let ids = inputs
      .into_iter()
      .map(|input| insert_item(&tx, &registry, input))
      .collect::<Result<Vec<_>>>()?;
    tx.commit()?;
    debug!(count = ids.len(), "added item batch");
    Ok(ids)
  }

  fn update_item(&mut self, id: ItemId, patch: ItemPatch) -> Result<()> {
    patch.validate()?;
    let tx = self.conn.transaction()?;
    let registry = load_registry(&tx)?;
    apply_patch(&tx, &registry, id, patch)?;
    tx.commit()?;
    Ok(())
  }

  fn delete_item(&mut self, id: ItemId) -> Result<()> {
    let tx = self.conn.transaction()?;
    tx.execute(
      "DELETE FROM item_relations WHERE item_id = ?1 OR related_item_id = ?1",
      [id.0],
    )?;
    tx.execute("UPDATE items SET parent_id = NULL WHERE parent_id = ?1", [id.0])?;
    tx.execute("DELETE FROM items WHERE id = ?1", [id.0])?;
    tx.commit()?;
    Ok(())
  }

  // ── Items — reads ─────────────────────────────────────────────────────

  fn get_item(&self, id: ItemId) -> Result<Option<ItemDetail>> {
    let Some(item) = fetch_item(&self.conn, id)? else {
      return Ok(None);
    };
    let children = query_items(
      &self.conn,
      &format!("SELECT {ITEM_COLUMNS} FROM items i WHERE i.parent_id = ?1 ORDER BY i.title, i.id"),
      [id.0],
    )?;

    let registry = load_registry(&self.conn)?;
    let mut all = Vec::with_capacity(children.len() + 1);
    all.push(item);
    all.extend(children);
    reassemble(&self.conn, &registry, &mut all)?;

    let item = all.remove(0);
    Ok(Some(ItemDetail { item, children: all }))
  }

  fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>> {
    let registry = load_registry(&self.conn)?;
    let compiled = compile_filter(filter, &registry)?;
    let sql = format!(
      "SELECT {ITEM_COLUMNS} FROM items i{} ORDER BY {} LIMIT ? OFFSET ?",
      compiled.where_clause(),
      order_clause(filter),
    );

    let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let offset = filter.offset.unwrap_or(0);
    let params = compiled.params.into_iter().chain([
      SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)),
      SqlValue::Integer(i64::try_from(offset).unwrap_or(i64::MAX)),
    ]);

    let mut items = query_items(&self.conn, &sql, params_from_iter(params))?;
    reassemble(&self.conn, &registry, &mut items)?;
    Ok(items)
  }

  fn search_items(&self, keyword: &str, filter: &ItemFilter) -> Result<Vec<Item>> {
    let registry = load_registry(&self.conn)?;
    let found = self.search_with(self.strategy, keyword, filter, &registry)?;
    if found.is_empty() && self.strategy == SearchStrategy::Indexed {
      debug!(keyword, "no indexed matches; retrying as substring scan");
      return self.search_with(SearchStrategy::ScanFallback, keyword, filter, &registry);
    }
    Ok(found)
  }
}
