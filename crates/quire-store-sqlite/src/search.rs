//! Query compilation for listing and keyword search.
//!
//! [`compile_filter`] turns an [`ItemFilter`] into SQL conditions over the
//! `items` table (aliased `i`) plus positional parameters, in the order the
//! placeholders appear. Keyword matching comes in two flavours, chosen by
//! [`SearchStrategy`].

use quire_core::{
  payload::coerce_id,
  query::{DataOp, ItemFilter, SortField, SortOrder},
  registry::TypeRegistry,
};
use rusqlite::{Connection, types::Value as SqlValue};
use serde_json::Value;

use crate::{Result, encode::encode_dt, migrate::table_exists, schema::FTS_TABLE};

/// How keywords are matched against items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
  /// Full-text phrase match against the trigram index, ranked by relevance.
  Indexed,
  /// Case-insensitive substring scan over title, content and data.
  ScanFallback,
}

impl SearchStrategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Indexed => "indexed",
      Self::ScanFallback => "scan",
    }
  }

  pub(crate) fn detect(conn: &Connection) -> Result<Self> {
    Ok(if table_exists(conn, FTS_TABLE)? {
      Self::Indexed
    } else {
      Self::ScanFallback
    })
  }
}

// ─── Keyword matching ────────────────────────────────────────────────────────

/// Quote a keyword as a single FTS5 phrase so no input is parsed as query
/// syntax.
fn fts_phrase(keyword: &str) -> String {
  format!("\"{}\"", keyword.replace('"', "\"\""))
}

/// Escape `LIKE` wildcards; used with `ESCAPE '\'`.
pub(crate) fn like_pattern(s: &str) -> String {
  let mut out = String::with_capacity(s.len() + 2);
  out.push('%');
  for c in s.chars() {
    if matches!(c, '\\' | '%' | '_') {
      out.push('\\');
    }
    out.push(c);
  }
  out.push('%');
  out
}

/// Ids of every item matching `keyword` directly, ignoring filters. Indexed
/// matches come in relevance order, scan matches newest first.
pub(crate) fn direct_matches(
  conn: &Connection,
  strategy: SearchStrategy,
  keyword: &str,
) -> Result<Vec<i64>> {
  let (sql, param) = match strategy {
    SearchStrategy::Indexed => (
      "SELECT rowid FROM items_fts WHERE items_fts MATCH ?1 ORDER BY rank",
      fts_phrase(keyword),
    ),
    SearchStrategy::ScanFallback => (
      "SELECT i.id FROM items i
       WHERE i.title LIKE ?1 ESCAPE '\\'
          OR i.content LIKE ?1 ESCAPE '\\'
          OR i.data LIKE ?1 ESCAPE '\\'
       ORDER BY i.created_at DESC, i.id DESC",
      like_pattern(keyword),
    ),
  };

  let mut stmt = conn.prepare(sql)?;
  let ids = stmt
    .query_map([param], |row| row.get(0))?
    .collect::<rusqlite::Result<Vec<i64>>>()?;
  Ok(ids)
}

// ─── Structured filters ──────────────────────────────────────────────────────

/// SQL conditions with their positional parameters.
#[derive(Debug, Default)]
pub(crate) struct CompiledFilter {
  pub conditions: Vec<String>,
  pub params:     Vec<SqlValue>,
}

impl CompiledFilter {
  /// The conditions joined for appending after an existing `WHERE` clause.
  pub fn and_clause(&self) -> String {
    self
      .conditions
      .iter()
      .map(|c| format!(" AND {c}"))
      .collect()
  }

  /// The conditions as a standalone `WHERE` clause, or empty.
  pub fn where_clause(&self) -> String {
    if self.conditions.is_empty() {
      String::new()
    } else {
      format!(" WHERE {}", self.conditions.join(" AND "))
    }
  }
}

/// The SQL value a `json_extract` result is compared with.
fn sql_value(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Number(n) => match n.as_i64() {
      Some(i) => SqlValue::Integer(i),
      None => SqlValue::Real(n.as_f64().unwrap_or_default()),
    },
    Value::String(s) => SqlValue::Text(s.clone()),
    other => SqlValue::Text(other.to_string()),
  }
}

fn json_path(field: &str) -> String { format!("$.\"{field}\"") }

const EDGE_MATCH: &str = "EXISTS (SELECT 1 FROM item_relations r
  WHERE r.item_id = i.id AND r.field_name = ? AND r.related_item_id = ?)";

pub(crate) fn compile_filter(
  filter: &ItemFilter,
  registry: &TypeRegistry,
) -> Result<CompiledFilter> {
  let mut out = CompiledFilter::default();

  if let Some(item_type) = &filter.item_type {
    let subtree = registry.descendants(item_type);
    out
      .conditions
      .push("i.type IN (SELECT value FROM json_each(?))".into());
    out.params.push(SqlValue::Text(serde_json::to_string(&subtree)?));
  }

  if let Some(status) = &filter.status {
    out.conditions.push("i.status = ?".into());
    out.params.push(SqlValue::Text(status.clone()));
  }

  match filter.parent_id {
    Some(None) => out.conditions.push("i.parent_id IS NULL".into()),
    Some(Some(parent)) => {
      out.conditions.push("i.parent_id = ?".into());
      out.params.push(SqlValue::Integer(parent.0));
    }
    None => {}
  }

  let ranges = [
    ("i.created_at", &filter.created_from, &filter.created_to),
    ("i.updated_at", &filter.updated_from, &filter.updated_to),
  ];
  for (column, from, to) in ranges {
    if let Some(from) = from {
      out.conditions.push(format!("{column} >= ?"));
      out.params.push(SqlValue::Text(encode_dt(from.start())));
    }
    if let Some(to) = to {
      out.conditions.push(format!("{column} < ?"));
      out.params.push(SqlValue::Text(encode_dt(to.end_exclusive())));
    }
  }

  for df in &filter.data_filters {
    let path = SqlValue::Text(json_path(&df.field));
    let edge_target = coerce_id(&df.field, &df.value).ok();

    match df.op {
      DataOp::Eq if df.value.is_null() => {
        out.conditions.push("json_extract(i.data, ?) IS NULL".into());
        out.params.push(path);
      }
      DataOp::Eq | DataOp::Contains => {
        let (cond, operand) = if df.op == DataOp::Eq {
          ("json_extract(i.data, ?) = ?", sql_value(&df.value))
        } else {
          let needle = match &df.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
          };
          (
            "CAST(json_extract(i.data, ?) AS TEXT) LIKE ? ESCAPE '\\'",
            SqlValue::Text(like_pattern(&needle)),
          )
        };
        out.params.push(path);
        out.params.push(operand);

        match edge_target {
          Some(target) => {
            out.conditions.push(format!("({cond} OR {EDGE_MATCH})"));
            out.params.push(SqlValue::Text(df.field.clone()));
            out.params.push(SqlValue::Integer(target.0));
          }
          None => out.conditions.push(cond.into()),
        }
      }
      DataOp::Before | DataOp::After => {
        let cmp = if df.op == DataOp::Before { "<" } else { ">" };
        out.conditions.push(format!("json_extract(i.data, ?) {cmp} ?"));
        out.params.push(path);
        out.params.push(sql_value(&df.value));
      }
    }
  }

  Ok(out)
}

/// `ORDER BY` body for the filter's sort, with id as the tiebreaker.
pub(crate) fn order_clause(filter: &ItemFilter) -> String {
  let column = match filter.sort_field() {
    SortField::CreatedAt => "i.created_at",
    SortField::UpdatedAt => "i.updated_at",
    SortField::Title => "i.title",
    SortField::Status => "i.status",
    SortField::Type => "i.type",
    SortField::Id => "i.id",
  };
  let dir = match filter.sort_order() {
    SortOrder::Asc => "ASC",
    SortOrder::Desc => "DESC",
  };
  format!("{column} {dir}, i.id {dir}")
}

#[cfg(test)]
mod tests {
  use quire_core::query::DataFilter;
  use serde_json::json;

  use super::*;

  #[test]
  fn like_pattern_escapes_wildcards() {
    assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
  }

  #[test]
  fn phrase_doubles_embedded_quotes() {
    assert_eq!(fts_phrase(r#"say "hi""#), r#""say ""hi""""#);
  }

  #[test]
  fn empty_filter_compiles_to_nothing() {
    let compiled = compile_filter(&ItemFilter::default(), &TypeRegistry::default()).unwrap();
    assert!(compiled.conditions.is_empty());
    assert_eq!(compiled.where_clause(), "");
  }

  #[test]
  fn parameters_follow_placeholder_order() {
    let filter = ItemFilter {
      status: Some("active".into()),
      data_filters: vec![DataFilter::new("owner", DataOp::Eq, json!(7))],
      ..ItemFilter::of_type("task")
    };
    let compiled = compile_filter(&filter, &TypeRegistry::default()).unwrap();

    let placeholders: usize = compiled.conditions.iter().map(|c| c.matches('?').count()).sum();
    assert_eq!(placeholders, compiled.params.len());
    assert_eq!(compiled.params[0], SqlValue::Text(r#"["task"]"#.into()));
    assert_eq!(compiled.params[1], SqlValue::Text("active".into()));
    assert_eq!(compiled.params[2], SqlValue::Text("$.\"owner\"".into()));
    assert_eq!(compiled.params[3], SqlValue::Integer(7));
    assert_eq!(compiled.params[4], SqlValue::Text("owner".into()));
  }

  #[test]
  fn default_order_is_newest_first() {
    assert_eq!(order_clause(&ItemFilter::default()), "i.created_at DESC, i.id DESC");
  }
}
