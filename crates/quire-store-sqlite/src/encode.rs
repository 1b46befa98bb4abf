//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 UTC strings with fixed microsecond
//! precision, so string comparison orders them correctly. Field schemas and
//! item data are stored as compact JSON.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use quire_core::{
  item::{Data, Item, ItemId},
  schema::{FieldDecl, TypeDef},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accepts RFC 3339 and the `YYYY-MM-DD HH:MM:SS` form older stores wrote.
pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Ok(dt.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|naive| naive.and_utc())
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_data(data: &Data) -> Result<String> { Ok(serde_json::to_string(data)?) }

/// Stored data that does not parse as a JSON object reads as empty rather
/// than failing the whole read.
pub fn decode_data(item_id: i64, s: &str) -> Data {
  match serde_json::from_str::<serde_json::Value>(s) {
    Ok(serde_json::Value::Object(map)) => map,
    Ok(_) | Err(_) => {
      tracing::warn!(item_id, "stored data is not a JSON object; treating as empty");
      Data::new()
    }
  }
}

pub fn encode_fields(fields: &[FieldDecl]) -> Result<String> {
  Ok(serde_json::to_string(fields)?)
}

pub fn decode_fields(type_name: &str, s: &str) -> Vec<FieldDecl> {
  serde_json::from_str(s).unwrap_or_else(|e| {
    tracing::warn!(type_name, error = %e, "unreadable fields_schema; treating as empty");
    Vec::new()
  })
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawItem::from_row`]; items are always aliased `i`.
pub const ITEM_COLUMNS: &str = "i.id, i.type, i.title, i.content, i.data, \
                                i.parent_id, i.status, i.created_at, i.updated_at";

/// Raw values read directly from an `items` row.
pub struct RawItem {
  pub id:         i64,
  pub item_type:  Option<String>,
  pub title:      String,
  pub content:    String,
  pub data:       String,
  pub parent_id:  Option<i64>,
  pub status:     String,
  pub created_at: String,
  pub updated_at: String,
}

impl RawItem {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      item_type:  row.get(1)?,
      title:      row.get(2)?,
      content:    row.get(3)?,
      data:       row.get(4)?,
      parent_id:  row.get(5)?,
      status:     row.get(6)?,
      created_at: row.get(7)?,
      updated_at: row.get(8)?,
    })
  }

  pub fn into_item(self) -> Result<Item> {
    Ok(Item {
      id:         ItemId(self.id),
      data:       decode_data(self.id, &self.data),
      item_type:  self.item_type,
      title:      self.title,
      content:    self.content,
      parent_id:  self.parent_id.map(ItemId),
      status:     self.status,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Column list matching [`RawType::from_row`].
pub const TYPE_COLUMNS: &str = "name, display_name, description, parent_type, \
                                abstract, fields_schema, created_at, updated_at";

/// Raw values read directly from a `types` row.
pub struct RawType {
  pub name:          String,
  pub display_name:  String,
  pub description:   String,
  pub parent_type:   Option<String>,
  pub is_abstract:   bool,
  pub fields_schema: String,
  pub created_at:    String,
  pub updated_at:    String,
}

impl RawType {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      name:          row.get(0)?,
      display_name:  row.get::<_, Option<String>>(1)?.unwrap_or_default(),
      description:   row.get::<_, Option<String>>(2)?.unwrap_or_default(),
      parent_type:   row.get(3)?,
      is_abstract:   row.get::<_, Option<bool>>(4)?.unwrap_or(false),
      fields_schema: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
      created_at:    row.get(6)?,
      updated_at:    row.get(7)?,
    })
  }

  pub fn into_type(self) -> Result<TypeDef> {
    Ok(TypeDef {
      fields_schema: decode_fields(&self.name, &self.fields_schema),
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_dt(&self.updated_at)?,
      name:          self.name,
      display_name:  self.display_name,
      description:   self.description,
      parent_type:   self.parent_type.filter(|p| !p.is_empty()),
      is_abstract:   self.is_abstract,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamps_sort_as_strings() {
    let a = decode_dt("2024-01-01T09:00:00Z").unwrap();
    let b = decode_dt("2024-01-01T10:00:00.5Z").unwrap();
    assert!(encode_dt(a) < encode_dt(b));
    assert_eq!(encode_dt(a), "2024-01-01T09:00:00.000000Z");
  }

  #[test]
  fn legacy_timestamp_is_accepted() {
    let dt = decode_dt("2023-11-05 14:30:00").unwrap();
    assert_eq!(encode_dt(dt), "2023-11-05T14:30:00.000000Z");
    assert!(decode_dt("yesterday").is_err());
  }

  #[test]
  fn corrupt_data_reads_as_empty() {
    assert!(decode_data(1, "{not json").is_empty());
    assert!(decode_data(1, "[1, 2]").is_empty());
    assert_eq!(decode_data(1, r#"{"a": 1}"#).len(), 1);
  }
}
