//! Splitting item payloads into plain data and relation edges, and putting
//! them back together on read.
//!
//! On write, every key of the payload that names a resolved `ref` field is
//! removed and turned into `(field, target)` pairs. On read, the pairs loaded
//! for an item are folded back into `data` in the shape the field declares: a
//! single id for singular fields, a list for `multiple` fields.

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use crate::{
  Error, Result,
  item::{Data, ItemId},
  schema::{FieldDecl, FieldKind},
};

/// One outgoing relation value of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationRef {
  pub field:  String,
  pub target: ItemId,
}

/// The result of [`extract`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
  /// The payload with every ref key removed.
  pub data:      Data,
  /// Relation values, grouped by field in payload order.
  pub relations: Vec<RelationRef>,
  /// Every ref field name that appeared in the payload, including those set
  /// to `null` or `[]`. Their stored edges must be replaced.
  pub touched:   Vec<String>,
}

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Coerce a JSON value into an item id. Integers, integral floats and strings
/// of decimal digits are accepted.
pub fn coerce_id(field: &str, value: &Value) -> Result<ItemId> {
  let invalid = || Error::InvalidIdentifier {
    field: field.to_owned(),
    value: value.to_string(),
  };

  match value {
    Value::Number(n) => {
      if let Some(i) = n.as_i64() {
        return Ok(ItemId(i));
      }
      match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
          Ok(ItemId(f as i64))
        }
        _ => Err(invalid()),
      }
    }
    Value::String(s) => s.trim().parse::<i64>().map(ItemId).map_err(|_| invalid()),
    _ => Err(invalid()),
  }
}

// ─── Scalar validation ───────────────────────────────────────────────────────

fn is_date_like(s: &str) -> bool {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
    || DateTime::parse_from_rfc3339(s).is_ok()
}

/// Check a non-ref value against its declaration. `null` is always allowed;
/// kinds without a fixed JSON shape accept anything.
pub fn validate_value(decl: &FieldDecl, value: &Value) -> Result<()> {
  if value.is_null() {
    return Ok(());
  }
  let expected = match decl.kind {
    FieldKind::Number if !value.is_number() => "number",
    FieldKind::Boolean if !value.is_boolean() => "boolean",
    FieldKind::Date | FieldKind::DateTime
      if !value.as_str().is_some_and(is_date_like) =>
    {
      "date"
    }
    _ => return Ok(()),
  };
  Err(Error::FieldKind {
    field: decl.name.clone(),
    expected,
    value: value.to_string(),
  })
}

// ─── Extraction ──────────────────────────────────────────────────────────────

fn push_unique(relations: &mut Vec<RelationRef>, field: &str, target: ItemId) {
  if !relations.iter().any(|r| r.field == field && r.target == target) {
    relations.push(RelationRef { field: field.to_owned(), target });
  }
}

/// Validate `payload` against the resolved `fields` of a type and move every
/// ref value out of it.
pub fn extract(fields: &[FieldDecl], payload: Data) -> Result<Extracted> {
  let mut out = Extracted::default();

  for (key, value) in payload {
    let Some(decl) = fields.iter().find(|f| f.name == key) else {
      out.data.insert(key, value);
      continue;
    };

    if !decl.is_ref() {
      validate_value(decl, &value)?;
      out.data.insert(key, value);
      continue;
    }

    match (&value, decl.multiple) {
      (Value::Null, _) => {}
      (Value::Array(values), true) => {
        for v in values.iter().filter(|v| !v.is_null()) {
          push_unique(&mut out.relations, &key, coerce_id(&key, v)?);
        }
      }
      (Value::Array(_), false) => {
        return Err(Error::FieldKind {
          field: key,
          expected: "single item id",
          value: value.to_string(),
        });
      }
      (_, true) => {
        return Err(Error::FieldKind {
          field: key,
          expected: "list of item ids",
          value: value.to_string(),
        });
      }
      (v, false) => push_unique(&mut out.relations, &key, coerce_id(&key, v)?),
    }
    out.touched.push(key);
  }

  Ok(out)
}

/// Check that every relation names a ref field of the type. Used right before
/// edges are persisted, so a value can never land in a field nobody reads.
pub fn check_relation_fields(
  type_name: Option<&str>,
  fields: &[FieldDecl],
  relations: &[RelationRef],
) -> Result<()> {
  for rel in relations {
    if !fields.iter().any(|f| f.is_ref() && f.name == rel.field) {
      return Err(Error::UnknownRefField {
        type_name: type_name.unwrap_or_default().to_owned(),
        field:     rel.field.clone(),
      });
    }
  }
  Ok(())
}

// ─── Injection ───────────────────────────────────────────────────────────────

/// Fold an item's relation edges back into its `data`. Declared ref fields
/// with no edges are left absent; edges for fields the type no longer
/// declares as ref are ignored.
pub fn inject(data: &mut Data, fields: &[FieldDecl], relations: &[RelationRef]) {
  for decl in fields.iter().filter(|f| f.is_ref()) {
    let mut targets = relations
      .iter()
      .filter(|r| r.field == decl.name)
      .map(|r| Value::from(r.target.0));

    let value = if decl.multiple {
      let all: Vec<Value> = targets.collect();
      if all.is_empty() {
        continue;
      }
      Value::Array(all)
    } else {
      match targets.next() {
        Some(v) => v,
        None => continue,
      }
    };
    data.insert(decl.name.clone(), value);
  }
}
