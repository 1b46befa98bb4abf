//! Type definitions — the schemas items are written against.
//!
//! A type names an ordered list of field declarations and may inherit the
//! declarations of a single parent. Abstract types exist only to be inherited
//! from and filtered on; no item may carry one directly.

use std::{collections::HashSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Field kinds ─────────────────────────────────────────────────────────────

/// The declared value kind of a field. Unrecognised kinds are preserved so
/// that schemas written by newer tools survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldKind {
  #[default]
  String,
  Text,
  Number,
  Boolean,
  Date,
  DateTime,
  Select,
  List,
  /// A pointer to one or more other items, stored as relation edges.
  Ref,
  Custom(String),
}

impl FieldKind {
  pub fn as_str(&self) -> &str {
    match self {
      Self::String => "string",
      Self::Text => "text",
      Self::Number => "number",
      Self::Boolean => "boolean",
      Self::Date => "date",
      Self::DateTime => "datetime",
      Self::Select => "select",
      Self::List => "list",
      Self::Ref => "ref",
      Self::Custom(s) => s,
    }
  }
}

impl From<String> for FieldKind {
  fn from(s: String) -> Self {
    match s.as_str() {
      "string" => Self::String,
      "text" => Self::Text,
      "number" => Self::Number,
      "boolean" => Self::Boolean,
      "date" => Self::Date,
      "datetime" => Self::DateTime,
      "select" => Self::Select,
      "list" => Self::List,
      "ref" => Self::Ref,
      _ => Self::Custom(s),
    }
  }
}

impl From<FieldKind> for String {
  fn from(k: FieldKind) -> Self { k.as_str().to_owned() }
}

impl fmt::Display for FieldKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Field declarations ──────────────────────────────────────────────────────

fn is_false(b: &bool) -> bool { !*b }

/// One entry of a type's `fields_schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
  pub name:        String,
  #[serde(rename = "type", default)]
  pub kind:        FieldKind,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  /// Name of the related type; required when `kind` is [`FieldKind::Ref`].
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ref_type:    Option<String>,
  /// Whether a ref field holds a list of ids rather than a single id.
  #[serde(default, skip_serializing_if = "is_false")]
  pub multiple:    bool,
  /// Any further keys (`required`, `options`, ...) kept verbatim.
  #[serde(flatten)]
  pub extra:       serde_json::Map<String, serde_json::Value>,
}

impl FieldDecl {
  pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
    Self {
      name: name.into(),
      kind,
      description: String::new(),
      ref_type: None,
      multiple: false,
      extra: serde_json::Map::new(),
    }
  }

  /// A ref field pointing at items of `ref_type`.
  pub fn reference(
    name: impl Into<String>,
    ref_type: impl Into<String>,
    multiple: bool,
  ) -> Self {
    Self {
      ref_type: Some(ref_type.into()),
      multiple,
      ..Self::new(name, FieldKind::Ref)
    }
  }

  pub fn is_ref(&self) -> bool { self.kind == FieldKind::Ref }
}

// ─── Types ───────────────────────────────────────────────────────────────────

/// A stored type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
  pub name:          String,
  pub display_name:  String,
  pub description:   String,
  pub parent_type:   Option<String>,
  #[serde(rename = "abstract")]
  pub is_abstract:   bool,
  pub fields_schema: Vec<FieldDecl>,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

/// Input to [`crate::store::KnowledgeStore::define_type`]. Defining an
/// existing name replaces its definition.
#[derive(Debug, Clone, Deserialize)]
pub struct TypeDefinition {
  pub name:          String,
  #[serde(default)]
  pub display_name:  String,
  #[serde(default)]
  pub description:   String,
  #[serde(default)]
  pub parent_type:   Option<String>,
  #[serde(rename = "abstract", default)]
  pub is_abstract:   bool,
  #[serde(default)]
  pub fields_schema: Vec<FieldDecl>,
}

impl TypeDefinition {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name:          name.into(),
      display_name:  String::new(),
      description:   String::new(),
      parent_type:   None,
      is_abstract:   false,
      fields_schema: Vec::new(),
    }
  }

  pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
    self.parent_type = Some(parent.into());
    self
  }

  pub fn abstract_type(mut self) -> Self {
    self.is_abstract = true;
    self
  }

  pub fn with_field(mut self, field: FieldDecl) -> Self {
    self.fields_schema.push(field);
    self
  }

  /// Structural checks that need no knowledge of other types.
  pub fn validate(&self) -> Result<()> {
    let invalid = |reason: String| Error::InvalidFieldSchema {
      type_name: self.name.clone(),
      reason,
    };

    if self.name.trim().is_empty() {
      return Err(invalid("type name must not be empty".into()));
    }

    let mut seen = HashSet::new();
    for field in &self.fields_schema {
      if field.name.trim().is_empty() {
        return Err(invalid("field name must not be empty".into()));
      }
      if !seen.insert(field.name.as_str()) {
        return Err(invalid(format!("duplicate field '{}'", field.name)));
      }
      if field.is_ref()
        && field.ref_type.as_deref().is_none_or(|t| t.trim().is_empty())
      {
        return Err(invalid(format!(
          "ref field '{}' must name a ref_type",
          field.name
        )));
      }
    }
    Ok(())
  }
}

// ─── Read models ─────────────────────────────────────────────────────────────

/// The short form of a type used when describing a parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSummary {
  pub name:         String,
  pub display_name: String,
  #[serde(rename = "abstract")]
  pub is_abstract:  bool,
}

impl From<&TypeDef> for TypeSummary {
  fn from(t: &TypeDef) -> Self {
    Self {
      name:         t.name.clone(),
      display_name: t.display_name.clone(),
      is_abstract:  t.is_abstract,
    }
  }
}

/// A type together with everything a reader needs to use it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDetail {
  #[serde(flatten)]
  pub def:             TypeDef,
  /// Own fields merged with every non-overridden ancestor field.
  pub resolved_fields: Vec<FieldDecl>,
  /// Direct child types, sorted by name.
  pub children:        Vec<TypeDef>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parent:          Option<TypeSummary>,
}

/// A node of the type forest returned by `type_tree`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeNode {
  #[serde(flatten)]
  pub def:      TypeDef,
  pub children: Vec<TypeNode>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn field_kind_round_trips_custom_names() {
    let decl: FieldDecl = serde_json::from_value(serde_json::json!({
      "name": "rating",
      "type": "stars",
      "required": true,
    }))
    .unwrap();

    assert_eq!(decl.kind, FieldKind::Custom("stars".into()));
    assert_eq!(decl.extra.get("required"), Some(&serde_json::json!(true)));

    let back = serde_json::to_value(&decl).unwrap();
    assert_eq!(back["type"], "stars");
    assert_eq!(back["required"], true);
    assert!(back.get("multiple").is_none());
  }

  #[test]
  fn ref_field_without_ref_type_is_rejected() {
    let def = TypeDefinition::new("task")
      .with_field(FieldDecl::new("assignee", FieldKind::Ref));
    let err = def.validate().unwrap_err();
    assert!(matches!(err, Error::InvalidFieldSchema { .. }));
  }

  #[test]
  fn duplicate_field_names_are_rejected() {
    let def = TypeDefinition::new("task")
      .with_field(FieldDecl::new("due", FieldKind::Date))
      .with_field(FieldDecl::new("due", FieldKind::String));
    assert!(def.validate().is_err());
  }

  #[test]
  fn blank_type_name_is_rejected() {
    assert!(TypeDefinition::new("  ").validate().is_err());
  }
}
