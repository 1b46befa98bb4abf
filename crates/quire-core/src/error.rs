//! Error types for `quire-core`.

use std::fmt;

use thiserror::Error;

use crate::item::ItemId;

/// The closed set of failure categories a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  NotFound,
  Validation,
  SchemaIntegrity,
  Storage,
  MalformedInput,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::NotFound => "not_found",
      Self::Validation => "validation",
      Self::SchemaIntegrity => "schema_integrity",
      Self::Storage => "storage",
      Self::MalformedInput => "malformed_input",
    })
  }
}

#[derive(Debug, Error)]
pub enum Error {
  // ── Not found ───────────────────────────────────────────────────────────
  #[error("type not found: {0}")]
  TypeNotFound(String),

  #[error("parent type not found: {0}")]
  ParentTypeNotFound(String),

  #[error("item not found: {0}")]
  ItemNotFound(ItemId),

  #[error("related item not found: {id} (field '{field}')")]
  RelatedItemNotFound { field: String, id: ItemId },

  // ── Validation ──────────────────────────────────────────────────────────
  #[error("missing required field: title")]
  MissingTitle,

  #[error(
    "type '{0}' is abstract and cannot be used directly. Use a concrete child type."
  )]
  AbstractType(String),

  #[error("field '{field}' expects an item id, got {value}")]
  InvalidIdentifier { field: String, value: String },

  #[error("'{field}' is not a ref field of type '{type_name}'")]
  UnknownRefField { type_name: String, field: String },

  #[error("field '{field}' expects a {expected} value, got {value}")]
  FieldKind {
    field:    String,
    expected: &'static str,
    value:    String,
  },

  #[error("invalid fields_schema for type '{type_name}': {reason}")]
  InvalidFieldSchema { type_name: String, reason: String },

  #[error("no valid fields to update")]
  NoUpdateFields,

  #[error("item {item} cannot have parent {parent}: it would form a cycle")]
  InvalidParent { item: ItemId, parent: ItemId },

  // ── Schema integrity ────────────────────────────────────────────────────
  #[error("circular parent_type reference detected: {0}")]
  CircularParentType(String),

  // ── Input ───────────────────────────────────────────────────────────────
  #[error("invalid JSON: {0}")]
  MalformedInput(#[source] serde_json::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::TypeNotFound(_)
      | Self::ParentTypeNotFound(_)
      | Self::ItemNotFound(_)
      | Self::RelatedItemNotFound { .. } => ErrorKind::NotFound,
      Self::MissingTitle
      | Self::AbstractType(_)
      | Self::InvalidIdentifier { .. }
      | Self::UnknownRefField { .. }
      | Self::FieldKind { .. }
      | Self::InvalidFieldSchema { .. }
      | Self::NoUpdateFields
      | Self::InvalidParent { .. } => ErrorKind::Validation,
      Self::CircularParentType(_) => ErrorKind::SchemaIntegrity,
      Self::MalformedInput(_) => ErrorKind::MalformedInput,
      Self::Serialization(_) => ErrorKind::Storage,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
