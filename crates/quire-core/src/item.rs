//! Items — the records stored in the knowledge base.
//!
//! An item carries a handful of fixed columns plus a free-form `data` object.
//! Values of fields declared as `ref` on the item's type never live in `data`;
//! they are stored as relation edges and reassembled on read.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// The status assigned to items created without one.
pub const DEFAULT_STATUS: &str = "active";

/// The type-specific payload of an item. Key order is preserved.
pub type Data = serde_json::Map<String, serde_json::Value>;

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Store-assigned item identifier.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl fmt::Display for ItemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

impl From<i64> for ItemId {
  fn from(id: i64) -> Self { Self(id) }
}

// ─── Item ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
  pub id:         ItemId,
  #[serde(rename = "type")]
  pub item_type:  Option<String>,
  pub title:      String,
  pub content:    String,
  pub data:       Data,
  pub parent_id:  Option<ItemId>,
  pub status:     String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// An item with its direct children (items whose `parent_id` points at it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDetail {
  #[serde(flatten)]
  pub item:     Item,
  pub children: Vec<Item>,
}

// ─── NewItem ─────────────────────────────────────────────────────────────────

fn default_status() -> String { DEFAULT_STATUS.to_owned() }

/// Input to [`crate::store::KnowledgeStore::add_item`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewItem {
  /// Checked by [`NewItem::validate`] rather than by serde so that a missing
  /// title surfaces as a validation failure, not a parse failure.
  #[serde(default)]
  pub title:     String,
  #[serde(rename = "type", default)]
  pub item_type: Option<String>,
  #[serde(default)]
  pub content:   String,
  #[serde(default)]
  pub data:      Data,
  #[serde(default)]
  pub parent_id: Option<ItemId>,
  #[serde(default = "default_status")]
  pub status:    String,
}

impl NewItem {
  /// Convenience constructor with all optional fields set to their defaults.
  pub fn new(title: impl Into<String>) -> Self {
    Self {
      title:     title.into(),
      item_type: None,
      content:   String::new(),
      data:      Data::new(),
      parent_id: None,
      status:    default_status(),
    }
  }

  pub fn of_type(title: impl Into<String>, item_type: impl Into<String>) -> Self {
    Self { item_type: Some(item_type.into()), ..Self::new(title) }
  }

  pub fn with_data(mut self, data: serde_json::Value) -> Self {
    if let serde_json::Value::Object(map) = data {
      self.data = map;
    }
    self
  }

  pub fn validate(&self) -> Result<()> {
    if self.title.trim().is_empty() {
      return Err(Error::MissingTitle);
    }
    Ok(())
  }
}

// ─── ItemPatch ───────────────────────────────────────────────────────────────

/// Distinguishes an absent key (`None`) from an explicit `null`
/// (`Some(None)`).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
  D: Deserializer<'de>,
  T: Deserialize<'de>,
{
  Option::<T>::deserialize(deserializer).map(Some)
}

/// A partial update. Absent keys leave the stored value untouched; `data`
/// is merged key by key into the stored object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemPatch {
  #[serde(default)]
  pub title:     Option<String>,
  #[serde(default)]
  pub content:   Option<String>,
  #[serde(default)]
  pub status:    Option<String>,
  #[serde(rename = "type", default, deserialize_with = "nullable")]
  pub item_type: Option<Option<String>>,
  #[serde(default, deserialize_with = "nullable")]
  pub parent_id: Option<Option<ItemId>>,
  #[serde(default)]
  pub data:      Option<Data>,
}

impl ItemPatch {
  pub fn is_empty(&self) -> bool {
    self.title.is_none()
      && self.content.is_none()
      && self.status.is_none()
      && self.item_type.is_none()
      && self.parent_id.is_none()
      && self.data.is_none()
  }

  pub fn validate(&self) -> Result<()> {
    if self.is_empty() {
      return Err(Error::NoUpdateFields);
    }
    if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
      return Err(Error::MissingTitle);
    }
    Ok(())
  }
}
