//! Filter vocabulary shared by item listing and search.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer};

use crate::item::ItemId;

/// Default page size for `list_items`.
pub const DEFAULT_LIST_LIMIT: usize = 100;
/// Default page size for `search_items`.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

// ─── Dates ───────────────────────────────────────────────────────────────────

/// A bound of a date range, given either as a calendar date or an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum DateBound {
  Date(NaiveDate),
  Instant(DateTime<Utc>),
}

impl TryFrom<String> for DateBound {
  type Error = String;

  fn try_from(s: String) -> Result<Self, Self::Error> {
    if let Ok(d) = NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
      return Ok(Self::Date(d));
    }
    DateTime::parse_from_rfc3339(&s)
      .map(|dt| Self::Instant(dt.with_timezone(&Utc)))
      .map_err(|_| format!("expected YYYY-MM-DD or RFC 3339 timestamp, got {s:?}"))
  }
}

impl DateBound {
  /// The earliest instant included by a lower bound.
  pub fn start(&self) -> DateTime<Utc> {
    match self {
      Self::Date(d) => d.and_time(NaiveTime::MIN).and_utc(),
      Self::Instant(dt) => *dt,
    }
  }

  /// The first instant excluded by an upper bound. A calendar date covers
  /// the whole day; an instant is itself included.
  pub fn end_exclusive(&self) -> DateTime<Utc> {
    match self {
      Self::Date(_) => self.start() + TimeDelta::days(1),
      Self::Instant(dt) => *dt + TimeDelta::microseconds(1),
    }
  }
}

// ─── Data predicates ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataOp {
  /// Equal JSON value, or an edge to the given id for ref fields.
  Eq,
  /// Case-insensitive substring of the value's JSON text, or membership in
  /// a ref field's edge set.
  Contains,
  /// Strictly less than (lexicographic; ISO dates order correctly).
  Before,
  /// Strictly greater than.
  After,
}

/// A predicate over one key of an item's `data`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataFilter {
  pub field: String,
  #[serde(default = "default_op")]
  pub op:    DataOp,
  pub value: serde_json::Value,
}

fn default_op() -> DataOp { DataOp::Eq }

impl DataFilter {
  pub fn new(field: impl Into<String>, op: DataOp, value: serde_json::Value) -> Self {
    Self { field: field.into(), op, value }
  }
}

// ─── Ordering ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
  #[default]
  CreatedAt,
  UpdatedAt,
  Title,
  Status,
  Type,
  Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  Asc,
  #[default]
  Desc,
}

// ─── Filter ──────────────────────────────────────────────────────────────────

fn nullable_id<'de, D>(deserializer: D) -> Result<Option<Option<ItemId>>, D::Error>
where
  D: Deserializer<'de>,
{
  Option::<ItemId>::deserialize(deserializer).map(Some)
}

/// Parameters for [`crate::store::KnowledgeStore::list_items`] and
/// [`crate::store::KnowledgeStore::search_items`]. Every criterion is
/// optional; all given criteria must hold.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ItemFilter {
  /// Polymorphic: matches the type and all of its descendants.
  #[serde(rename = "type")]
  pub item_type:    Option<String>,
  pub status:       Option<String>,
  /// `Some(None)` selects top-level items only.
  #[serde(deserialize_with = "nullable_id")]
  pub parent_id:    Option<Option<ItemId>>,
  pub created_from: Option<DateBound>,
  pub created_to:   Option<DateBound>,
  pub updated_from: Option<DateBound>,
  pub updated_to:   Option<DateBound>,
  pub data_filters: Vec<DataFilter>,
  /// An explicit sort also overrides relevance ranking in search.
  pub sort:         Option<SortField>,
  pub sort_order:   Option<SortOrder>,
  pub limit:        Option<usize>,
  pub offset:       Option<usize>,
}

impl ItemFilter {
  pub fn of_type(item_type: impl Into<String>) -> Self {
    Self { item_type: Some(item_type.into()), ..Self::default() }
  }

  pub fn sort_field(&self) -> SortField { self.sort.unwrap_or_default() }

  pub fn sort_order(&self) -> SortOrder { self.sort_order.unwrap_or_default() }

  /// Apply offset then limit to an already ordered list.
  pub fn paginate<T>(&self, rows: Vec<T>, default_limit: usize) -> Vec<T> {
    rows
      .into_iter()
      .skip(self.offset.unwrap_or(0))
      .take(self.limit.unwrap_or(default_limit))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn filter_parses_full_dict() {
    let f: ItemFilter = serde_json::from_value(json!({
      "type": "animal",
      "status": "active",
      "parent_id": null,
      "created_from": "2024-01-01",
      "updated_to": "2024-02-01T12:00:00Z",
      "data_filters": [
        { "field": "due", "op": "before", "value": "2024-03-01" },
        { "field": "owner", "value": 4 },
      ],
      "sort": "title",
      "sort_order": "asc",
      "limit": 10,
      "offset": 5,
    }))
    .unwrap();

    assert_eq!(f.item_type.as_deref(), Some("animal"));
    assert_eq!(f.parent_id, Some(None));
    assert!(matches!(f.created_from, Some(DateBound::Date(_))));
    assert!(matches!(f.updated_to, Some(DateBound::Instant(_))));
    assert_eq!(f.data_filters[0].op, DataOp::Before);
    assert_eq!(f.data_filters[1].op, DataOp::Eq);
    assert_eq!(f.sort_field(), SortField::Title);
    assert_eq!(f.sort_order(), SortOrder::Asc);
  }

  #[test]
  fn empty_filter_defaults_to_newest_first() {
    let f: ItemFilter = serde_json::from_value(json!({})).unwrap();
    assert_eq!(f.parent_id, None);
    assert_eq!(f.sort_field(), SortField::CreatedAt);
    assert_eq!(f.sort_order(), SortOrder::Desc);
  }

  #[test]
  fn unparseable_date_bound_is_rejected() {
    let r: Result<ItemFilter, _> =
      serde_json::from_value(json!({ "created_from": "last week" }));
    assert!(r.is_err());
  }

  #[test]
  fn date_only_upper_bound_covers_the_day() {
    let d = DateBound::try_from("2024-03-10".to_owned()).unwrap();
    assert_eq!(d.start().to_rfc3339(), "2024-03-10T00:00:00+00:00");
    assert_eq!(d.end_exclusive().to_rfc3339(), "2024-03-11T00:00:00+00:00");
  }

  #[test]
  fn paginate_applies_offset_before_limit() {
    let f = ItemFilter { limit: Some(2), offset: Some(1), ..ItemFilter::default() };
    assert_eq!(f.paginate(vec![1, 2, 3, 4], 50), [2, 3]);
  }
}
