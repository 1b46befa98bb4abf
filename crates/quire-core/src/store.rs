//! The `KnowledgeStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `quire-store-sqlite`).
//! The command layer depends on this abstraction, not on a concrete backend.

use crate::{
  item::{Item, ItemDetail, ItemId, ItemPatch, NewItem},
  query::ItemFilter,
  schema::{TypeDef, TypeDefinition, TypeDetail, TypeNode},
};

/// Abstraction over a Quire store backend.
///
/// Every write validates its whole input before the first row changes; a
/// rejected call leaves the store as it was.
pub trait KnowledgeStore {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Types ─────────────────────────────────────────────────────────────

  /// Create or replace a type definition. Rejects a missing parent and any
  /// parent assignment that would form a cycle.
  fn define_type(&mut self, def: TypeDefinition) -> Result<TypeDef, Self::Error>;

  /// A type with its resolved fields, direct children and parent summary.
  /// Returns `None` if not found.
  fn get_type(&self, name: &str) -> Result<Option<TypeDetail>, Self::Error>;

  /// All types, ordered by name.
  fn list_types(&self) -> Result<Vec<TypeDef>, Self::Error>;

  /// All types as a forest.
  fn type_tree(&self) -> Result<Vec<TypeNode>, Self::Error>;

  /// Delete a type. Items of the type and child types are detached (their
  /// reference is cleared), never deleted. Unknown names are a no-op.
  fn delete_type(&mut self, name: &str) -> Result<(), Self::Error>;

  // ── Items — writes ────────────────────────────────────────────────────

  fn add_item(&mut self, input: NewItem) -> Result<ItemId, Self::Error>;

  /// Add several items at once. All-or-nothing: the first failure rolls
  /// back every item of the batch.
  fn add_items(&mut self, inputs: Vec<NewItem>) -> Result<Vec<ItemId>, Self::Error>;

  /// Apply a partial update. `data` merges into the stored object; ref keys
  /// replace the field's whole edge set.
  fn update_item(&mut self, id: ItemId, patch: ItemPatch) -> Result<(), Self::Error>;

  /// Hard-delete an item. Its relation edges go with it; its children are
  /// detached. Unknown ids are a no-op.
  fn delete_item(&mut self, id: ItemId) -> Result<(), Self::Error>;

  // ── Items — reads ─────────────────────────────────────────────────────

  /// An item with relation fields reassembled and its direct children.
  /// Returns `None` if not found.
  fn get_item(&self, id: ItemId) -> Result<Option<ItemDetail>, Self::Error>;

  fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>, Self::Error>;

  /// Keyword search over title, content and data. Items that reference a
  /// direct match through a relation edge are included after the direct
  /// matches.
  fn search_items(
    &self,
    keyword: &str,
    filter: &ItemFilter,
  ) -> Result<Vec<Item>, Self::Error>;
}
