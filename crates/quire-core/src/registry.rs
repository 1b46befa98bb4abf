//! [`TypeRegistry`] — an in-memory snapshot of every type definition.
//!
//! Types reference their parent by name, so the registry is a flat map keyed
//! by name and every hierarchy walk is a lookup loop. Walks carry a visited
//! set: a store written by something other than this crate could contain a
//! parent cycle, and none of these algorithms may loop on it.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::{
  Error, Result,
  schema::{FieldDecl, TypeDef, TypeNode},
};

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
  types: BTreeMap<String, TypeDef>,
}

impl TypeRegistry {
  pub fn new(types: impl IntoIterator<Item = TypeDef>) -> Self {
    Self {
      types: types.into_iter().map(|t| (t.name.clone(), t)).collect(),
    }
  }

  pub fn get(&self, name: &str) -> Option<&TypeDef> { self.types.get(name) }

  pub fn contains(&self, name: &str) -> bool { self.types.contains_key(name) }

  /// All types, ordered by name.
  pub fn iter(&self) -> impl Iterator<Item = &TypeDef> { self.types.values() }

  /// The type itself followed by its ancestors, nearest first. Stops at the
  /// first missing parent or at the first revisited name.
  pub fn ancestry(&self, name: &str) -> Vec<&TypeDef> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut current = self.types.get(name);
    while let Some(t) = current {
      if !visited.insert(t.name.as_str()) {
        break;
      }
      chain.push(t);
      current = t.parent_type.as_deref().and_then(|p| self.types.get(p));
    }
    chain
  }

  // ── Field resolution ──────────────────────────────────────────────────────

  /// The effective field list of `name`: inherited fields that the type does
  /// not redeclare, followed by the type's own fields in declared order. A
  /// redeclaration replaces the inherited declaration wholesale. Unknown
  /// types resolve to no fields.
  pub fn resolve_fields(&self, name: &str) -> Vec<FieldDecl> {
    self
      .ancestry(name)
      .into_iter()
      .rev()
      .fold(Vec::new(), |inherited, t| {
        let mut fields: Vec<FieldDecl> = inherited
          .into_iter()
          .filter(|f| !t.fields_schema.iter().any(|own| own.name == f.name))
          .collect();
        fields.extend(t.fields_schema.iter().cloned());
        fields
      })
  }

  /// Only the `ref` fields of [`Self::resolve_fields`].
  pub fn ref_fields(&self, name: &str) -> Vec<FieldDecl> {
    self
      .resolve_fields(name)
      .into_iter()
      .filter(FieldDecl::is_ref)
      .collect()
  }

  // ── Subtrees ──────────────────────────────────────────────────────────────

  fn child_index(&self) -> HashMap<&str, Vec<&TypeDef>> {
    let mut index: HashMap<&str, Vec<&TypeDef>> = HashMap::new();
    for t in self.types.values() {
      if let Some(parent) = t.parent_type.as_deref() {
        index.entry(parent).or_default().push(t);
      }
    }
    index
  }

  /// Direct children of `name`, sorted by name.
  pub fn children(&self, name: &str) -> Vec<&TypeDef> {
    self
      .types
      .values()
      .filter(|t| t.parent_type.as_deref() == Some(name))
      .collect()
  }

  /// `name` plus every transitive descendant, breadth first. `name` is always
  /// the first element, whether or not it is defined.
  pub fn descendants(&self, name: &str) -> Vec<String> {
    let index = self.child_index();
    let mut out = vec![name.to_owned()];
    let mut visited: HashSet<&str> = HashSet::from([name]);
    let mut queue = VecDeque::from([name]);

    while let Some(current) = queue.pop_front() {
      for child in index.get(current).into_iter().flatten() {
        if visited.insert(child.name.as_str()) {
          out.push(child.name.clone());
          queue.push_back(child.name.as_str());
        }
      }
    }
    out
  }

  /// All types as a forest. Types whose parent is missing are roots; roots
  /// and children are sorted by name.
  pub fn tree(&self) -> Vec<TypeNode> {
    let index = self.child_index();

    fn build<'a>(
      t: &'a TypeDef,
      index: &HashMap<&str, Vec<&'a TypeDef>>,
      visited: &mut HashSet<&'a str>,
    ) -> TypeNode {
      visited.insert(t.name.as_str());
      let children = index
        .get(t.name.as_str())
        .into_iter()
        .flatten()
        .filter(|c| !visited.contains(c.name.as_str()))
        .copied()
        .collect::<Vec<_>>()
        .into_iter()
        .map(|c| build(c, index, visited))
        .collect();
      TypeNode { def: t.clone(), children }
    }

    let mut visited = HashSet::new();
    self
      .types
      .values()
      .filter(|t| {
        t.parent_type
          .as_deref()
          .is_none_or(|p| !self.types.contains_key(p))
      })
      .map(|root| build(root, &index, &mut visited))
      .collect()
  }

  // ── Write-side checks ─────────────────────────────────────────────────────

  /// Reject a parent assignment that is missing or would close a cycle.
  pub fn check_parent(&self, name: &str, parent: Option<&str>) -> Result<()> {
    let Some(parent) = parent else {
      return Ok(());
    };
    if parent == name {
      return Err(Error::CircularParentType(format!("{name} -> {name}")));
    }
    if !self.contains(parent) {
      return Err(Error::ParentTypeNotFound(parent.to_owned()));
    }

    let mut path = vec![name];
    let mut visited = HashSet::from([name]);
    let mut current = Some(parent);
    while let Some(cur) = current {
      path.push(cur);
      if !visited.insert(cur) {
        return Err(Error::CircularParentType(path.join(" -> ")));
      }
      current = self.get(cur).and_then(|t| t.parent_type.as_deref());
    }
    Ok(())
  }

  /// The definition of a type an item may carry: it must exist and must not
  /// be abstract.
  pub fn concrete(&self, name: &str) -> Result<&TypeDef> {
    let t = self
      .get(name)
      .ok_or_else(|| Error::TypeNotFound(name.to_owned()))?;
    if t.is_abstract {
      return Err(Error::AbstractType(name.to_owned()));
    }
    Ok(t)
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;
  use crate::schema::FieldKind;

  fn def(name: &str, parent: Option<&str>, fields: Vec<FieldDecl>) -> TypeDef {
    TypeDef {
      name:          name.into(),
      display_name:  String::new(),
      description:   String::new(),
      parent_type:   parent.map(str::to_owned),
      is_abstract:   false,
      fields_schema: fields,
      created_at:    Utc::now(),
      updated_at:    Utc::now(),
    }
  }

  fn field(name: &str, kind: FieldKind) -> FieldDecl { FieldDecl::new(name, kind) }

  fn names(fields: &[FieldDecl]) -> Vec<&str> {
    fields.iter().map(|f| f.name.as_str()).collect()
  }

  fn three_level() -> TypeRegistry {
    TypeRegistry::new([
      def("a", None, vec![
        field("x", FieldKind::String),
        field("y", FieldKind::Number),
      ]),
      def("b", Some("a"), vec![field("z", FieldKind::Boolean)]),
      def("c", Some("b"), vec![
        FieldDecl::reference("y", "person", true),
        field("w", FieldKind::Date),
      ]),
    ])
  }

  // ─── resolve_fields ───────────────────────────────────────────────────────

  #[test]
  fn root_type_resolves_to_own_fields() {
    let reg = three_level();
    assert_eq!(names(&reg.resolve_fields("a")), ["x", "y"]);
  }

  #[test]
  fn inherited_fields_come_before_own_fields() {
    let reg = three_level();
    assert_eq!(names(&reg.resolve_fields("c")), ["x", "z", "y", "w"]);
  }

  #[test]
  fn redeclared_field_replaces_whole_declaration() {
    let reg = three_level();
    let resolved = reg.resolve_fields("c");
    let y = resolved.iter().find(|f| f.name == "y").unwrap();
    assert_eq!(y.kind, FieldKind::Ref);
    assert_eq!(y.ref_type.as_deref(), Some("person"));
    assert!(y.multiple);
    assert_eq!(reg.ref_fields("c").len(), 1);
  }

  #[test]
  fn unknown_type_has_no_fields() {
    assert!(three_level().resolve_fields("nope").is_empty());
  }

  #[test]
  fn corrupted_parent_cycle_does_not_loop() {
    let reg = TypeRegistry::new([
      def("p", Some("q"), vec![field("a", FieldKind::String)]),
      def("q", Some("p"), vec![field("b", FieldKind::String)]),
    ]);
    assert_eq!(names(&reg.resolve_fields("p")), ["b", "a"]);
    assert_eq!(reg.descendants("p"), ["p", "q"]);
  }

  // ─── descendants ──────────────────────────────────────────────────────────

  #[test]
  fn descendants_include_self_and_transitive_children() {
    let reg = TypeRegistry::new([
      def("animal", None, vec![]),
      def("dog", Some("animal"), vec![]),
      def("cat", Some("animal"), vec![]),
      def("puppy", Some("dog"), vec![]),
      def("rock", None, vec![]),
    ]);
    let mut found = reg.descendants("animal");
    assert_eq!(found[0], "animal");
    found.sort();
    assert_eq!(found, ["animal", "cat", "dog", "puppy"]);
    assert_eq!(reg.descendants("rock"), ["rock"]);
    assert_eq!(reg.descendants("missing"), ["missing"]);
  }

  // ─── check_parent ─────────────────────────────────────────────────────────

  #[test]
  fn self_parent_is_circular() {
    let reg = three_level();
    assert!(matches!(
      reg.check_parent("x", Some("x")),
      Err(Error::CircularParentType(_))
    ));
  }

  #[test]
  fn reparenting_under_a_descendant_is_circular() {
    let reg = three_level();
    let err = reg.check_parent("a", Some("c")).unwrap_err();
    assert!(matches!(err, Error::CircularParentType(ref p) if p == "a -> c -> b -> a"));
  }

  #[test]
  fn missing_parent_is_not_found() {
    let reg = three_level();
    assert!(matches!(
      reg.check_parent("d", Some("ghost")),
      Err(Error::ParentTypeNotFound(_))
    ));
    assert!(reg.check_parent("d", Some("c")).is_ok());
    assert!(reg.check_parent("d", None).is_ok());
  }

  // ─── concrete / tree ──────────────────────────────────────────────────────

  #[test]
  fn abstract_types_are_not_concrete() {
    let mut animal = def("animal", None, vec![]);
    animal.is_abstract = true;
    let reg = TypeRegistry::new([animal, def("dog", Some("animal"), vec![])]);

    assert!(matches!(reg.concrete("animal"), Err(Error::AbstractType(_))));
    assert!(matches!(reg.concrete("fish"), Err(Error::TypeNotFound(_))));
    assert!(reg.concrete("dog").is_ok());
  }

  #[test]
  fn tree_nests_children_under_roots() {
    let reg = TypeRegistry::new([
      def("animal", None, vec![]),
      def("dog", Some("animal"), vec![]),
      def("cat", Some("animal"), vec![]),
      def("orphan", Some("deleted"), vec![]),
    ]);
    let tree = reg.tree();
    let roots: Vec<_> = tree.iter().map(|n| n.def.name.as_str()).collect();
    assert_eq!(roots, ["animal", "orphan"]);
    let kids: Vec<_> = tree[0].children.iter().map(|n| n.def.name.as_str()).collect();
    assert_eq!(kids, ["cat", "dog"]);
  }
}
