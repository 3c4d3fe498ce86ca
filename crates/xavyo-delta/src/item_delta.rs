//! Item deltas.
//!
//! An item delta changes one item: it either replaces the whole value set or
//! adds and deletes individual values, never both. [`DeltaSet`] encodes that
//! invariant in the type.
//!
//! Merging follows chronological order (`self` is earlier, the argument is
//! later):
//!
//! | earlier    | later      | result                                      |
//! |------------|------------|---------------------------------------------|
//! | replace R  | replace R' | replace R'                                  |
//! | replace R  | add A/del D| replace (R ∪ A) − D                         |
//! | add/delete | replace R' | replace R'                                  |
//! | add/delete | add/delete | add (A − D') ∪ A', delete (D − A') ∪ D'    |
//!
//! A later delete of a value pending in the add set cancels it without
//! recording a delete. Cancellation compares real values (and ids when both
//! container values carry one); id-only matching is reserved for folding
//! values into a set.

use serde::{Deserialize, Serialize};

use crate::error::{DeltaError, Result};
use crate::item::{
    find_container_value_mut, find_item, find_or_create_container_value, Item, ItemKind,
};
use crate::path::ItemPath;
use crate::value::{
    add_or_absorb, remove_cancelled, sets_equal_real, ContainerValue,
    ItemValue, PropertyValue, RealValue, ReferenceValue,
};

/// Value sets of an item delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaSet<V> {
    /// Replace all values of the item. An empty set clears the item.
    Replace(Vec<V>),
    /// Add and delete individual values.
    AddDelete { add: Vec<V>, delete: Vec<V> },
}

impl<V> Default for DeltaSet<V> {
    fn default() -> Self {
        Self::AddDelete {
            add: Vec::new(),
            delete: Vec::new(),
        }
    }
}

/// A change to one item with values of kind `V`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedDelta<V> {
    path: ItemPath,
    set: DeltaSet<V>,
}

/// Delta of a property.
pub type PropertyDelta = TypedDelta<PropertyValue>;
/// Delta of a reference.
pub type ReferenceDelta = TypedDelta<ReferenceValue>;
/// Delta of a container.
pub type ContainerDelta = TypedDelta<ContainerValue>;

impl<V: ItemValue> TypedDelta<V> {
    /// Create an empty add/delete delta.
    #[must_use]
    pub fn new(path: ItemPath) -> Self {
        Self {
            path,
            set: DeltaSet::default(),
        }
    }

    /// Create a replace delta.
    #[must_use]
    pub fn replace(path: ItemPath, values: Vec<V>) -> Self {
        let mut delta = Self::new(path);
        delta.set_values_to_replace(values);
        delta
    }

    /// Create an add delta.
    #[must_use]
    pub fn add(path: ItemPath, values: Vec<V>) -> Self {
        let mut delta = Self::new(path);
        for value in values {
            delta.add_value_to_add(value);
        }
        delta
    }

    /// Create a delete delta.
    #[must_use]
    pub fn delete(path: ItemPath, values: Vec<V>) -> Self {
        let mut delta = Self::new(path);
        for value in values {
            delta.add_value_to_delete(value);
        }
        delta
    }

    /// Create an add/delete delta from both sets.
    #[must_use]
    pub fn add_delete(path: ItemPath, add: Vec<V>, delete: Vec<V>) -> Self {
        let mut delta = Self::add(path, add);
        for value in delete {
            delta.add_value_to_delete(value);
        }
        delta
    }

    /// Addressed path.
    #[must_use]
    pub fn path(&self) -> &ItemPath {
        &self.path
    }

    /// Value sets.
    #[must_use]
    pub fn set(&self) -> &DeltaSet<V> {
        &self.set
    }

    /// Values to replace, if this is a replace delta.
    #[must_use]
    pub fn values_to_replace(&self) -> Option<&[V]> {
        match &self.set {
            DeltaSet::Replace(values) => Some(values),
            DeltaSet::AddDelete { .. } => None,
        }
    }

    /// Values to add (empty for replace deltas).
    #[must_use]
    pub fn values_to_add(&self) -> &[V] {
        match &self.set {
            DeltaSet::AddDelete { add, .. } => add,
            DeltaSet::Replace(_) => &[],
        }
    }

    /// Values to delete (empty for replace deltas).
    #[must_use]
    pub fn values_to_delete(&self) -> &[V] {
        match &self.set {
            DeltaSet::AddDelete { delete, .. } => delete,
            DeltaSet::Replace(_) => &[],
        }
    }

    /// Whether this is a replace delta.
    #[must_use]
    pub fn is_replace(&self) -> bool {
        matches!(self.set, DeltaSet::Replace(_))
    }

    /// Whether the delta changes nothing. A replace delta is never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.set {
            DeltaSet::Replace(_) => false,
            DeltaSet::AddDelete { add, delete } => add.is_empty() && delete.is_empty(),
        }
    }

    /// Add a value to add. In replace mode the value joins the replace set;
    /// otherwise it joins the add set and leaves the delete set.
    pub fn add_value_to_add(&mut self, value: V) {
        match &mut self.set {
            DeltaSet::Replace(values) => add_or_absorb(values, value),
            DeltaSet::AddDelete { add, delete } => {
                remove_cancelled(delete, &value);
                add_or_absorb(add, value);
            }
        }
    }

    /// Add a value to delete. In replace mode the value leaves the replace
    /// set; otherwise a pending add of the same value is cancelled instead.
    pub fn add_value_to_delete(&mut self, value: V) {
        match &mut self.set {
            DeltaSet::Replace(values) => {
                values.retain(|v| !value.matches_for_removal(v));
            }
            DeltaSet::AddDelete { add, delete } => {
                if !remove_cancelled(add, &value) && !delete.iter().any(|d| d.cancels(&value)) {
                    delete.push(value);
                }
            }
        }
    }

    /// Switch to replace mode with the given values, discarding increments.
    pub fn set_values_to_replace(&mut self, values: Vec<V>) {
        let mut deduped = Vec::with_capacity(values.len());
        for value in values {
            add_or_absorb(&mut deduped, value);
        }
        self.set = DeltaSet::Replace(deduped);
    }

    /// Merge a chronologically later delta into this one.
    ///
    /// # Errors
    ///
    /// Returns an incompatible merge error if the paths differ.
    pub fn merge(&mut self, later: TypedDelta<V>) -> Result<()> {
        if !self.path.is_equivalent(&later.path) {
            return Err(DeltaError::incompatible_merge(format!(
                "cannot merge delta for '{}' into delta for '{}'",
                later.path, self.path
            )));
        }
        match later.set {
            DeltaSet::Replace(values) => self.set_values_to_replace(values),
            DeltaSet::AddDelete { add, delete } => {
                for value in add {
                    self.add_value_to_add(value);
                }
                for value in delete {
                    self.add_value_to_delete(value);
                }
            }
        }
        Ok(())
    }

    /// Apply to an item in place.
    pub fn apply_to_item(&self, item: &mut Item<V>) {
        match &self.set {
            DeltaSet::Replace(values) => {
                item.values.clear();
                for value in values {
                    item.add_value(value.clone());
                }
            }
            DeltaSet::AddDelete { add, delete } => {
                for value in delete {
                    item.remove_value(value);
                }
                for value in add {
                    item.add_value(value.clone());
                }
            }
        }
    }

    /// Drop the parts of this delta that would not change `current`: adds of
    /// values already present, deletes of absent values, and replaces that
    /// restate the current set.
    #[must_use]
    pub fn narrow(&self, current: Option<&Item<V>>) -> TypedDelta<V> {
        let existing: &[V] = current.map_or(&[], |i| i.values.as_slice());
        let set = match &self.set {
            DeltaSet::Replace(values) => {
                if sets_equal_real(values, existing) {
                    DeltaSet::default()
                } else {
                    DeltaSet::Replace(values.clone())
                }
            }
            DeltaSet::AddDelete { add, delete } => DeltaSet::AddDelete {
                add: add
                    .iter()
                    .filter(|v| !existing.iter().any(|e| e.equals_real(v)))
                    .cloned()
                    .collect(),
                delete: delete
                    .iter()
                    .filter(|v| existing.iter().any(|e| v.matches_for_removal(e)))
                    .cloned()
                    .collect(),
            },
        };
        TypedDelta {
            path: self.path.clone(),
            set,
        }
    }

    /// Apply to the item addressed by this delta's path below `root`,
    /// creating parent containers as needed. Items left empty are removed.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the path is malformed or the existing item
    /// has a different kind.
    pub fn apply_to_root(&self, root: &mut ContainerValue) -> Result<()> {
        let (parent, name) = self.path.split_item_name()?;
        if self.is_empty() {
            return Ok(());
        }
        let adds_values = match &self.set {
            DeltaSet::Replace(values) => !values.is_empty(),
            DeltaSet::AddDelete { add, .. } => !add.is_empty(),
        };
        let parent_value = if adds_values {
            find_or_create_container_value(root, parent)?
        } else {
            match find_container_value_mut(root, parent)? {
                Some(value) => value,
                None => return Ok(()),
            }
        };
        if !adds_values && !parent_value.items.contains_key(name) {
            return Ok(());
        }
        let item = parent_value
            .items
            .entry(name.to_string())
            .or_insert_with(|| V::into_any_item(Item::new(name)));
        let kind = item.kind();
        let Some(typed) = V::typed_item_mut(item) else {
            return Err(DeltaError::schema(format!(
                "Cannot apply {} delta to {kind} item '{}'",
                V::KIND,
                self.path
            )));
        };
        self.apply_to_item(typed);
        if typed.is_empty() {
            parent_value.items.remove(name);
        }
        Ok(())
    }

    /// Clear all value sets.
    pub fn clear(&mut self) {
        self.set = DeltaSet::default();
    }
}

/// A change to one item of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemDelta {
    Property(PropertyDelta),
    Reference(ReferenceDelta),
    Container(ContainerDelta),
}

macro_rules! dispatch {
    ($self:expr, $d:ident => $body:expr) => {
        match $self {
            ItemDelta::Property($d) => $body,
            ItemDelta::Reference($d) => $body,
            ItemDelta::Container($d) => $body,
        }
    };
}

fn property_values<I, T>(values: I) -> Vec<PropertyValue>
where
    I: IntoIterator<Item = T>,
    T: Into<RealValue>,
{
    values.into_iter().map(PropertyValue::new).collect()
}

impl ItemDelta {
    /// Replace a property's values.
    pub fn replace_property<I, T>(path: ItemPath, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<RealValue>,
    {
        Self::Property(TypedDelta::replace(path, property_values(values)))
    }

    /// Add property values.
    pub fn add_property<I, T>(path: ItemPath, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<RealValue>,
    {
        Self::Property(TypedDelta::add(path, property_values(values)))
    }

    /// Delete property values.
    pub fn delete_property<I, T>(path: ItemPath, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<RealValue>,
    {
        Self::Property(TypedDelta::delete(path, property_values(values)))
    }

    /// Add container values.
    #[must_use]
    pub fn add_container(path: ItemPath, values: Vec<ContainerValue>) -> Self {
        Self::Container(TypedDelta::add(path, values))
    }

    /// Delete container values.
    #[must_use]
    pub fn delete_container(path: ItemPath, values: Vec<ContainerValue>) -> Self {
        Self::Container(TypedDelta::delete(path, values))
    }

    /// Replace container values.
    #[must_use]
    pub fn replace_container(path: ItemPath, values: Vec<ContainerValue>) -> Self {
        Self::Container(TypedDelta::replace(path, values))
    }

    /// Add references.
    #[must_use]
    pub fn add_reference(path: ItemPath, values: Vec<ReferenceValue>) -> Self {
        Self::Reference(TypedDelta::add(path, values))
    }

    /// Delete references.
    #[must_use]
    pub fn delete_reference(path: ItemPath, values: Vec<ReferenceValue>) -> Self {
        Self::Reference(TypedDelta::delete(path, values))
    }

    /// Addressed path.
    #[must_use]
    pub fn path(&self) -> &ItemPath {
        dispatch!(self, d => d.path())
    }

    /// Kind of the changed item.
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Property(_) => ItemKind::Property,
            Self::Reference(_) => ItemKind::Reference,
            Self::Container(_) => ItemKind::Container,
        }
    }

    /// Whether the delta changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        dispatch!(self, d => d.is_empty())
    }

    /// Whether this is a replace delta.
    #[must_use]
    pub fn is_replace(&self) -> bool {
        dispatch!(self, d => d.is_replace())
    }

    /// Borrow as a property delta.
    #[must_use]
    pub fn as_property(&self) -> Option<&PropertyDelta> {
        match self {
            Self::Property(d) => Some(d),
            _ => None,
        }
    }

    /// Borrow as a container delta.
    #[must_use]
    pub fn as_container(&self) -> Option<&ContainerDelta> {
        match self {
            Self::Container(d) => Some(d),
            _ => None,
        }
    }

    /// Borrow as a reference delta.
    #[must_use]
    pub fn as_reference(&self) -> Option<&ReferenceDelta> {
        match self {
            Self::Reference(d) => Some(d),
            _ => None,
        }
    }

    /// Merge a chronologically later delta into this one.
    ///
    /// # Errors
    ///
    /// Returns an incompatible merge error if paths or kinds differ.
    pub fn merge(&mut self, later: ItemDelta) -> Result<()> {
        match (self, later) {
            (Self::Property(a), Self::Property(b)) => a.merge(b),
            (Self::Reference(a), Self::Reference(b)) => a.merge(b),
            (Self::Container(a), Self::Container(b)) => a.merge(b),
            (earlier, later) => Err(DeltaError::incompatible_merge(format!(
                "cannot merge {} delta into {} delta for '{}'",
                later.kind(),
                earlier.kind(),
                earlier.path()
            ))),
        }
    }

    /// Apply to the item addressed below `root`.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the path is malformed or kinds mismatch.
    pub fn apply_to_root(&self, root: &mut ContainerValue) -> Result<()> {
        dispatch!(self, d => d.apply_to_root(root))
    }

    /// Narrow against the item currently present below `root`.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the path is malformed or kinds mismatch.
    pub fn narrow(&self, root: &ContainerValue) -> Result<ItemDelta> {
        let current = find_item(root, self.path())?;
        let mismatch = || {
            DeltaError::schema(format!(
                "Item at '{}' is not a {}",
                self.path(),
                self.kind()
            ))
        };
        Ok(match self {
            Self::Property(d) => {
                let item = current.map(|i| i.as_property().ok_or_else(mismatch)).transpose()?;
                Self::Property(d.narrow(item))
            }
            Self::Reference(d) => {
                let item = current.map(|i| i.as_reference().ok_or_else(mismatch)).transpose()?;
                Self::Reference(d.narrow(item))
            }
            Self::Container(d) => {
                let item = current.map(|i| i.as_container().ok_or_else(mismatch)).transpose()?;
                Self::Container(d.narrow(item))
            }
        })
    }
}

impl<V: ItemValue> From<TypedDelta<V>> for ItemDelta {
    fn from(delta: TypedDelta<V>) -> Self {
        V::into_item_delta(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> ItemPath {
        s.parse().unwrap()
    }

    fn values(items: &[&str]) -> Vec<PropertyValue> {
        items.iter().map(|s| PropertyValue::new(*s)).collect()
    }

    fn strings(values: &[PropertyValue]) -> Vec<String> {
        values.iter().map(|v| v.value.to_string()).collect()
    }

    #[test]
    fn test_merge_add_add() {
        let mut earlier = PropertyDelta::add(path("email"), values(&["a"]));
        earlier
            .merge(PropertyDelta::add(path("email"), values(&["b"])))
            .unwrap();
        assert_eq!(strings(earlier.values_to_add()), vec!["a", "b"]);
        assert!(earlier.values_to_delete().is_empty());
        assert!(!earlier.is_replace());
    }

    #[test]
    fn test_merge_duplicate_add_keeps_earlier_value() {
        let mut earlier = PropertyDelta::add(path("email"), values(&["a"]));
        earlier
            .merge(PropertyDelta::add(path("email"), values(&["a"])))
            .unwrap();
        assert_eq!(strings(earlier.values_to_add()), vec!["a"]);
    }

    #[test]
    fn test_merge_increment_into_replace() {
        let mut earlier = PropertyDelta::replace(path("email"), values(&["x", "y"]));
        earlier
            .merge(PropertyDelta::add_delete(
                path("email"),
                values(&["z"]),
                values(&["y"]),
            ))
            .unwrap();
        assert_eq!(
            strings(earlier.values_to_replace().unwrap()),
            vec!["x", "z"]
        );
    }

    #[test]
    fn test_merge_replace_discards_increments() {
        let mut earlier = PropertyDelta::add_delete(path("email"), values(&["a"]), values(&["b"]));
        earlier
            .merge(PropertyDelta::replace(path("email"), values(&["c"])))
            .unwrap();
        assert_eq!(strings(earlier.values_to_replace().unwrap()), vec!["c"]);

        let mut earlier = PropertyDelta::replace(path("email"), values(&["a"]));
        earlier
            .merge(PropertyDelta::replace(path("email"), values(&["b"])))
            .unwrap();
        assert_eq!(strings(earlier.values_to_replace().unwrap()), vec!["b"]);
    }

    #[test]
    fn test_add_then_delete_cancels() {
        let mut earlier = PropertyDelta::add(path("email"), values(&["v"]));
        earlier
            .merge(PropertyDelta::delete(path("email"), values(&["v"])))
            .unwrap();
        assert!(earlier.values_to_add().is_empty());
        assert!(earlier.values_to_delete().is_empty());
        assert!(earlier.is_empty());

    }

    #[test]
    fn test_delete_then_add_keeps_add() {
        let mut earlier = PropertyDelta::delete(path("email"), values(&["v"]));
        earlier
            .merge(PropertyDelta::add(path("email"), values(&["v"])))
            .unwrap();
        assert_eq!(strings(earlier.values_to_add()), vec!["v"]);
        assert!(earlier.values_to_delete().is_empty());
    }

    #[test]
    fn test_container_content_change_with_same_id_survives_merge() {
        let old = ContainerValue::with_id(1).with_property("description", "a");
        let new = ContainerValue::with_id(1).with_property("description", "b");

        let mut merged = ContainerDelta::delete(path("assignment"), vec![old.clone()]);
        merged
            .merge(ContainerDelta::add(path("assignment"), vec![new.clone()]))
            .unwrap();
        assert_eq!(merged.values_to_add(), &[new.clone()]);
        assert_eq!(merged.values_to_delete(), &[old.clone()]);

        let built = ContainerDelta::add_delete(path("assignment"), vec![new], vec![old.clone()]);
        assert_eq!(built.values_to_add().len(), 1);
        assert_eq!(built.values_to_delete().len(), 1);

        let mut root = ContainerValue::new().with_container("assignment", vec![old]);
        ItemDelta::Container(built).apply_to_root(&mut root).unwrap();
        let item = root.item("assignment").unwrap().as_container().unwrap();
        assert_eq!(item.values.len(), 1);
        assert_eq!(
            item.values[0]
                .item("description")
                .and_then(|i| i.as_property())
                .map(|p| p.values[0].value.clone()),
            Some(RealValue::from("b"))
        );
    }

    #[test]
    fn test_merge_path_mismatch() {
        let mut earlier = PropertyDelta::add(path("email"), values(&["a"]));
        let err = earlier
            .merge(PropertyDelta::add(path("phone"), values(&["b"])))
            .unwrap_err();
        assert!(matches!(err, DeltaError::IncompatibleMerge { .. }));
    }

    #[test]
    fn test_item_delta_kind_mismatch() {
        let mut earlier = ItemDelta::add_property(path("assignment"), ["a"]);
        let err = earlier
            .merge(ItemDelta::add_container(
                path("assignment"),
                vec![ContainerValue::new()],
            ))
            .unwrap_err();
        assert!(matches!(err, DeltaError::IncompatibleMerge { .. }));
    }

    #[test]
    fn test_empty_replace_is_not_empty() {
        let delta = PropertyDelta::replace(path("email"), vec![]);
        assert!(!delta.is_empty());
        assert!(PropertyDelta::new(path("email")).is_empty());
    }

    #[test]
    fn test_apply_to_root_creates_and_removes() {
        let mut root = ContainerValue::new();
        ItemDelta::add_property(path("activation/administrativeStatus"), ["enabled"])
            .apply_to_root(&mut root)
            .unwrap();
        let item = find_item(&root, &path("activation/administrativeStatus"))
            .unwrap()
            .unwrap();
        assert_eq!(item.as_property().unwrap().values.len(), 1);

        ItemDelta::delete_property(path("activation/administrativeStatus"), ["enabled"])
            .apply_to_root(&mut root)
            .unwrap();
        assert!(find_item(&root, &path("activation/administrativeStatus"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_apply_kind_mismatch_is_schema_error() {
        let mut root = ContainerValue::new().with_property("assignment", "oops");
        let err = ItemDelta::add_container(path("assignment"), vec![ContainerValue::with_id(1)])
            .apply_to_root(&mut root)
            .unwrap_err();
        assert!(err.is_schema());
    }

    #[test]
    fn test_narrow_against_current() {
        let root = ContainerValue::new().with_property("email", "a");
        let delta =
            ItemDelta::Property(PropertyDelta::add_delete(path("email"), values(&["a", "b"]), values(&["c"])));
        let narrowed = delta.narrow(&root).unwrap();
        let narrowed = narrowed.as_property().unwrap();
        assert_eq!(strings(narrowed.values_to_add()), vec!["b"]);
        assert!(narrowed.values_to_delete().is_empty());

        let same = ItemDelta::replace_property(path("email"), ["a"]);
        assert!(same.narrow(&root).unwrap().is_empty());
    }

    #[test]
    fn test_container_delete_by_id() {
        let mut root = ContainerValue::new().with_container(
            "assignment",
            vec![
                ContainerValue::with_id(1).with_property("description", "a"),
                ContainerValue::with_id(2).with_property("description", "b"),
            ],
        );
        ItemDelta::delete_container(path("assignment"), vec![ContainerValue::with_id(1)])
            .apply_to_root(&mut root)
            .unwrap();
        let item = root.item("assignment").unwrap().as_container().unwrap();
        assert_eq!(item.values.len(), 1);
        assert_eq!(item.values[0].id, Some(2));
    }
}
