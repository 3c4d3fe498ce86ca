//! Items and tree navigation.
//!
//! An item is a named set of values of one kind. Containers nest further
//! items, so an object is a tree that [`ItemPath`]s walk segment by segment.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::fmt;

use crate::error::{DeltaError, Result};
use crate::path::{ItemPath, PathSegment};
use crate::value::{
    add_or_absorb, sets_equal_real, ContainerValue, ItemValue, PropertyValue, ReferenceValue,
};

/// Kind of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Property,
    Reference,
    Container,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property => write!(f, "property"),
            Self::Reference => write!(f, "reference"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// A named set of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "V: Deserialize<'de>"))]
pub struct Item<V> {
    pub name: String,
    #[serde(default)]
    pub values: Vec<V>,
}

/// Item of scalar values.
pub type Property = Item<PropertyValue>;
/// Item of references.
pub type Reference = Item<ReferenceValue>;
/// Item of nested container values.
pub type Container = Item<ContainerValue>;

impl<V: ItemValue> Item<V> {
    /// Create an empty item.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// Create an item holding the given values (deduplicated).
    pub fn with_values(name: impl Into<String>, values: Vec<V>) -> Self {
        let mut item = Self::new(name);
        for value in values {
            item.add_value(value);
        }
        item
    }

    /// Whether the item has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Add a value. A matching value absorbs it instead of duplicating.
    pub fn add_value(&mut self, value: V) {
        add_or_absorb(&mut self.values, value);
    }

    /// Remove every value that `value` removes. Returns whether anything
    /// was removed.
    pub fn remove_value(&mut self, value: &V) -> bool {
        let before = self.values.len();
        self.values.retain(|existing| !value.matches_for_removal(existing));
        self.values.len() != before
    }

    /// Whether a real-value-equal value is present.
    #[must_use]
    pub fn contains_real(&self, value: &V) -> bool {
        self.values.iter().any(|v| v.equals_real(value))
    }

    /// Order-insensitive real-value equality of the value sets.
    #[must_use]
    pub fn equals_real(&self, other: &Item<V>) -> bool {
        self.name == other.name && sets_equal_real(&self.values, &other.values)
    }
}

/// An item of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnyItem {
    Property(Property),
    Reference(Reference),
    Container(Container),
}

impl AnyItem {
    /// Item name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Property(i) => &i.name,
            Self::Reference(i) => &i.name,
            Self::Container(i) => &i.name,
        }
    }

    /// Item kind.
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Property(_) => ItemKind::Property,
            Self::Reference(_) => ItemKind::Reference,
            Self::Container(_) => ItemKind::Container,
        }
    }

    /// Whether the item has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Property(i) => i.is_empty(),
            Self::Reference(i) => i.is_empty(),
            Self::Container(i) => i.is_empty(),
        }
    }

    /// Real-value equality; items of different kinds are never equal.
    #[must_use]
    pub fn equals_real(&self, other: &AnyItem) -> bool {
        match (self, other) {
            (Self::Property(a), Self::Property(b)) => a.equals_real(b),
            (Self::Reference(a), Self::Reference(b)) => a.equals_real(b),
            (Self::Container(a), Self::Container(b)) => a.equals_real(b),
            _ => false,
        }
    }

    /// Borrow as a property.
    #[must_use]
    pub fn as_property(&self) -> Option<&Property> {
        PropertyValue::typed_item(self)
    }

    /// Borrow as a reference.
    #[must_use]
    pub fn as_reference(&self) -> Option<&Reference> {
        ReferenceValue::typed_item(self)
    }

    /// Borrow as a container.
    #[must_use]
    pub fn as_container(&self) -> Option<&Container> {
        ContainerValue::typed_item(self)
    }
}

// ============================================================================
// Navigation
// ============================================================================

fn render(segments: &[PathSegment]) -> String {
    ItemPath::from_segments(segments.to_vec()).to_string()
}

/// Split off a leading `Name [Id]` pair.
fn split_step(segments: &[PathSegment]) -> Result<Option<(&str, Option<u64>, &[PathSegment])>> {
    let Some((first, rest)) = segments.split_first() else {
        return Ok(None);
    };
    let PathSegment::Name(name) = first else {
        return Err(DeltaError::schema(format!(
            "Expected an item name at '{}'",
            render(segments)
        )));
    };
    match rest.split_first() {
        Some((PathSegment::Id(id), tail)) => Ok(Some((name, Some(*id), tail))),
        Some((PathSegment::Wildcard, _)) => Err(DeltaError::schema(format!(
            "Wildcard cannot be used to navigate to '{}'",
            render(segments)
        ))),
        _ => Ok(Some((name, None, rest))),
    }
}

/// Pick the container value addressed by an optional id.
fn select_index(
    container: &Container,
    id: Option<u64>,
    segments: &[PathSegment],
) -> Result<Option<usize>> {
    match id {
        Some(id) => Ok(container.values.iter().position(|v| v.id == Some(id))),
        None => match container.values.len() {
            0 => Ok(None),
            1 => Ok(Some(0)),
            n => Err(DeltaError::ambiguous_path(
                render(segments),
                format!("container '{}' has {n} values and no id was given", container.name),
            )),
        },
    }
}

/// Walk to the container value addressed by `segments`.
///
/// # Errors
///
/// Returns a schema error for malformed segments or non-container items on
/// the way, and an ambiguous path error for multi-valued containers without
/// an id.
pub fn find_container_value<'a>(
    value: &'a ContainerValue,
    segments: &[PathSegment],
) -> Result<Option<&'a ContainerValue>> {
    let Some((name, id, rest)) = split_step(segments)? else {
        return Ok(Some(value));
    };
    let Some(item) = value.items.get(name) else {
        return Ok(None);
    };
    let AnyItem::Container(container) = item else {
        return Err(DeltaError::schema(format!(
            "Item '{name}' is a {}, not a container",
            item.kind()
        )));
    };
    match select_index(container, id, segments)? {
        Some(index) => find_container_value(&container.values[index], rest),
        None => Ok(None),
    }
}

/// Mutable variant of [`find_container_value`]; never creates anything.
///
/// # Errors
///
/// Same as [`find_container_value`].
pub fn find_container_value_mut<'a>(
    value: &'a mut ContainerValue,
    segments: &[PathSegment],
) -> Result<Option<&'a mut ContainerValue>> {
    let Some((name, id, rest)) = split_step(segments)? else {
        return Ok(Some(value));
    };
    let Some(item) = value.items.get_mut(name) else {
        return Ok(None);
    };
    let kind = item.kind();
    let AnyItem::Container(container) = item else {
        return Err(DeltaError::schema(format!(
            "Item '{name}' is a {kind}, not a container"
        )));
    };
    match select_index(container, id, segments)? {
        Some(index) => find_container_value_mut(&mut container.values[index], rest),
        None => Ok(None),
    }
}

/// Walk to the container value addressed by `segments`, creating missing
/// containers and values on the way.
///
/// # Errors
///
/// Same as [`find_container_value`].
pub fn find_or_create_container_value<'a>(
    value: &'a mut ContainerValue,
    segments: &[PathSegment],
) -> Result<&'a mut ContainerValue> {
    let Some((name, id, rest)) = split_step(segments)? else {
        return Ok(value);
    };
    let item = match value.items.entry(name.to_string()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => entry.insert(AnyItem::Container(Container::new(name))),
    };
    let kind = item.kind();
    let AnyItem::Container(container) = item else {
        return Err(DeltaError::schema(format!(
            "Item '{name}' is a {kind}, not a container"
        )));
    };
    let index = match select_index(container, id, segments)? {
        Some(index) => index,
        None => {
            container.values.push(match id {
                Some(id) => ContainerValue::with_id(id),
                None => ContainerValue::new(),
            });
            container.values.len() - 1
        }
    };
    find_or_create_container_value(&mut container.values[index], rest)
}

/// Find the item addressed by `path` below `root`.
///
/// # Errors
///
/// Same as [`find_container_value`].
pub fn find_item<'a>(root: &'a ContainerValue, path: &ItemPath) -> Result<Option<&'a AnyItem>> {
    let (parent, name) = path.split_item_name()?;
    Ok(find_container_value(root, parent)?.and_then(|v| v.items.get(name)))
}
