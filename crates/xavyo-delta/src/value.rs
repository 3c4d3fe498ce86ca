//! Item values.
//!
//! Every value has two notions of equality:
//! - *identity equality* (`PartialEq`), which includes value metadata;
//! - *real-value equality* ([`ItemValue::equals_real`]), which compares
//!   content only. Add/delete reconciliation always uses the latter.
//!
//! Container values may carry a stable numeric id. Values without an id are
//! reconciled by content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::item::{AnyItem, Item, ItemKind};
use crate::item_delta::{ItemDelta, TypedDelta};
use crate::object::IdentityObject;
use crate::types::{ObjectType, Oid};

// ============================================================================
// Scalars
// ============================================================================

/// A secret string (password). Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectedString(String);

impl ProtectedString {
    /// Wrap a clear-text secret.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the clear-text secret.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ProtectedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProtectedString(***)")
    }
}

/// Scalar content of a property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RealValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Protected(ProtectedString),
}

impl RealValue {
    /// String content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is an integer.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Timestamp content, if this is a timestamp.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Protected content, if this is a secret.
    #[must_use]
    pub fn as_protected(&self) -> Option<&ProtectedString> {
        match self {
            Self::Protected(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for RealValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Protected(_) => f.write_str("***"),
        }
    }
}

impl From<&str> for RealValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for RealValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for RealValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for RealValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for RealValue {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl From<ProtectedString> for RealValue {
    fn from(p: ProtectedString) -> Self {
        Self::Protected(p)
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueOrigin {
    /// Entered by a user or API caller.
    User,
    /// Produced by a template or outbound mapping.
    Mapping,
    /// Produced by an inbound mapping.
    Inbound,
    /// Produced by reconciliation.
    Reconciliation,
}

/// Transient value metadata. Ignored by real-value equality.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValueMetadata {
    /// Origin of the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ValueOrigin>,
    /// Name of the mapping that produced the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ValueMetadata {
    /// Metadata for a value produced by a named mapping.
    pub fn from_mapping(name: impl Into<String>) -> Self {
        Self {
            origin: Some(ValueOrigin::Mapping),
            source: Some(name.into()),
        }
    }
}

// ============================================================================
// Value kind capability
// ============================================================================

/// Capability shared by all value kinds so delta algorithms can be written
/// once and used for properties, references and containers.
pub trait ItemValue: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Kind of item holding values of this type.
    const KIND: ItemKind;

    /// Content equality, ignoring metadata (and container ids).
    fn equals_real(&self, other: &Self) -> bool;

    /// Whether two values denote the same set member when folding values
    /// into an add or replace set.
    fn matches(&self, other: &Self) -> bool {
        self.equals_real(other)
    }

    /// Whether this value, used in a delete set, removes `existing`.
    fn matches_for_removal(&self, existing: &Self) -> bool {
        self.matches(existing)
    }

    /// Whether an add of this value and a delete of `other` in the same
    /// add/delete set cancel each other out.
    fn cancels(&self, other: &Self) -> bool {
        self.equals_real(other)
    }

    /// Fold a later matching value into this one.
    fn absorb(&mut self, _later: Self) {}

    /// Wrap a typed item.
    fn into_any_item(item: Item<Self>) -> AnyItem;

    /// Borrow the typed item out of an untyped one.
    fn typed_item(item: &AnyItem) -> Option<&Item<Self>>;

    /// Mutably borrow the typed item out of an untyped one.
    fn typed_item_mut(item: &mut AnyItem) -> Option<&mut Item<Self>>;

    /// Wrap a typed delta.
    fn into_item_delta(delta: TypedDelta<Self>) -> ItemDelta;
}

pub(crate) fn contains_matching<V: ItemValue>(set: &[V], value: &V) -> bool {
    set.iter().any(|v| v.matches(value))
}

/// Add a value to a set; a matching member absorbs it instead.
pub(crate) fn add_or_absorb<V: ItemValue>(set: &mut Vec<V>, value: V) {
    match set.iter_mut().find(|v| v.matches(&value)) {
        Some(existing) => existing.absorb(value),
        None => set.push(value),
    }
}

/// Remove every member cancelled by `value`. Returns whether anything was
/// removed.
pub(crate) fn remove_cancelled<V: ItemValue>(set: &mut Vec<V>, value: &V) -> bool {
    let before = set.len();
    set.retain(|v| !v.cancels(value));
    set.len() != before
}

/// Order-insensitive real-value set equality.
pub(crate) fn sets_equal_real<V: ItemValue>(a: &[V], b: &[V]) -> bool {
    a.iter().all(|x| b.iter().any(|y| x.equals_real(y)))
        && b.iter().all(|y| a.iter().any(|x| x.equals_real(y)))
}

// ============================================================================
// Property values
// ============================================================================

/// A scalar value of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub value: RealValue,
    #[serde(default)]
    pub metadata: ValueMetadata,
}

impl PropertyValue {
    /// Create a property value without metadata.
    pub fn new(value: impl Into<RealValue>) -> Self {
        Self {
            value: value.into(),
            metadata: ValueMetadata::default(),
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: ValueMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl From<RealValue> for PropertyValue {
    fn from(value: RealValue) -> Self {
        Self::new(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl ItemValue for PropertyValue {
    const KIND: ItemKind = ItemKind::Property;

    fn equals_real(&self, other: &Self) -> bool {
        self.value == other.value
    }

    fn into_any_item(item: Item<Self>) -> AnyItem {
        AnyItem::Property(item)
    }

    fn typed_item(item: &AnyItem) -> Option<&Item<Self>> {
        match item {
            AnyItem::Property(p) => Some(p),
            _ => None,
        }
    }

    fn typed_item_mut(item: &mut AnyItem) -> Option<&mut Item<Self>> {
        match item {
            AnyItem::Property(p) => Some(p),
            _ => None,
        }
    }

    fn into_item_delta(delta: TypedDelta<Self>) -> ItemDelta {
        ItemDelta::Property(delta)
    }
}

// ============================================================================
// Reference values
// ============================================================================

/// A reference to another object, optionally embedding the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceValue {
    pub oid: Oid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<ObjectType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Box<IdentityObject>>,
    #[serde(default)]
    pub metadata: ValueMetadata,
}

impl ReferenceValue {
    /// Create a reference to the given object.
    #[must_use]
    pub fn new(oid: Oid, target_type: ObjectType) -> Self {
        Self {
            oid,
            target_type: Some(target_type),
            relation: None,
            object: None,
            metadata: ValueMetadata::default(),
        }
    }

    /// Set the relation qualifier.
    #[must_use]
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    /// Embed the target object.
    #[must_use]
    pub fn with_object(mut self, object: IdentityObject) -> Self {
        self.object = Some(Box::new(object));
        self
    }
}

impl ItemValue for ReferenceValue {
    const KIND: ItemKind = ItemKind::Reference;

    fn equals_real(&self, other: &Self) -> bool {
        let types_compatible = match (self.target_type, other.target_type) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        self.oid == other.oid && self.relation == other.relation && types_compatible
    }

    fn absorb(&mut self, later: Self) {
        if self.object.is_none() {
            self.object = later.object;
        }
        if self.target_type.is_none() {
            self.target_type = later.target_type;
        }
    }

    fn into_any_item(item: Item<Self>) -> AnyItem {
        AnyItem::Reference(item)
    }

    fn typed_item(item: &AnyItem) -> Option<&Item<Self>> {
        match item {
            AnyItem::Reference(r) => Some(r),
            _ => None,
        }
    }

    fn typed_item_mut(item: &mut AnyItem) -> Option<&mut Item<Self>> {
        match item {
            AnyItem::Reference(r) => Some(r),
            _ => None,
        }
    }

    fn into_item_delta(delta: TypedDelta<Self>) -> ItemDelta {
        ItemDelta::Reference(delta)
    }
}

// ============================================================================
// Container values
// ============================================================================

/// A nested collection of items, optionally identified by a stable id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub items: BTreeMap<String, AnyItem>,
    #[serde(default)]
    pub metadata: ValueMetadata,
}

impl ContainerValue {
    /// Create an empty container value without id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty container value with the given id.
    #[must_use]
    pub fn with_id(id: u64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Builder: set a single-valued property.
    #[must_use]
    pub fn with_property(mut self, name: &str, value: impl Into<RealValue>) -> Self {
        self.set_property(name, vec![PropertyValue::new(value)]);
        self
    }

    /// Builder: set a container item.
    #[must_use]
    pub fn with_container(mut self, name: &str, values: Vec<ContainerValue>) -> Self {
        self.items.insert(
            name.to_string(),
            AnyItem::Container(Item::with_values(name, values)),
        );
        self
    }

    /// Builder: set a reference item.
    #[must_use]
    pub fn with_reference(mut self, name: &str, values: Vec<ReferenceValue>) -> Self {
        self.items.insert(
            name.to_string(),
            AnyItem::Reference(Item::with_values(name, values)),
        );
        self
    }

    /// Replace the values of a property item.
    pub fn set_property(&mut self, name: &str, values: Vec<PropertyValue>) {
        if values.is_empty() {
            self.items.remove(name);
        } else {
            self.items.insert(
                name.to_string(),
                AnyItem::Property(Item::with_values(name, values)),
            );
        }
    }

    /// Find a direct child item.
    #[must_use]
    pub fn item(&self, name: &str) -> Option<&AnyItem> {
        self.items.get(name)
    }

    /// First value of a direct child property.
    #[must_use]
    pub fn property_value(&self, name: &str) -> Option<&RealValue> {
        self.items
            .get(name)
            .and_then(PropertyValue::typed_item)
            .and_then(|p| p.values.first())
            .map(|v| &v.value)
    }

    /// Whether the value holds no non-empty items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.values().all(AnyItem::is_empty)
    }

    /// Content equality ignoring ids and metadata. Empty items count as
    /// absent.
    #[must_use]
    pub fn content_equals(&self, other: &ContainerValue) -> bool {
        let names: std::collections::BTreeSet<&String> =
            self.items.keys().chain(other.items.keys()).collect();
        names
            .into_iter()
            .all(|name| match (self.items.get(name), other.items.get(name)) {
                (Some(a), Some(b)) => a.equals_real(b),
                (Some(only), None) | (None, Some(only)) => only.is_empty(),
                (None, None) => true,
            })
    }

    /// Drop empty items recursively.
    pub fn prune_empty(&mut self) {
        for item in self.items.values_mut() {
            if let AnyItem::Container(container) = item {
                for value in &mut container.values {
                    value.prune_empty();
                }
            }
        }
        self.items.retain(|_, item| !item.is_empty());
    }
}

impl ItemValue for ContainerValue {
    const KIND: ItemKind = ItemKind::Container;

    fn equals_real(&self, other: &Self) -> bool {
        self.content_equals(other)
    }

    /// Ids decide when both values carry one; values without ids match by
    /// content; an id-bearing value never matches an id-less one.
    fn matches(&self, other: &Self) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.content_equals(other),
            _ => false,
        }
    }

    /// Same content, and the same id when both values carry one.
    fn cancels(&self, other: &Self) -> bool {
        let ids_agree = match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        ids_agree && self.content_equals(other)
    }

    /// Delete by id when both sides have one, otherwise by content.
    fn matches_for_removal(&self, existing: &Self) -> bool {
        match (self.id, existing.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.content_equals(existing),
        }
    }

    /// Later items overwrite earlier items of the same name.
    fn absorb(&mut self, later: Self) {
        if self.id.is_none() {
            self.id = later.id;
        }
        for (name, item) in later.items {
            self.items.insert(name, item);
        }
        self.metadata = later.metadata;
    }

    fn into_any_item(item: Item<Self>) -> AnyItem {
        AnyItem::Container(item)
    }

    fn typed_item(item: &AnyItem) -> Option<&Item<Self>> {
        match item {
            AnyItem::Container(c) => Some(c),
            _ => None,
        }
    }

    fn typed_item_mut(item: &mut AnyItem) -> Option<&mut Item<Self>> {
        match item {
            AnyItem::Container(c) => Some(c),
            _ => None,
        }
    }

    fn into_item_delta(delta: TypedDelta<Self>) -> ItemDelta {
        ItemDelta::Container(delta)
    }
}
