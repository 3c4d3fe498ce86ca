//! Identity object snapshots.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::item::{find_item, AnyItem};
use crate::path::ItemPath;
use crate::value::{ContainerValue, PropertyValue, RealValue, ReferenceValue};
use crate::types::{ObjectType, Oid};

/// Well-known item names.
pub mod names {
    pub const NAME: &str = "name";
    pub const ITERATION: &str = "iteration";
    pub const ITERATION_TOKEN: &str = "iterationToken";
    pub const ACTIVATION: &str = "activation";
    pub const ADMINISTRATIVE_STATUS: &str = "administrativeStatus";
    pub const EFFECTIVE_STATUS: &str = "effectiveStatus";
    pub const VALIDITY_STATUS: &str = "validityStatus";
    pub const VALID_FROM: &str = "validFrom";
    pub const VALID_TO: &str = "validTo";
    pub const CREDENTIALS: &str = "credentials";
    pub const PASSWORD: &str = "password";
    pub const VALUE: &str = "value";
    pub const ASSIGNMENT: &str = "assignment";
    pub const ATTRIBUTES: &str = "attributes";
    pub const RESOURCE_REF: &str = "resourceRef";
    pub const OWNER_REF: &str = "ownerRef";
    pub const KIND: &str = "kind";
    pub const INTENT: &str = "intent";
}

/// A snapshot of an identity object: a freestanding owned tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<Oid>,
    pub object_type: ObjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default)]
    pub root: ContainerValue,
}

impl IdentityObject {
    /// Create an empty object of the given type.
    #[must_use]
    pub fn new(object_type: ObjectType) -> Self {
        Self {
            oid: None,
            object_type,
            version: None,
            root: ContainerValue::new(),
        }
    }

    /// Builder: set the oid.
    #[must_use]
    pub fn with_oid(mut self, oid: Oid) -> Self {
        self.oid = Some(oid);
        self
    }

    /// Builder: set a single-valued top-level property.
    #[must_use]
    pub fn with_property(mut self, name: &str, value: impl Into<RealValue>) -> Self {
        self.root = self.root.with_property(name, value);
        self
    }

    /// Builder: set a top-level container item.
    #[must_use]
    pub fn with_container(mut self, name: &str, values: Vec<ContainerValue>) -> Self {
        self.root = self.root.with_container(name, values);
        self
    }

    /// Builder: set a top-level reference item.
    #[must_use]
    pub fn with_reference(mut self, name: &str, values: Vec<ReferenceValue>) -> Self {
        self.root = self.root.with_reference(name, values);
        self
    }

    /// Object name (first value of the `name` property).
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.root.property_value(names::NAME).and_then(RealValue::as_str)
    }

    /// Find an item by path.
    ///
    /// # Errors
    ///
    /// Returns a schema error for malformed or ambiguous paths.
    pub fn find_item(&self, path: &ItemPath) -> Result<Option<&AnyItem>> {
        find_item(&self.root, path)
    }

    /// Values of the property at `path` (empty if absent or not a property).
    ///
    /// # Errors
    ///
    /// Returns a schema error for malformed or ambiguous paths.
    pub fn property_values(&self, path: &ItemPath) -> Result<Vec<PropertyValue>> {
        Ok(self
            .find_item(path)?
            .and_then(AnyItem::as_property)
            .map(|p| p.values.clone())
            .unwrap_or_default())
    }

    /// First real value of the property at `path`.
    ///
    /// # Errors
    ///
    /// Returns a schema error for malformed or ambiguous paths.
    pub fn property_value(&self, path: &ItemPath) -> Result<Option<RealValue>> {
        Ok(self
            .property_values(path)?
            .into_iter()
            .next()
            .map(|v| v.value))
    }

    /// Real-value equality: same oid, type and content.
    #[must_use]
    pub fn equals_real(&self, other: &IdentityObject) -> bool {
        self.oid == other.oid
            && self.object_type == other.object_type
            && self.root.content_equals(&other.root)
    }

    /// Human-readable identity used in diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match (self.name(), self.oid) {
            (Some(name), Some(oid)) => format!("{} '{name}' ({oid})", self.object_type),
            (Some(name), None) => format!("{} '{name}'", self.object_type),
            (None, Some(oid)) => format!("{} {oid}", self.object_type),
            (None, None) => format!("new {}", self.object_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_describe() {
        let oid = Oid::new();
        let user = IdentityObject::new(ObjectType::User)
            .with_oid(oid)
            .with_property(names::NAME, "jack");
        assert_eq!(user.name(), Some("jack"));
        assert_eq!(user.describe(), format!("user 'jack' ({oid})"));
        assert_eq!(IdentityObject::new(ObjectType::Role).describe(), "new role");
    }

    #[test]
    fn test_property_value_lookup() {
        let user = IdentityObject::new(ObjectType::User).with_container(
            names::ACTIVATION,
            vec![ContainerValue::new().with_property(names::ADMINISTRATIVE_STATUS, "disabled")],
        );
        let path = ItemPath::from_names([names::ACTIVATION, names::ADMINISTRATIVE_STATUS]);
        assert_eq!(
            user.property_value(&path).unwrap(),
            Some(RealValue::from("disabled"))
        );
        assert!(user
            .property_value(&ItemPath::name("missing"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_equals_real_ignores_metadata_and_order() {
        let a = IdentityObject::new(ObjectType::User)
            .with_property("email", "a@example.com")
            .with_property(names::NAME, "jack");
        let mut b = a.clone();
        b.version = Some(3);
        assert!(a.equals_real(&b));
        assert!(!a.equals_real(&b.with_property(names::NAME, "jill")));
    }

    #[test]
    fn test_serde_roundtrip() {
        let user = IdentityObject::new(ObjectType::User)
            .with_oid(Oid::new())
            .with_property(names::NAME, "jack")
            .with_container("assignment", vec![ContainerValue::with_id(1)]);
        let json = serde_json::to_string(&user).unwrap();
        let back: IdentityObject = serde_json::from_str(&json).unwrap();
        assert_eq!(user, back);
    }
}
