//! Structural diff of two object snapshots.

use std::collections::BTreeSet;

use crate::error::{DeltaError, Result};
use crate::item::{AnyItem, Item};
use crate::item_delta::{ItemDelta, TypedDelta};
use crate::object::IdentityObject;
use crate::object_delta::ObjectDelta;
use crate::path::ItemPath;
use crate::value::{ContainerValue, ItemValue};

impl ObjectDelta {
    /// Compute the MODIFY delta turning `old` into `new`.
    ///
    /// Applying the result to a clone of `old` yields an object real-value
    /// equal to `new`.
    ///
    /// # Errors
    ///
    /// Returns an illegal state error if the objects have different types or
    /// oids (or neither has an oid), and a schema error if an item changes
    /// kind.
    pub fn diff(old: &IdentityObject, new: &IdentityObject) -> Result<ObjectDelta> {
        diff(old, new)
    }
}

/// See [`ObjectDelta::diff`].
///
/// # Errors
///
/// See [`ObjectDelta::diff`].
pub fn diff(old: &IdentityObject, new: &IdentityObject) -> Result<ObjectDelta> {
    if old.object_type != new.object_type {
        return Err(DeltaError::illegal_state(format!(
            "cannot diff {} against {}",
            old.describe(),
            new.describe()
        )));
    }
    let oid = match (old.oid, new.oid) {
        (Some(a), Some(b)) if a != b => {
            return Err(DeltaError::illegal_state(format!(
                "cannot diff objects with different oids {a} and {b}"
            )));
        }
        (Some(oid), _) | (None, Some(oid)) => oid,
        (None, None) => {
            return Err(DeltaError::illegal_state(
                "cannot diff objects without an oid",
            ));
        }
    };

    let mut modifications = Vec::new();
    diff_container(&ItemPath::empty(), &old.root, &new.root, &mut modifications)?;
    ObjectDelta::modify_with(old.object_type, oid, modifications)
}

fn diff_container(
    prefix: &ItemPath,
    old: &ContainerValue,
    new: &ContainerValue,
    out: &mut Vec<ItemDelta>,
) -> Result<()> {
    let names: BTreeSet<&String> = old.items.keys().chain(new.items.keys()).collect();
    for name in names {
        let path = prefix.child(name.as_str());
        let old_item = old.items.get(name).filter(|i| !i.is_empty());
        let new_item = new.items.get(name).filter(|i| !i.is_empty());
        match (old_item, new_item) {
            (None, None) => {}
            (Some(AnyItem::Property(a)), Some(AnyItem::Property(b))) => {
                push_set_diff(&path, &a.values, &b.values, out);
            }
            (Some(AnyItem::Reference(a)), Some(AnyItem::Reference(b))) => {
                push_set_diff(&path, &a.values, &b.values, out);
            }
            (Some(AnyItem::Container(a)), Some(AnyItem::Container(b))) => {
                diff_container_values(&path, a, b, out)?;
            }
            (Some(a), Some(b)) => {
                return Err(DeltaError::schema(format!(
                    "Item '{path}' changed kind from {} to {}",
                    a.kind(),
                    b.kind()
                )));
            }
            (Some(item), None) => out.push(clear_item(&path, item)),
            (None, Some(item)) => out.push(fill_item(&path, item)),
        }
    }
    Ok(())
}

fn push_set_diff<V: ItemValue>(path: &ItemPath, old: &[V], new: &[V], out: &mut Vec<ItemDelta>) {
    let add: Vec<V> = new
        .iter()
        .filter(|v| !old.iter().any(|o| o.equals_real(v)))
        .cloned()
        .collect();
    let delete: Vec<V> = old
        .iter()
        .filter(|v| !new.iter().any(|n| n.equals_real(v)))
        .cloned()
        .collect();
    if !add.is_empty() || !delete.is_empty() {
        out.push(TypedDelta::add_delete(path.clone(), add, delete).into());
    }
}

fn diff_container_values(
    path: &ItemPath,
    old: &Item<ContainerValue>,
    new: &Item<ContainerValue>,
    out: &mut Vec<ItemDelta>,
) -> Result<()> {
    if let ([a], [b]) = (old.values.as_slice(), new.values.as_slice()) {
        if a.id.is_none() && b.id.is_none() {
            return diff_container(path, a, b, out);
        }
    }

    let mut add = Vec::new();
    let mut delete = Vec::new();
    for value in &new.values {
        match value.id {
            Some(id) => match old.values.iter().find(|o| o.id == Some(id)) {
                Some(existing) => diff_container(&path.with_id(id), existing, value, out)?,
                None => add.push(value.clone()),
            },
            None => {
                if !old
                    .values
                    .iter()
                    .any(|o| o.id.is_none() && o.content_equals(value))
                {
                    add.push(value.clone());
                }
            }
        }
    }
    for value in &old.values {
        let kept = match value.id {
            Some(id) => new.values.iter().any(|n| n.id == Some(id)),
            None => new
                .values
                .iter()
                .any(|n| n.id.is_none() && n.content_equals(value)),
        };
        if !kept {
            delete.push(match value.id {
                Some(id) => ContainerValue::with_id(id),
                None => value.clone(),
            });
        }
    }
    if !add.is_empty() || !delete.is_empty() {
        out.push(TypedDelta::add_delete(path.clone(), add, delete).into());
    }
    Ok(())
}

fn clear_item(path: &ItemPath, item: &AnyItem) -> ItemDelta {
    match item {
        AnyItem::Property(p) => TypedDelta::delete(path.clone(), p.values.clone()).into(),
        AnyItem::Reference(r) => TypedDelta::delete(path.clone(), r.values.clone()).into(),
        AnyItem::Container(c) => TypedDelta::delete(path.clone(), c.values.clone()).into(),
    }
}

fn fill_item(path: &ItemPath, item: &AnyItem) -> ItemDelta {
    match item {
        AnyItem::Property(p) => TypedDelta::add(path.clone(), p.values.clone()).into(),
        AnyItem::Reference(r) => TypedDelta::add(path.clone(), r.values.clone()).into(),
        AnyItem::Container(c) => TypedDelta::add(path.clone(), c.values.clone()).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::names;
    use crate::types::{ObjectType, Oid};
    use crate::value::{ReferenceValue, RealValue};

    fn base(oid: Oid) -> IdentityObject {
        IdentityObject::new(ObjectType::User)
            .with_oid(oid)
            .with_property(names::NAME, "jack")
            .with_property("email", "jack@example.com")
            .with_container(
                names::ACTIVATION,
                vec![ContainerValue::new()
                    .with_property(names::ADMINISTRATIVE_STATUS, "enabled")
                    .with_property(names::VALID_FROM, "2024-01-01")],
            )
            .with_container(
                names::ASSIGNMENT,
                vec![
                    ContainerValue::with_id(1).with_property("description", "first"),
                    ContainerValue::with_id(2).with_property("description", "second"),
                ],
            )
    }

    fn assert_round_trip(old: &IdentityObject, new: &IdentityObject) {
        let delta = diff(old, new).unwrap();
        let mut applied = old.clone();
        delta.apply_to(&mut applied).unwrap();
        assert!(
            applied.equals_real(new),
            "round trip failed:\n{applied:#?}\nvs\n{new:#?}\nwith {delta:#?}"
        );
    }

    #[test]
    fn test_identical_objects_give_empty_delta() {
        let old = base(Oid::new());
        let delta = diff(&old, &old.clone()).unwrap();
        assert!(delta.is_modify());
        assert!(delta.is_empty());
    }

    #[test]
    fn test_round_trip_properties_and_containers() {
        let oid = Oid::new();
        let old = base(oid);

        let new = base(oid)
            .with_property("email", "jack@corp.example.com")
            .with_property("phone", "555")
            .with_container(
                names::ACTIVATION,
                vec![ContainerValue::new().with_property(names::ADMINISTRATIVE_STATUS, "disabled")],
            )
            .with_container(
                names::ASSIGNMENT,
                vec![
                    ContainerValue::with_id(2).with_property("description", "changed"),
                    ContainerValue::with_id(3).with_property("description", "third"),
                    ContainerValue::new().with_property("description", "no id"),
                ],
            );
        assert_round_trip(&old, &new);

        let delta = diff(&old, &new).unwrap();
        let nested: ItemPath = "assignment/[2]/description".parse().unwrap();
        assert!(delta.has_item_delta(&nested));
        let status: ItemPath = "activation/administrativeStatus".parse().unwrap();
        assert!(delta.has_item_delta(&status));
    }

    #[test]
    fn test_round_trip_removed_items() {
        let oid = Oid::new();
        let old = base(oid);
        let mut new = base(oid);
        new.root.items.remove(names::ACTIVATION);
        new.root.items.remove("email");
        assert_round_trip(&old, &new);
    }

    #[test]
    fn test_round_trip_references() {
        let oid = Oid::new();
        let role = Oid::new();
        let old = base(oid);
        let new = base(oid).with_reference(
            "roleMembershipRef",
            vec![ReferenceValue::new(role, ObjectType::Role)],
        );
        assert_round_trip(&old, &new);
        assert_round_trip(&new, &old);
    }

    #[test]
    fn test_kind_change_is_schema_error() {
        let oid = Oid::new();
        let old = base(oid);
        let new = base(oid).with_container("email", vec![ContainerValue::with_id(1)]);
        assert!(diff(&old, &new).unwrap_err().is_schema());
    }

    #[test]
    fn test_diff_requires_oid() {
        let old = IdentityObject::new(ObjectType::User).with_property(names::NAME, "a");
        let new = old.clone().with_property(names::NAME, "b");
        assert!(diff(&old, &new).unwrap_err().is_illegal_state());

        let new = new.with_oid(Oid::new());
        let delta = ObjectDelta::diff(&old, &new).unwrap();
        let changed = delta.compute_changed_object(Some(&old)).unwrap().unwrap();
        assert_eq!(
            changed.property_value(&ItemPath::name(names::NAME)).unwrap(),
            Some(RealValue::from("b"))
        );
    }
}
