//! Object deltas.
//!
//! An object delta is either an ADD carrying the full new object, a MODIFY
//! carrying item deltas (unique by path, merged on insert), or a DELETE.
//! The variants make the structural invariants unrepresentable: an ADD has
//! no modifications and a DELETE has neither modifications nor an object.
//!
//! # Merge table (earlier ⊕ later)
//!
//! | earlier | later  | result                                  |
//! |---------|--------|-----------------------------------------|
//! | ADD     | ADD    | error                                   |
//! | ADD     | MODIFY | ADD with the modifications applied      |
//! | ADD     | DELETE | DELETE                                  |
//! | MODIFY  | ADD    | error                                   |
//! | MODIFY  | MODIFY | item-by-item merge                      |
//! | MODIFY  | DELETE | DELETE                                  |
//! | DELETE  | ADD    | ADD of the later object                 |
//! | DELETE  | other  | unchanged                               |

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DeltaError, Result};
use crate::item_delta::ItemDelta;
use crate::object::IdentityObject;
use crate::path::ItemPath;
use crate::types::{ObjectType, Oid};

/// Kind of object change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Modify => write!(f, "modify"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Payload of an object delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change_type", rename_all = "snake_case")]
pub enum ObjectChange {
    Add { object: Box<IdentityObject> },
    Modify { modifications: Vec<ItemDelta> },
    Delete,
}

/// A change to a whole object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDelta {
    object_type: ObjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    oid: Option<Oid>,
    change: ObjectChange,
}

impl ObjectDelta {
    /// Create an ADD delta. The oid is taken from the object.
    #[must_use]
    pub fn add(object: IdentityObject) -> Self {
        Self {
            object_type: object.object_type,
            oid: object.oid,
            change: ObjectChange::Add {
                object: Box::new(object),
            },
        }
    }

    /// Create an empty MODIFY delta.
    #[must_use]
    pub fn modify(object_type: ObjectType, oid: Oid) -> Self {
        Self {
            object_type,
            oid: Some(oid),
            change: ObjectChange::Modify {
                modifications: Vec::new(),
            },
        }
    }

    /// Create a MODIFY delta holding the given modifications.
    ///
    /// # Errors
    ///
    /// Returns an error if two modifications of the same path cannot be
    /// merged.
    pub fn modify_with(
        object_type: ObjectType,
        oid: Oid,
        modifications: impl IntoIterator<Item = ItemDelta>,
    ) -> Result<Self> {
        let mut delta = Self::modify(object_type, oid);
        for modification in modifications {
            delta.add_modification(modification)?;
        }
        Ok(delta)
    }

    /// Create a DELETE delta.
    #[must_use]
    pub fn delete(object_type: ObjectType, oid: Oid) -> Self {
        Self {
            object_type,
            oid: Some(oid),
            change: ObjectChange::Delete,
        }
    }

    /// Object type.
    #[must_use]
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Target oid.
    #[must_use]
    pub fn oid(&self) -> Option<Oid> {
        self.oid
    }

    /// Set the target oid (also on the ADD snapshot).
    pub fn set_oid(&mut self, oid: Oid) {
        self.oid = Some(oid);
        if let ObjectChange::Add { object } = &mut self.change {
            object.oid = Some(oid);
        }
    }

    /// Change payload.
    #[must_use]
    pub fn change(&self) -> &ObjectChange {
        &self.change
    }

    /// Change type.
    #[must_use]
    pub fn change_type(&self) -> ChangeType {
        match self.change {
            ObjectChange::Add { .. } => ChangeType::Add,
            ObjectChange::Modify { .. } => ChangeType::Modify,
            ObjectChange::Delete => ChangeType::Delete,
        }
    }

    #[must_use]
    pub fn is_add(&self) -> bool {
        self.change_type() == ChangeType::Add
    }

    #[must_use]
    pub fn is_modify(&self) -> bool {
        self.change_type() == ChangeType::Modify
    }

    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.change_type() == ChangeType::Delete
    }

    /// Object carried by an ADD delta.
    #[must_use]
    pub fn object_to_add(&self) -> Option<&IdentityObject> {
        match &self.change {
            ObjectChange::Add { object } => Some(object),
            _ => None,
        }
    }

    /// Modifications of a MODIFY delta (empty otherwise).
    #[must_use]
    pub fn modifications(&self) -> &[ItemDelta] {
        match &self.change {
            ObjectChange::Modify { modifications } => modifications,
            _ => &[],
        }
    }

    /// Consume into the modification list (empty for ADD/DELETE).
    #[must_use]
    pub fn into_modifications(self) -> Vec<ItemDelta> {
        match self.change {
            ObjectChange::Modify { modifications } => modifications,
            _ => Vec::new(),
        }
    }

    /// A MODIFY delta with no effective modification. ADD and DELETE are
    /// never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.change {
            ObjectChange::Modify { modifications } => modifications.iter().all(ItemDelta::is_empty),
            _ => false,
        }
    }

    /// Find the modification addressing exactly `path`.
    #[must_use]
    pub fn find_item_delta(&self, path: &ItemPath) -> Option<&ItemDelta> {
        self.modifications()
            .iter()
            .find(|d| d.path().is_equivalent(path))
    }

    /// Whether a modification addresses exactly `path`.
    #[must_use]
    pub fn has_item_delta(&self, path: &ItemPath) -> bool {
        self.find_item_delta(path).is_some_and(|d| !d.is_empty())
    }

    /// Whether any modification touches `path`, a parent or a child of it.
    /// For ADD deltas, whether the new object has the item.
    #[must_use]
    pub fn has_related_delta(&self, path: &ItemPath) -> bool {
        match &self.change {
            ObjectChange::Add { object } => matches!(object.find_item(path), Ok(Some(_))),
            ObjectChange::Modify { modifications } => modifications
                .iter()
                .any(|d| !d.is_empty() && d.path().is_related(path)),
            ObjectChange::Delete => false,
        }
    }

    /// Paths changed by a MODIFY delta.
    #[must_use]
    pub fn changed_paths(&self) -> Vec<&ItemPath> {
        self.modifications()
            .iter()
            .filter(|d| !d.is_empty())
            .map(ItemDelta::path)
            .collect()
    }

    /// Add a modification to a MODIFY delta, merging with an existing
    /// modification of the same path.
    ///
    /// # Errors
    ///
    /// Returns an illegal state error for ADD and DELETE deltas.
    pub fn add_modification(&mut self, delta: ItemDelta) -> Result<()> {
        match &mut self.change {
            ObjectChange::Modify { modifications } => {
                match modifications
                    .iter_mut()
                    .find(|d| d.path().is_equivalent(delta.path()))
                {
                    Some(existing) => existing.merge(delta),
                    None => {
                        modifications.push(delta);
                        Ok(())
                    }
                }
            }
            ObjectChange::Add { .. } => Err(DeltaError::illegal_state(format!(
                "cannot add modification of '{}' to an ADD delta",
                delta.path()
            ))),
            ObjectChange::Delete => Err(DeltaError::illegal_state(format!(
                "cannot add modification of '{}' to a DELETE delta",
                delta.path()
            ))),
        }
    }

    /// Fold an item delta directly into this delta: merged into the
    /// modification list of a MODIFY, or applied to the snapshot of an ADD.
    /// Container values are matched by id when present, else by content, and
    /// merged rather than duplicated.
    ///
    /// # Errors
    ///
    /// Returns an illegal state error for DELETE deltas and schema errors
    /// when the delta cannot be applied to an ADD snapshot.
    pub fn swallow(&mut self, delta: ItemDelta) -> Result<()> {
        match &mut self.change {
            ObjectChange::Add { object } => delta.apply_to_root(&mut object.root),
            ObjectChange::Modify { .. } => self.add_modification(delta),
            ObjectChange::Delete => Err(DeltaError::illegal_state(format!(
                "cannot swallow modification of '{}' into a DELETE delta",
                delta.path()
            ))),
        }
    }

    /// Remove modifications addressing `path`. Returns whether any was
    /// removed.
    pub fn subtract(&mut self, path: &ItemPath) -> bool {
        match &mut self.change {
            ObjectChange::Modify { modifications } => {
                let before = modifications.len();
                modifications.retain(|d| !d.path().is_equivalent(path));
                modifications.len() != before
            }
            _ => false,
        }
    }

    /// Prune empty modifications (MODIFY) or empty items (ADD).
    pub fn normalize(&mut self) {
        match &mut self.change {
            ObjectChange::Modify { modifications } => modifications.retain(|d| !d.is_empty()),
            ObjectChange::Add { object } => object.root.prune_empty(),
            ObjectChange::Delete => {}
        }
    }

    fn check_same_target(&self, other: &ObjectDelta) -> Result<()> {
        if self.object_type != other.object_type {
            return Err(DeltaError::incompatible_merge(format!(
                "cannot merge {} delta into {} delta",
                other.object_type, self.object_type
            )));
        }
        if let (Some(a), Some(b)) = (self.oid, other.oid) {
            if a != b {
                return Err(DeltaError::incompatible_merge(format!(
                    "cannot merge delta for {b} into delta for {a}"
                )));
            }
        }
        Ok(())
    }

    /// Merge a chronologically later delta into this one.
    ///
    /// # Errors
    ///
    /// Returns an incompatible merge error for ADD⊕ADD, MODIFY⊕ADD and
    /// deltas of different targets. On error `self` is left unchanged.
    pub fn merge(&mut self, later: ObjectDelta) -> Result<()> {
        self.check_same_target(&later)?;
        match (&self.change, &later.change) {
            (ObjectChange::Add { .. }, ObjectChange::Add { .. }) => {
                return Err(DeltaError::incompatible_merge(
                    "cannot merge two ADD deltas of the same object",
                ));
            }
            (ObjectChange::Modify { .. }, ObjectChange::Add { .. }) => {
                return Err(DeltaError::incompatible_merge(
                    "cannot merge an ADD delta into a MODIFY delta",
                ));
            }
            (ObjectChange::Delete, ObjectChange::Modify { .. } | ObjectChange::Delete) => {
                return Ok(());
            }
            _ => {}
        }

        let later_oid = later.oid;
        match later.change {
            ObjectChange::Delete => {
                self.change = ObjectChange::Delete;
            }
            ObjectChange::Add { object } => {
                self.change = ObjectChange::Add { object };
                self.oid = later_oid.or(self.oid);
                return Ok(());
            }
            ObjectChange::Modify { modifications } => {
                let mut staged = self.clone();
                for modification in modifications {
                    staged.swallow(modification)?;
                }
                *self = staged;
            }
        }
        self.oid = self.oid.or(later_oid);
        Ok(())
    }

    /// Left-fold merge of chronologically ordered deltas.
    ///
    /// # Errors
    ///
    /// Propagates merge errors.
    pub fn summarize(deltas: impl IntoIterator<Item = ObjectDelta>) -> Result<Option<ObjectDelta>> {
        let mut iter = deltas.into_iter();
        let Some(mut acc) = iter.next() else {
            return Ok(None);
        };
        for delta in iter {
            acc.merge(delta)?;
        }
        Ok(Some(acc))
    }

    /// Combine unordered deltas of one object.
    ///
    /// At most one ADD and at most one DELETE are allowed. A DELETE without
    /// an ADD wins over any MODIFY; an ADD swallows every MODIFY; otherwise
    /// the MODIFY deltas fold together. Because the input has no order, a
    /// path touched by both a replace and an increment (or by two different
    /// replaces) is rejected.
    ///
    /// # Errors
    ///
    /// Returns an incompatible merge error for multiple ADDs/DELETEs or ADD
    /// together with DELETE, and a conflicting union error for
    /// order-dependent MODIFY sets.
    pub fn union(deltas: impl IntoIterator<Item = ObjectDelta>) -> Result<Option<ObjectDelta>> {
        let mut add: Option<ObjectDelta> = None;
        let mut delete: Option<ObjectDelta> = None;
        let mut modifies: Vec<ObjectDelta> = Vec::new();

        for delta in deltas {
            match delta.change_type() {
                ChangeType::Add => {
                    if add.is_some() {
                        return Err(DeltaError::incompatible_merge(
                            "union of more than one ADD delta",
                        ));
                    }
                    add = Some(delta);
                }
                ChangeType::Delete => {
                    if delete.is_some() {
                        return Err(DeltaError::incompatible_merge(
                            "union of more than one DELETE delta",
                        ));
                    }
                    delete = Some(delta);
                }
                ChangeType::Modify => modifies.push(delta),
            }
        }

        match (add, delete) {
            (Some(_), Some(_)) => Err(DeltaError::incompatible_merge(
                "union of ADD and DELETE deltas of the same object",
            )),
            (None, Some(delete)) => Ok(Some(delete)),
            (Some(mut add), None) => {
                for modify in modifies {
                    add.check_same_target(&modify)?;
                    for modification in modify.into_modifications() {
                        add.swallow(modification)?;
                    }
                }
                Ok(Some(add))
            }
            (None, None) => {
                check_union_conflicts(&modifies)?;
                let mut iter = modifies.into_iter();
                let Some(mut acc) = iter.next() else {
                    return Ok(None);
                };
                for modify in iter {
                    acc.check_same_target(&modify)?;
                    for modification in modify.into_modifications() {
                        acc.add_modification(modification)?;
                    }
                }
                Ok(Some(acc))
            }
        }
    }

    /// Apply a MODIFY delta to an object in place.
    ///
    /// # Errors
    ///
    /// Returns an illegal state error for ADD/DELETE deltas and schema
    /// errors for paths that cannot be applied.
    pub fn apply_to(&self, object: &mut IdentityObject) -> Result<()> {
        let ObjectChange::Modify { modifications } = &self.change else {
            return Err(DeltaError::illegal_state(format!(
                "only MODIFY deltas can be applied, got {}",
                self.change_type()
            )));
        };
        for modification in modifications {
            modification.apply_to_root(&mut object.root)?;
        }
        Ok(())
    }

    /// Compute the object after this delta without touching `old`.
    ///
    /// ADD yields its object, DELETE yields nothing, MODIFY clones `old`
    /// and applies the modifications.
    ///
    /// # Errors
    ///
    /// Returns an illegal state error for a MODIFY without an old object.
    pub fn compute_changed_object(
        &self,
        old: Option<&IdentityObject>,
    ) -> Result<Option<IdentityObject>> {
        match &self.change {
            ObjectChange::Add { object } => Ok(Some(object.as_ref().clone())),
            ObjectChange::Delete => Ok(None),
            ObjectChange::Modify { .. } => {
                let Some(old) = old else {
                    return Err(DeltaError::illegal_state(format!(
                        "cannot apply MODIFY delta of {} to a missing object",
                        self.oid.map_or_else(|| "?".to_string(), |o| o.to_string())
                    )));
                };
                let mut changed = old.clone();
                self.apply_to(&mut changed)?;
                Ok(Some(changed))
            }
        }
    }
}

/// Reject MODIFY sets whose result would depend on the order of merging.
///
/// Two changes from different deltas conflict when their paths are related
/// (equal, above or below each other) and either is a replace. Identical
/// replaces of the same item do not conflict.
fn check_union_conflicts(modifies: &[ObjectDelta]) -> Result<()> {
    let changes: Vec<(usize, &ItemDelta)> = modifies
        .iter()
        .enumerate()
        .flat_map(|(index, modify)| {
            modify
                .modifications()
                .iter()
                .filter(|d| !d.is_empty())
                .map(move |d| (index, d))
        })
        .collect();

    for (i, (index, delta)) in changes.iter().enumerate() {
        for (other_index, other) in &changes[i + 1..] {
            if index == other_index || !delta.path().is_related(other.path()) {
                continue;
            }
            let conflict = match (delta.is_replace(), other.is_replace()) {
                (false, false) => false,
                (true, true) => !delta.path().is_equivalent(other.path()) || delta != other,
                _ => true,
            };
            if conflict {
                return Err(DeltaError::conflicting_union(
                    delta.path().to_string(),
                    format!(
                        "changed together with '{}' by a replace in an unordered union",
                        other.path()
                    ),
                ));
            }
        }
    }
    Ok(())
}
