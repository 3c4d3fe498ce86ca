//! Plus/zero/minus value triples produced by mapping evaluation.

use serde::{Deserialize, Serialize};

use crate::item::Item;
use crate::item_delta::TypedDelta;
use crate::path::ItemPath;
use crate::value::{add_or_absorb, contains_matching, ItemValue};

/// Values a mapping adds (`plus`), keeps (`zero`) and removes (`minus`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaSetTriple<V> {
    #[serde(default)]
    pub plus: Vec<V>,
    #[serde(default)]
    pub zero: Vec<V>,
    #[serde(default)]
    pub minus: Vec<V>,
}

impl<V> Default for DeltaSetTriple<V> {
    fn default() -> Self {
        Self {
            plus: Vec::new(),
            zero: Vec::new(),
            minus: Vec::new(),
        }
    }
}

impl<V: ItemValue> DeltaSetTriple<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Triple with only unchanged values.
    #[must_use]
    pub fn from_zero(values: Vec<V>) -> Self {
        let mut triple = Self::new();
        for value in values {
            triple.add_to_zero(value);
        }
        triple
    }

    /// Triple with only added values.
    #[must_use]
    pub fn from_plus(values: Vec<V>) -> Self {
        let mut triple = Self::new();
        for value in values {
            triple.add_to_plus(value);
        }
        triple
    }

    pub fn add_to_plus(&mut self, value: V) {
        add_or_absorb(&mut self.plus, value);
    }

    pub fn add_to_zero(&mut self, value: V) {
        add_or_absorb(&mut self.zero, value);
    }

    pub fn add_to_minus(&mut self, value: V) {
        add_or_absorb(&mut self.minus, value);
    }

    /// Whether all three sets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plus.is_empty() && self.zero.is_empty() && self.minus.is_empty()
    }

    /// Merge another triple (e.g. from a second mapping targeting the same
    /// path). A value some mapping still produces is never removed.
    pub fn merge(&mut self, other: DeltaSetTriple<V>) {
        for value in other.plus {
            self.add_to_plus(value);
        }
        for value in other.zero {
            self.add_to_zero(value);
        }
        for value in other.minus {
            self.add_to_minus(value);
        }
        let produced: Vec<V> = self.non_negative_values();
        self.minus.retain(|v| !contains_matching(&produced, v));
    }

    /// Values present after the change: zero ∪ plus.
    #[must_use]
    pub fn non_negative_values(&self) -> Vec<V> {
        let mut values = self.zero.clone();
        for value in &self.plus {
            add_or_absorb(&mut values, value.clone());
        }
        values
    }

    /// Consolidate into an item delta. Non-tolerant targets are replaced by
    /// the non-negative values; tolerant targets only receive plus/minus.
    /// The result is narrowed against `current` so it changes nothing that
    /// is already in place.
    #[must_use]
    pub fn to_item_delta(
        &self,
        path: ItemPath,
        current: Option<&Item<V>>,
        tolerant: bool,
    ) -> TypedDelta<V> {
        let delta = if tolerant {
            TypedDelta::add_delete(path, self.plus.clone(), self.minus.clone())
        } else {
            TypedDelta::replace(path, self.non_negative_values())
        };
        delta.narrow(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PropertyValue;

    fn values(items: &[&str]) -> Vec<PropertyValue> {
        items.iter().map(|s| PropertyValue::new(*s)).collect()
    }

    #[test]
    fn test_merge_keeps_produced_values() {
        let mut a = DeltaSetTriple {
            plus: values(&["x"]),
            zero: Vec::new(),
            minus: values(&["y"]),
        };
        a.merge(DeltaSetTriple::from_zero(values(&["y"])));
        assert!(a.minus.is_empty());
        assert_eq!(a.non_negative_values().len(), 2);
    }

    #[test]
    fn test_to_item_delta_replace_and_narrow() {
        let triple = DeltaSetTriple::from_zero(values(&["jack"]));
        let current = Item::with_values("name", values(&["jack"]));
        assert!(triple
            .to_item_delta(ItemPath::name("name"), Some(&current), false)
            .is_empty());

        let changed = DeltaSetTriple::from_plus(values(&["jack1"]));
        let delta = changed.to_item_delta(ItemPath::name("name"), Some(&current), false);
        assert_eq!(delta.values_to_replace().unwrap(), values(&["jack1"]).as_slice());
    }

    #[test]
    fn test_to_item_delta_tolerant() {
        let triple = DeltaSetTriple {
            plus: values(&["b"]),
            zero: values(&["a"]),
            minus: values(&["c"]),
        };
        let current = Item::with_values("mail", values(&["a", "c"]));
        let delta = triple.to_item_delta(ItemPath::name("mail"), Some(&current), true);
        assert_eq!(delta.values_to_add(), values(&["b"]).as_slice());
        assert_eq!(delta.values_to_delete(), values(&["c"]).as_slice());
    }
}
