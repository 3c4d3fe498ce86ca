//! Policy definitions consumed by the projector: object templates, value
//! (password) policies and projection definitions.

use serde::{Deserialize, Serialize};
use xavyo_delta::{ItemPath, Oid};

use crate::mapping::{Condition, Mapping, MappingExpression};
use crate::types::{ProjectionDependency, ResourceObjectType};

// ============================================================================
// Object templates
// ============================================================================

/// Bounded iteration used to make generated values unique.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IterationSpecification {
    /// Maximum iteration number. Falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// Expression computing the token from `iteration`. Without one, the
    /// token is empty for iteration 0 and the iteration number otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expression: Option<MappingExpression>,
    /// Must hold before mappings are evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_condition: Option<Condition>,
    /// Must hold for the computed object to be accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_condition: Option<Condition>,
}

/// Template applied to focus objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectTemplate {
    pub oid: Oid,
    pub name: String,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    /// Templates whose mappings are included.
    #[serde(default)]
    pub includes: Vec<Oid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<IterationSpecification>,
    /// Value policy checked against focus password changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_policy: Option<Oid>,
}

impl ObjectTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            oid: Oid::new(),
            name: name.into(),
            mappings: Vec::new(),
            includes: Vec::new(),
            iteration: None,
            password_policy: None,
        }
    }

    #[must_use]
    pub fn with_mapping(mut self, mapping: Mapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    #[must_use]
    pub fn with_include(mut self, template: Oid) -> Self {
        self.includes.push(template);
        self
    }

    #[must_use]
    pub fn with_iteration(mut self, iteration: IterationSpecification) -> Self {
        self.iteration = Some(iteration);
        self
    }

    #[must_use]
    pub fn with_password_policy(mut self, policy: Oid) -> Self {
        self.password_policy = Some(policy);
        self
    }
}

// ============================================================================
// Value policies
// ============================================================================

/// Minimum occurrences of characters from a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterClassRule {
    pub name: String,
    pub characters: String,
    pub min_occurs: usize,
}

impl CharacterClassRule {
    pub fn new(name: impl Into<String>, characters: impl Into<String>, min_occurs: usize) -> Self {
        Self {
            name: name.into(),
            characters: characters.into(),
            min_occurs,
        }
    }
}

/// Rules a password must satisfy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValuePolicy {
    pub oid: Oid,
    pub name: String,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min_unique_chars: Option<usize>,
    #[serde(default)]
    pub character_classes: Vec<CharacterClassRule>,
    /// Case-insensitive substrings the value must not contain.
    #[serde(default)]
    pub prohibited_substrings: Vec<String>,
    /// Reject values containing the focus name.
    #[serde(default)]
    pub prohibit_focus_name: bool,
}

// ============================================================================
// Projection definitions
// ============================================================================

/// How a focus is projected to one resource object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionDefinition {
    pub object_type: ResourceObjectType,
    #[serde(default)]
    pub dependencies: Vec<ProjectionDependency>,
    /// Outbound mappings; targets are relative to the shadow.
    #[serde(default)]
    pub outbound: Vec<Mapping>,
    /// Attribute holding the resource-side name, unique per resource.
    #[serde(default = "default_naming_attribute")]
    pub naming_attribute: String,
    /// Projection administrative status follows the focus effective status.
    #[serde(default)]
    pub activation_outbound: bool,
    /// Focus password changes are propagated.
    #[serde(default)]
    pub password_outbound: bool,
}

fn default_naming_attribute() -> String {
    "name".to_string()
}

impl ProjectionDefinition {
    #[must_use]
    pub fn new(object_type: ResourceObjectType) -> Self {
        Self {
            object_type,
            dependencies: Vec::new(),
            outbound: Vec::new(),
            naming_attribute: default_naming_attribute(),
            activation_outbound: false,
            password_outbound: false,
        }
    }

    #[must_use]
    pub fn with_dependency(mut self, dependency: ProjectionDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    #[must_use]
    pub fn with_outbound(mut self, mapping: Mapping) -> Self {
        self.outbound.push(mapping);
        self
    }

    #[must_use]
    pub fn with_activation_outbound(mut self) -> Self {
        self.activation_outbound = true;
        self
    }

    #[must_use]
    pub fn with_password_outbound(mut self) -> Self {
        self.password_outbound = true;
        self
    }

    /// Path of the naming attribute inside a shadow.
    #[must_use]
    pub fn naming_path(&self) -> ItemPath {
        ItemPath::from_names([xavyo_delta::names::ATTRIBUTES, self.naming_attribute.as_str()])
    }

    /// Dependencies applying to the context of the given order.
    pub fn dependencies_for_order(&self, order: u32) -> impl Iterator<Item = &ProjectionDependency> {
        self.dependencies.iter().filter(move |d| d.order == order)
    }

    /// Highest dependency order declared.
    #[must_use]
    pub fn max_order(&self) -> u32 {
        self.dependencies.iter().map(|d| d.order).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DependencyStrictness;

    #[test]
    fn test_definition_from_json() {
        let resource = Oid::new();
        let other = Oid::new();
        let definition: ProjectionDefinition = serde_json::from_value(serde_json::json!({
            "object_type": { "resource_oid": resource, "kind": "account", "intent": "default" },
            "dependencies": [
                { "target": { "resource_oid": other, "kind": "account", "intent": "default" },
                  "strictness": "lax", "order": 1 }
            ],
            "outbound": [
                { "name": "uid", "target": "attributes/uid",
                  "expression": { "type": "as_is", "source": "name" } }
            ]
        }))
        .unwrap();
        assert_eq!(definition.naming_attribute, "name");
        assert_eq!(definition.max_order(), 1);
        assert_eq!(definition.dependencies_for_order(0).count(), 0);
        let dependency = definition.dependencies_for_order(1).next().unwrap();
        assert_eq!(dependency.strictness, DependencyStrictness::Lax);
        assert_eq!(definition.naming_path().to_string(), "attributes/name");
    }
}
