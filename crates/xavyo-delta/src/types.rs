//! Identifier and object type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DeltaError;

// ============================================================================
// ID Types (Newtype Pattern)
// ============================================================================

/// Unique identifier of a persisted object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Oid(pub Uuid);

impl Oid {
    /// Create a new random Oid.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    #[must_use]
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for Oid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for Oid {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<Oid> for Uuid {
    fn from(id: Oid) -> Self {
        id.0
    }
}

// ============================================================================
// Enums
// ============================================================================

/// Type of an identity object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// A person.
    User,
    /// A role.
    Role,
    /// An organizational unit.
    Org,
    /// A non-human identity.
    Service,
    /// Local representation of an account on an external system.
    Shadow,
    /// An external system definition.
    Resource,
    /// Template applied to focus objects.
    ObjectTemplate,
    /// Password/value policy.
    ValuePolicy,
}

impl ObjectType {
    /// Check if objects of this type can be the focus of a synchronization.
    #[must_use]
    pub fn is_focus(&self) -> bool {
        matches!(self, Self::User | Self::Role | Self::Org | Self::Service)
    }

    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Role => "role",
            Self::Org => "org",
            Self::Service => "service",
            Self::Shadow => "shadow",
            Self::Resource => "resource",
            Self::ObjectTemplate => "object_template",
            Self::ValuePolicy => "value_policy",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = DeltaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "role" => Ok(Self::Role),
            "org" => Ok(Self::Org),
            "service" => Ok(Self::Service),
            "shadow" => Ok(Self::Shadow),
            "resource" => Ok(Self::Resource),
            "object_template" => Ok(Self::ObjectTemplate),
            "value_policy" => Ok(Self::ValuePolicy),
            _ => Err(DeltaError::schema(format!("Unknown object type: {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_roundtrip_through_uuid() {
        let uuid = Uuid::new_v4();
        let oid = Oid::from(uuid);
        assert_eq!(oid.into_inner(), uuid);
        assert_eq!(oid.to_string(), uuid.to_string());
    }

    #[test]
    fn test_object_type_parse() {
        assert_eq!("user".parse::<ObjectType>().unwrap(), ObjectType::User);
        assert_eq!(
            "OBJECT_TEMPLATE".parse::<ObjectType>().unwrap(),
            ObjectType::ObjectTemplate
        );
        assert!("account".parse::<ObjectType>().is_err());
    }

    #[test]
    fn test_focus_types() {
        assert!(ObjectType::User.is_focus());
        assert!(ObjectType::Org.is_focus());
        assert!(!ObjectType::Shadow.is_focus());
        assert!(!ObjectType::ValuePolicy.is_focus());
    }
}
