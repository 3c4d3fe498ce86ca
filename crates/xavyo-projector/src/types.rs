//! Projector domain types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use xavyo_delta::Oid;

use crate::error::ProjectorError;

// ============================================================================
// Projection identity
// ============================================================================

/// Kind of resource object a projection represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionKind {
    Account,
    Entitlement,
    Generic,
}

impl fmt::Display for ProjectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account => write!(f, "account"),
            Self::Entitlement => write!(f, "entitlement"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// Resource object type: resource, kind and intent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceObjectType {
    pub resource_oid: Oid,
    pub kind: ProjectionKind,
    pub intent: String,
}

impl ResourceObjectType {
    pub fn new(resource_oid: Oid, kind: ProjectionKind, intent: impl Into<String>) -> Self {
        Self {
            resource_oid,
            kind,
            intent: intent.into(),
        }
    }

    /// Default account type on a resource.
    #[must_use]
    pub fn account(resource_oid: Oid) -> Self {
        Self::new(resource_oid, ProjectionKind::Account, "default")
    }
}

impl fmt::Display for ResourceObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.kind, self.intent, self.resource_oid)
    }
}

/// Identifies one projection context. `order` separates several contexts
/// for the same resource object type, created when dependencies require the
/// same projection to be processed more than once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectionKey {
    pub object_type: ResourceObjectType,
    #[serde(default)]
    pub order: u32,
}

impl ProjectionKey {
    #[must_use]
    pub fn new(object_type: ResourceObjectType) -> Self {
        Self {
            object_type,
            order: 0,
        }
    }

    #[must_use]
    pub fn with_order(&self, order: u32) -> Self {
        Self {
            object_type: self.object_type.clone(),
            order,
        }
    }
}

impl fmt::Display for ProjectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.order == 0 {
            write!(f, "{}", self.object_type)
        } else {
            write!(f, "{} (order {})", self.object_type, self.order)
        }
    }
}

// ============================================================================
// Dependencies
// ============================================================================

/// How an unsatisfied dependency is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStrictness {
    /// Unsatisfied dependency fails the call (or breaks the dependent when
    /// discovered mid-run).
    #[default]
    Strict,
    /// Unsatisfied dependency is ignored.
    Lax,
    /// Ignored while sorting; must be provisioned at the final check.
    Relaxed,
}

impl fmt::Display for DependencyStrictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Lax => write!(f, "lax"),
            Self::Relaxed => write!(f, "relaxed"),
        }
    }
}

/// A dependency of one projection on another resource object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionDependency {
    /// Object type depended upon.
    pub target: ResourceObjectType,
    #[serde(default)]
    pub strictness: DependencyStrictness,
    /// Order of the dependent context this dependency applies to. A
    /// dependency with order `n > 0` makes the projection run a second time
    /// (as its own context) once the target is done.
    #[serde(default)]
    pub order: u32,
}

impl ProjectionDependency {
    #[must_use]
    pub fn strict(target: ResourceObjectType) -> Self {
        Self {
            target,
            strictness: DependencyStrictness::Strict,
            order: 0,
        }
    }

    #[must_use]
    pub fn with_strictness(mut self, strictness: DependencyStrictness) -> Self {
        self.strictness = strictness;
        self
    }

    #[must_use]
    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }
}

// ============================================================================
// Projection state
// ============================================================================

/// What the caller explicitly requested for a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynchronizationIntent {
    Add,
    Keep,
    Delete,
    Unlink,
}

/// What the projector decided to do with a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Add,
    Keep,
    Delete,
    Unlink,
}

impl PolicyDecision {
    /// Whether the projection goes away (deleted or unlinked).
    #[must_use]
    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Delete | Self::Unlink)
    }
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Keep => write!(f, "keep"),
            Self::Delete => write!(f, "delete"),
            Self::Unlink => write!(f, "unlink"),
        }
    }
}

/// Processing status of a projection context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionStatus {
    #[default]
    Normal,
    /// Excluded from further waves after a failure.
    Broken,
    /// Excluded from processing altogether.
    Ignore,
}

// ============================================================================
// Activation
// ============================================================================

/// Administrative or effective activation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    Enabled,
    Disabled,
    Archived,
}

impl ActivationStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivationStatus {
    type Err = ProjectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(Self::Enabled),
            "disabled" => Ok(Self::Disabled),
            "archived" => Ok(Self::Archived),
            other => Err(ProjectorError::schema(format!(
                "Unknown activation status '{other}'"
            ))),
        }
    }
}

/// Position of "now" relative to the validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityStatus {
    Before,
    In,
    After,
}

impl ValidityStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::In => "in",
            Self::After => "after",
        }
    }
}

impl fmt::Display for ValidityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
