//! Delta error types.

use thiserror::Error;

/// Errors raised by the object model and the delta algebra.
///
/// `IllegalState` marks a programmer error: an operation that violates a
/// structural invariant of a delta (for example adding a modification to a
/// DELETE delta). Callers are not expected to recover from it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    /// Malformed path or item definition.
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// A path addresses a multi-valued container without a value id.
    #[error("Ambiguous path '{path}': {message}")]
    AmbiguousPath { path: String, message: String },

    /// Invariant violation inside the delta algebra.
    #[error("Illegal delta state: {message}")]
    IllegalState { message: String },

    /// Two deltas cannot be merged.
    #[error("Incompatible merge: {message}")]
    IncompatibleMerge { message: String },

    /// An unordered union touches the same path with replace and increment.
    #[error("Conflicting union on '{path}': {message}")]
    ConflictingUnion { path: String, message: String },
}

impl DeltaError {
    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create an ambiguous path error.
    pub fn ambiguous_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AmbiguousPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create an incompatible merge error.
    pub fn incompatible_merge(message: impl Into<String>) -> Self {
        Self::IncompatibleMerge {
            message: message.into(),
        }
    }

    /// Create a conflicting union error.
    pub fn conflicting_union(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConflictingUnion {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error is a schema problem (malformed path or item).
    #[must_use]
    pub fn is_schema(&self) -> bool {
        matches!(self, Self::Schema { .. } | Self::AmbiguousPath { .. })
    }

    /// Check if this error is an invariant violation.
    #[must_use]
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState { .. })
    }
}

/// Result type for delta operations.
pub type Result<T> = std::result::Result<T, DeltaError>;
