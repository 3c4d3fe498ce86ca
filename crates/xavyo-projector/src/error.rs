//! Projector error types.

use thiserror::Error;
use xavyo_delta::{DeltaError, Oid};

/// Errors that can occur while projecting a change.
///
/// Every variant except a strict dependency that turns unsatisfied mid-run
/// aborts [`crate::Projector::project`]. The latter only marks the affected
/// projection broken.
#[derive(Debug, Clone, Error)]
pub enum ProjectorError {
    /// Malformed path, definition or template.
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// The requested change violates a policy (uniqueness, circular or
    /// strict dependency, forbidden removal, password policy).
    #[error("Policy violation: {message}")]
    PolicyViolation { message: String },

    /// Object not found.
    #[error("{object_type} not found: {oid}")]
    ObjectNotFound { object_type: String, oid: String },

    /// A conflicting object already exists.
    #[error("Object already exists: {message}")]
    ObjectAlreadyExists {
        conflicting_oid: Option<Oid>,
        conflicting_name: Option<String>,
        message: String,
    },

    /// Concurrent modification detected by the repository.
    #[error("Conflict on {oid}: {message}")]
    Conflict { oid: Oid, message: String },

    /// Mapping or condition evaluation failed.
    #[error("Expression evaluation error in '{expression}': {message}")]
    ExpressionEvaluation { expression: String, message: String },

    /// Collaborator could not be reached.
    #[error("Communication error: {message}")]
    Communication { message: String },

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Operation not permitted.
    #[error("Security violation: {message}")]
    SecurityViolation { message: String },

    /// Object model or delta algebra error.
    #[error(transparent)]
    Delta(#[from] DeltaError),
}

impl ProjectorError {
    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a policy violation error.
    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::PolicyViolation {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(object_type: impl Into<String>, oid: impl ToString) -> Self {
        Self::ObjectNotFound {
            object_type: object_type.into(),
            oid: oid.to_string(),
        }
    }

    /// Create an already exists error naming the conflicting object.
    pub fn already_exists(
        conflicting_oid: Option<Oid>,
        conflicting_name: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ObjectAlreadyExists {
            conflicting_oid,
            conflicting_name,
            message: message.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(oid: Oid, message: impl Into<String>) -> Self {
        Self::Conflict {
            oid,
            message: message.into(),
        }
    }

    /// Create an expression evaluation error.
    pub fn expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExpressionEvaluation {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Create a communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a security violation error.
    pub fn security_violation(message: impl Into<String>) -> Self {
        Self::SecurityViolation {
            message: message.into(),
        }
    }

    /// Check if this is a policy violation.
    #[must_use]
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::PolicyViolation { .. })
    }

    /// Check if this is an already exists error.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::ObjectAlreadyExists { .. })
    }

    /// Check if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound { .. })
    }

    /// Check if this is a schema error, including schema errors raised by
    /// the delta algebra.
    #[must_use]
    pub fn is_schema(&self) -> bool {
        match self {
            Self::Schema { .. } => true,
            Self::Delta(e) => e.is_schema(),
            _ => false,
        }
    }
}

/// Result type for projector operations.
pub type Result<T> = std::result::Result<T, ProjectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProjectorError::policy_violation("circular dependency");
        assert_eq!(err.to_string(), "Policy violation: circular dependency");
        assert!(err.is_policy_violation());

        let err = ProjectorError::not_found("user", "123");
        assert_eq!(err.to_string(), "user not found: 123");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_already_exists_carries_conflict() {
        let oid = Oid::new();
        let err = ProjectorError::already_exists(Some(oid), Some("jack".into()), "name taken");
        assert!(err.is_already_exists());
        match err {
            ProjectorError::ObjectAlreadyExists {
                conflicting_oid,
                conflicting_name,
                ..
            } => {
                assert_eq!(conflicting_oid, Some(oid));
                assert_eq!(conflicting_name.as_deref(), Some("jack"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_delta_schema_errors_are_schema() {
        let err: ProjectorError = DeltaError::schema("bad path").into();
        assert!(err.is_schema());
        let err: ProjectorError = DeltaError::illegal_state("oops").into();
        assert!(!err.is_schema());
    }
}
