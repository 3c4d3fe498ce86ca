//! Wave-based focus/projection synchronization engine.
//!
//! Given a change request against a focus object (typically a user), the
//! [`Projector`] computes the secondary changes it implies: values produced
//! by the focus object template, activation status, and the accounts the
//! focus should have on external resources (its projections).
//!
//! # Processing
//!
//! - Projections are sorted into waves by their declared dependencies; a
//!   projection runs one wave after the last projection it depends on.
//! - Each wave applies the object template (with bounded iteration to make
//!   generated values unique), recomputes activation, then processes the
//!   projections of that wave.
//! - After the last wave the dependency graph is checked as a whole.
//!
//! # Collaborators
//!
//! The engine performs no I/O itself. Storage, definitions, expression
//! evaluation and tracing are injected as traits:
//! - [`repository::ObjectRepository`] with [`repository::InMemoryObjectRepository`]
//! - [`resolver::DefinitionResolver`] with [`resolver::InMemoryDefinitionResolver`]
//! - [`mapping::MappingEvaluator`] with [`mapping::BasicMappingEvaluator`]
//! - [`trace::TraceSink`] with [`trace::InMemoryTraceSink`] and [`trace::NoopTraceSink`]

pub mod activation;
pub mod config;
pub mod context;
pub mod definition;
pub mod dependency;
pub mod error;
pub mod mapping;
pub mod password;
pub mod projection;
pub mod projector;
pub mod repository;
pub mod resolver;
pub mod template;
pub mod trace;
pub mod types;

// Re-export commonly used types
pub use config::ProjectorConfig;
pub use context::{
    FocusContext, LensContext, OperationTraceEntry, ProjectionContext, ProjectionProgress,
    TraceOutcome,
};
pub use definition::{
    CharacterClassRule, IterationSpecification, ObjectTemplate, ProjectionDefinition, ValuePolicy,
};
pub use error::{ProjectorError, Result};
pub use mapping::{
    BasicMappingEvaluator, Condition, Mapping, MappingEvaluator, MappingExpression,
    MappingStrength, MappingVariables,
};
pub use projector::Projector;
pub use repository::{InMemoryObjectRepository, ObjectQuery, ObjectRepository};
pub use resolver::{DefinitionResolver, InMemoryDefinitionResolver};
pub use trace::{InMemoryTraceSink, NoopTraceSink, TraceEvent, TraceRecord, TraceSink};
pub use types::{
    ActivationStatus, DependencyStrictness, PolicyDecision, ProjectionDependency, ProjectionKey,
    ProjectionKind, ProjectionStatus, ResourceObjectType, SynchronizationIntent, ValidityStatus,
};
