//! Common test utilities for xavyo-projector integration tests.
//!
//! Every test gets its own in-memory repository, resolver and trace sink,
//! and two tenants to check isolation against.

#![allow(dead_code)]

use std::sync::Arc;

use uuid::Uuid;
use xavyo_delta::{names, ContainerValue, IdentityObject, ItemPath, ObjectType, Oid};
use xavyo_projector::projection::new_shadow;
use xavyo_projector::{
    BasicMappingEvaluator, InMemoryDefinitionResolver, InMemoryObjectRepository,
    InMemoryTraceSink, Mapping, ObjectRepository, ProjectionDefinition, Projector,
    ProjectorConfig, ResourceObjectType,
};

/// Stores and sinks shared by a test.
pub struct TestContext {
    pub repository: Arc<InMemoryObjectRepository>,
    pub resolver: Arc<InMemoryDefinitionResolver>,
    pub trace_sink: Arc<InMemoryTraceSink>,
    pub tenant_a: Uuid,
    pub tenant_b: Uuid,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            repository: Arc::new(InMemoryObjectRepository::new()),
            resolver: Arc::new(InMemoryDefinitionResolver::new()),
            trace_sink: Arc::new(InMemoryTraceSink::new()),
            tenant_a: Uuid::new_v4(),
            tenant_b: Uuid::new_v4(),
        }
    }

    /// Projector wired to this context's stores with the default config.
    pub fn projector(&self) -> Projector {
        self.projector_with(ProjectorConfig::default())
    }

    pub fn projector_with(&self, config: ProjectorConfig) -> Projector {
        Projector::new(
            self.repository.clone(),
            self.resolver.clone(),
            Arc::new(BasicMappingEvaluator::new()),
        )
        .with_config(config)
        .with_trace_sink(self.trace_sink.clone())
    }

    /// Store an existing user and return its oid.
    pub async fn add_user(&self, tenant_id: Uuid, name: &str) -> Oid {
        self.repository
            .add_object(tenant_id, user(name))
            .await
            .expect("Failed to add user")
    }

    /// Store a shadow for `object_type` owned by `owner` and named `name`.
    pub async fn add_owned_shadow(
        &self,
        tenant_id: Uuid,
        object_type: &ResourceObjectType,
        owner: Oid,
        name: &str,
    ) -> Oid {
        let shadow = new_shadow(object_type, ObjectType::User, owner).with_container(
            names::ATTRIBUTES,
            vec![ContainerValue::new().with_property("name", name)],
        );
        self.repository
            .add_object(tenant_id, shadow)
            .await
            .expect("Failed to add shadow")
    }

    /// Register an account definition and return it.
    pub async fn add_definition(
        &self,
        tenant_id: Uuid,
        definition: ProjectionDefinition,
    ) -> ProjectionDefinition {
        self.resolver
            .add_projection_definition(tenant_id, definition.clone())
            .await;
        definition
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

pub fn user(name: &str) -> IdentityObject {
    IdentityObject::new(ObjectType::User).with_property(names::NAME, name)
}

pub fn account_name_path() -> ItemPath {
    ItemPath::from_names([names::ATTRIBUTES, "name"])
}

/// Account type on a fresh resource, with `name` mapped to the account name
/// and activation propagated.
pub fn account_definition() -> ProjectionDefinition {
    ProjectionDefinition::new(ResourceObjectType::account(Oid::new()))
        .with_outbound(Mapping::as_is("uid", names::NAME, account_name_path()))
        .with_activation_outbound()
}
