//! Definition resolver collaborator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;
use xavyo_delta::Oid;

use crate::definition::{ObjectTemplate, ProjectionDefinition, ValuePolicy};
use crate::error::{ProjectorError, Result};
use crate::types::ResourceObjectType;

/// Resolves templates, value policies and projection definitions.
#[async_trait]
pub trait DefinitionResolver: Send + Sync {
    /// Get an object template.
    async fn object_template(&self, tenant_id: Uuid, oid: Oid) -> Result<ObjectTemplate>;

    /// Get a value policy.
    async fn value_policy(&self, tenant_id: Uuid, oid: Oid) -> Result<ValuePolicy>;

    /// Get the definition of a resource object type, if the resource
    /// defines one.
    async fn projection_definition(
        &self,
        tenant_id: Uuid,
        object_type: &ResourceObjectType,
    ) -> Result<Option<ProjectionDefinition>>;
}

/// In-memory definition resolver for testing.
#[derive(Debug, Default)]
pub struct InMemoryDefinitionResolver {
    templates: Arc<RwLock<HashMap<(Uuid, Oid), ObjectTemplate>>>,
    policies: Arc<RwLock<HashMap<(Uuid, Oid), ValuePolicy>>>,
    projections: Arc<RwLock<HashMap<(Uuid, ResourceObjectType), ProjectionDefinition>>>,
}

impl InMemoryDefinitionResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_template(&self, tenant_id: Uuid, template: ObjectTemplate) {
        self.templates
            .write()
            .await
            .insert((tenant_id, template.oid), template);
    }

    pub async fn add_value_policy(&self, tenant_id: Uuid, policy: ValuePolicy) {
        self.policies
            .write()
            .await
            .insert((tenant_id, policy.oid), policy);
    }

    pub async fn add_projection_definition(&self, tenant_id: Uuid, definition: ProjectionDefinition) {
        self.projections
            .write()
            .await
            .insert((tenant_id, definition.object_type.clone()), definition);
    }

    /// Clear all definitions (for testing).
    pub async fn clear(&self) {
        self.templates.write().await.clear();
        self.policies.write().await.clear();
        self.projections.write().await.clear();
    }
}

#[async_trait]
impl DefinitionResolver for InMemoryDefinitionResolver {
    async fn object_template(&self, tenant_id: Uuid, oid: Oid) -> Result<ObjectTemplate> {
        self.templates
            .read()
            .await
            .get(&(tenant_id, oid))
            .cloned()
            .ok_or_else(|| ProjectorError::not_found("object_template", oid))
    }

    async fn value_policy(&self, tenant_id: Uuid, oid: Oid) -> Result<ValuePolicy> {
        self.policies
            .read()
            .await
            .get(&(tenant_id, oid))
            .cloned()
            .ok_or_else(|| ProjectorError::not_found("value_policy", oid))
    }

    async fn projection_definition(
        &self,
        tenant_id: Uuid,
        object_type: &ResourceObjectType,
    ) -> Result<Option<ProjectionDefinition>> {
        Ok(self
            .projections
            .read()
            .await
            .get(&(tenant_id, object_type.clone()))
            .cloned())
    }
}
