//! Object repository collaborator.
//!
//! The projector reads persisted objects through [`ObjectRepository`] and
//! never writes them; `modify_object` and `add_object` exist for the callers
//! that execute computed deltas and for seeding tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;
use xavyo_delta::{IdentityObject, ItemDelta, ItemPath, ObjectDelta, ObjectType, Oid, RealValue};

use crate::error::{ProjectorError, Result};

/// Filter over persisted objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectQuery {
    /// Every object.
    All,
    /// Objects having `value` (real-value comparison) at `path`.
    Equal { path: ItemPath, value: RealValue },
    /// Objects matching all sub-queries.
    And { queries: Vec<ObjectQuery> },
    /// Objects other than the given one.
    ExcludeOid { oid: Oid },
}

impl ObjectQuery {
    #[must_use]
    pub fn equal(path: ItemPath, value: impl Into<RealValue>) -> Self {
        Self::Equal {
            path,
            value: value.into(),
        }
    }

    /// Combine with another query.
    #[must_use]
    pub fn and(self, other: ObjectQuery) -> Self {
        match self {
            Self::And { mut queries } => {
                queries.push(other);
                Self::And { queries }
            }
            first => Self::And {
                queries: vec![first, other],
            },
        }
    }

    /// Exclude one object (usually the object being checked).
    #[must_use]
    pub fn excluding(self, oid: Option<Oid>) -> Self {
        match oid {
            Some(oid) => self.and(Self::ExcludeOid { oid }),
            None => self,
        }
    }

    /// Whether the object matches. Paths that cannot be resolved do not
    /// match.
    #[must_use]
    pub fn matches(&self, object: &IdentityObject) -> bool {
        match self {
            Self::All => true,
            Self::Equal { path, value } => object
                .property_values(path)
                .map(|values| values.iter().any(|v| &v.value == value))
                .unwrap_or(false),
            Self::And { queries } => queries.iter().all(|q| q.matches(object)),
            Self::ExcludeOid { oid } => object.oid != Some(*oid),
        }
    }
}

/// Read and write access to persisted objects.
#[async_trait]
pub trait ObjectRepository: Send + Sync {
    /// Get an object by oid.
    async fn get_object(
        &self,
        tenant_id: Uuid,
        object_type: ObjectType,
        oid: Oid,
    ) -> Result<IdentityObject>;

    /// Search objects of a type.
    async fn search_objects(
        &self,
        tenant_id: Uuid,
        object_type: ObjectType,
        query: &ObjectQuery,
    ) -> Result<Vec<IdentityObject>>;

    /// Count objects of a type.
    async fn count_objects(
        &self,
        tenant_id: Uuid,
        object_type: ObjectType,
        query: &ObjectQuery,
    ) -> Result<usize>;

    /// Apply item deltas to a stored object. With `expected_version`, fails
    /// with a conflict if the object changed in the meantime.
    async fn modify_object(
        &self,
        tenant_id: Uuid,
        object_type: ObjectType,
        oid: Oid,
        modifications: Vec<ItemDelta>,
        expected_version: Option<u64>,
    ) -> Result<IdentityObject>;

    /// Store a new object. An object without an oid gets a generated one.
    async fn add_object(&self, tenant_id: Uuid, object: IdentityObject) -> Result<Oid>;
}

/// In-memory repository for testing.
#[derive(Debug, Default)]
pub struct InMemoryObjectRepository {
    objects: Arc<RwLock<HashMap<(Uuid, Oid), IdentityObject>>>,
}

impl InMemoryObjectRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects across tenants.
    pub async fn count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Clear all objects (for testing).
    pub async fn clear(&self) {
        self.objects.write().await.clear();
    }
}

#[async_trait]
impl ObjectRepository for InMemoryObjectRepository {
    async fn get_object(
        &self,
        tenant_id: Uuid,
        object_type: ObjectType,
        oid: Oid,
    ) -> Result<IdentityObject> {
        self.objects
            .read()
            .await
            .get(&(tenant_id, oid))
            .filter(|o| o.object_type == object_type)
            .cloned()
            .ok_or_else(|| ProjectorError::not_found(object_type.as_str(), oid))
    }

    async fn search_objects(
        &self,
        tenant_id: Uuid,
        object_type: ObjectType,
        query: &ObjectQuery,
    ) -> Result<Vec<IdentityObject>> {
        let objects = self.objects.read().await;
        let mut found: Vec<IdentityObject> = objects
            .iter()
            .filter(|((tenant, _), o)| *tenant == tenant_id && o.object_type == object_type)
            .map(|(_, o)| o)
            .filter(|o| query.matches(o))
            .cloned()
            .collect();
        found.sort_by_key(|o| o.oid);
        Ok(found)
    }

    async fn count_objects(
        &self,
        tenant_id: Uuid,
        object_type: ObjectType,
        query: &ObjectQuery,
    ) -> Result<usize> {
        Ok(self
            .search_objects(tenant_id, object_type, query)
            .await?
            .len())
    }

    async fn modify_object(
        &self,
        tenant_id: Uuid,
        object_type: ObjectType,
        oid: Oid,
        modifications: Vec<ItemDelta>,
        expected_version: Option<u64>,
    ) -> Result<IdentityObject> {
        let mut objects = self.objects.write().await;
        let object = objects
            .get_mut(&(tenant_id, oid))
            .filter(|o| o.object_type == object_type)
            .ok_or_else(|| ProjectorError::not_found(object_type.as_str(), oid))?;

        let current_version = object.version.unwrap_or(0);
        if let Some(expected) = expected_version {
            if expected != current_version {
                return Err(ProjectorError::conflict(
                    oid,
                    format!("expected version {expected}, found {current_version}"),
                ));
            }
        }

        let delta = ObjectDelta::modify_with(object_type, oid, modifications)?;
        let mut changed = object.clone();
        delta.apply_to(&mut changed)?;
        changed.version = Some(current_version + 1);
        *object = changed.clone();
        debug!(%oid, version = current_version + 1, "Object modified");
        Ok(changed)
    }

    async fn add_object(&self, tenant_id: Uuid, mut object: IdentityObject) -> Result<Oid> {
        let oid = *object.oid.get_or_insert_with(Oid::new);
        let mut objects = self.objects.write().await;
        if objects.contains_key(&(tenant_id, oid)) {
            return Err(ProjectorError::already_exists(
                Some(oid),
                object.name().map(str::to_string),
                format!("{} already exists", object.describe()),
            ));
        }
        object.version.get_or_insert(0);
        objects.insert((tenant_id, oid), object);
        Ok(oid)
    }
}
