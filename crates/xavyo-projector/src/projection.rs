//! Projection processing: policy decisions, outbound values, activation,
//! credentials and shadow conflicts.

use std::sync::Arc;

use tracing::{debug, info, instrument};
use xavyo_delta::{
    names, IdentityObject, ItemDelta, ItemPath, ObjectDelta, ObjectType, Oid,
    ReferenceValue,
};

use crate::activation::{administrative_status_path, effective_status_of};
use crate::config::ProjectorConfig;
use crate::context::{LensContext, ProjectionContext};
use crate::error::{ProjectorError, Result};
use crate::mapping::{MappingEvaluator, MappingOutputs, MappingStrength, MappingVariables};
use crate::password::{changed_password, password_path};
use crate::repository::{ObjectQuery, ObjectRepository};
use crate::trace::{TraceEvent, TraceSink};
use crate::types::{PolicyDecision, ProjectionStatus, ResourceObjectType, SynchronizationIntent};

// ============================================================================
// Policy decision
// ============================================================================

/// Decide what happens to a projection. `None` means the projection has
/// nothing to do and is ignored.
#[must_use]
pub fn decide(focus_deleted: bool, projection: &ProjectionContext) -> Option<PolicyDecision> {
    let exists = projection.provisioned
        || projection.current.is_some()
        || projection.shadow_oid.is_some();

    if focus_deleted {
        return exists.then_some(PolicyDecision::Delete);
    }
    match projection.synchronization_intent {
        Some(SynchronizationIntent::Delete) => exists.then_some(PolicyDecision::Delete),
        Some(SynchronizationIntent::Unlink) => exists.then_some(PolicyDecision::Unlink),
        Some(SynchronizationIntent::Add) if exists => Some(PolicyDecision::Keep),
        Some(SynchronizationIntent::Add) => Some(PolicyDecision::Add),
        Some(SynchronizationIntent::Keep) => exists.then_some(PolicyDecision::Keep),
        None if projection.assigned && exists => Some(PolicyDecision::Keep),
        None if projection.assigned => Some(PolicyDecision::Add),
        None => exists.then_some(PolicyDecision::Delete),
    }
}

/// Set the policy decision of every projection that is not broken.
pub fn apply_policy_decisions(ctx: &mut LensContext) {
    let focus_deleted = ctx.focus.is_delete();
    for projection in ctx.projections.iter_mut().filter(|p| !p.is_broken()) {
        match decide(focus_deleted, projection) {
            Some(decision) => {
                projection.policy_decision = Some(decision);
                projection.status = ProjectionStatus::Normal;
            }
            None => {
                projection.policy_decision = None;
                projection.status = ProjectionStatus::Ignore;
            }
        }
        debug!(
            key = %projection.key,
            decision = ?projection.policy_decision,
            "Projection policy decision"
        );
    }
}

// ============================================================================
// Shadows
// ============================================================================

fn reference_oid(object: &IdentityObject, name: &str) -> Result<Option<Oid>> {
    let Some(item) = object.find_item(&ItemPath::name(name))? else {
        return Ok(None);
    };
    let Some(reference) = item.as_reference() else {
        return Err(ProjectorError::schema(format!(
            "'{name}' of {} is not a reference",
            object.describe()
        )));
    };
    Ok(reference.values.first().map(|v| v.oid))
}

/// Resource a shadow lives on.
///
/// # Errors
///
/// Returns a schema error if `resourceRef` is not a reference.
pub fn shadow_resource(shadow: &IdentityObject) -> Result<Option<Oid>> {
    reference_oid(shadow, names::RESOURCE_REF)
}

/// Focus owning a shadow, if any.
///
/// # Errors
///
/// Returns a schema error if `ownerRef` is not a reference.
pub fn shadow_owner(shadow: &IdentityObject) -> Result<Option<Oid>> {
    reference_oid(shadow, names::OWNER_REF)
}

/// Skeleton of a new shadow owned by the focus.
#[must_use]
pub fn new_shadow(
    object_type: &ResourceObjectType,
    owner_type: ObjectType,
    owner: Oid,
) -> IdentityObject {
    IdentityObject::new(ObjectType::Shadow)
        .with_reference(
            names::RESOURCE_REF,
            vec![ReferenceValue::new(object_type.resource_oid, ObjectType::Resource)],
        )
        .with_reference(names::OWNER_REF, vec![ReferenceValue::new(owner, owner_type)])
        .with_property(names::KIND, object_type.kind.to_string())
        .with_property(names::INTENT, object_type.intent.as_str())
}

// ============================================================================
// Processor
// ============================================================================

/// Computes the secondary delta of a projection for the current wave.
pub struct ProjectionProcessor {
    repository: Arc<dyn ObjectRepository>,
    evaluator: Arc<dyn MappingEvaluator>,
    trace_sink: Arc<dyn TraceSink>,
    config: ProjectorConfig,
}

impl ProjectionProcessor {
    pub fn new(
        repository: Arc<dyn ObjectRepository>,
        evaluator: Arc<dyn MappingEvaluator>,
        trace_sink: Arc<dyn TraceSink>,
        config: ProjectorConfig,
    ) -> Self {
        Self {
            repository,
            evaluator,
            trace_sink,
            config,
        }
    }

    /// Process the projection at `index` in the current wave.
    ///
    /// # Errors
    ///
    /// Returns `ObjectAlreadyExists` when the new shadow's name is taken by
    /// a shadow of another focus, and propagates evaluation and collaborator
    /// errors.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, wave = ctx.projection_wave))]
    pub async fn process(&self, ctx: &mut LensContext, index: usize) -> Result<()> {
        let wave = ctx.projection_wave;
        let mut projection = ctx.projections[index].clone();
        let decision = projection.policy_decision;

        match decision {
            Some(PolicyDecision::Delete) => {
                if let Some(oid) = projection.shadow_oid {
                    projection.secondary_delta = Some(ObjectDelta::delete(ObjectType::Shadow, oid));
                }
            }
            Some(PolicyDecision::Add) if projection.current.is_none() => {
                if projection.secondary_delta.as_ref().map_or(true, |d| !d.is_add()) {
                    projection.secondary_delta = Some(ObjectDelta::add(new_shadow(
                        &projection.key.object_type,
                        ctx.focus.object_type,
                        ctx.focus.oid,
                    )));
                }
            }
            _ => {}
        }

        if !projection.is_delete() {
            for delta in self.outbound_deltas(ctx, &projection).await? {
                projection.swallow_to_secondary(delta)?;
            }
        }

        if let Some(conflict) = self.find_shadow_conflict(ctx, &projection).await? {
            info!(key = %projection.key, existing = ?conflict.oid, "Conflicting shadow found");
            let existing_oid = conflict.oid.unwrap_or_default();
            let mut linked = ProjectionContext::assigned(projection.key.object_type.clone())
                .with_current(conflict);
            linked.key = projection.key.clone();
            linked.definition = projection.definition.clone();
            linked.synchronization_intent = projection.synchronization_intent;
            linked.policy_decision = Some(PolicyDecision::Keep);
            linked.min_wave = wave + 1;
            linked.do_reconciliation = true;

            projection.status = ProjectionStatus::Ignore;
            projection.secondary_delta = None;
            ctx.conflicting.push(linked);
            ctx.progress.conflicts += 1;
            self.trace_sink
                .record(
                    ctx.tenant_id,
                    TraceEvent::ConflictDetected {
                        key: projection.key.clone(),
                        existing_oid,
                    },
                )
                .await;
        }

        projection.recompute()?;
        let key = projection.key.clone();
        ctx.projections[index] = projection;
        ctx.progress.projections_processed += 1;
        self.trace_sink
            .record(
                ctx.tenant_id,
                TraceEvent::ProjectionProcessed {
                    key,
                    wave,
                    decision,
                },
            )
            .await;
        Ok(())
    }

    /// Deltas for outbound attributes, activation and credentials.
    async fn outbound_deltas(
        &self,
        ctx: &LensContext,
        projection: &ProjectionContext,
    ) -> Result<Vec<ItemDelta>> {
        let Some(definition) = &projection.definition else {
            return Ok(Vec::new());
        };
        let basis = projection
            .secondary_delta
            .as_ref()
            .and_then(ObjectDelta::object_to_add)
            .or(projection.current.as_ref());
        let mut deltas = Vec::new();

        let focus_changed = ctx.focus.primary_delta.as_ref().is_some_and(|d| !d.is_empty())
            || ctx.focus.secondary_deltas.values().any(|d| !d.is_empty());
        let evaluate = projection.policy_decision == Some(PolicyDecision::Add)
            || focus_changed
            || projection.do_reconciliation
            || self.config.reconcile_projections;

        if evaluate && !definition.outbound.is_empty() {
            let variables =
                MappingVariables::for_focus(ctx.focus.new.clone(), ctx.focus.old.clone())
                    .with_projection(projection.current.clone())
                    .with_iteration(
                        ctx.focus.iteration,
                        ctx.focus.iteration_token.clone().unwrap_or_default(),
                    );
            let mut outputs = MappingOutputs::new();
            for mapping in &definition.outbound {
                let has_value = match basis {
                    Some(object) => !object.property_values(&mapping.target)?.is_empty(),
                    None => false,
                };
                let touched = projection
                    .primary_delta
                    .as_ref()
                    .is_some_and(|d| d.has_related_delta(&mapping.target));
                match mapping.strength {
                    MappingStrength::Weak if has_value => continue,
                    MappingStrength::Normal if touched => continue,
                    _ => {}
                }
                let triple = self.evaluator.evaluate_mapping(mapping, &variables).await?;
                outputs.add(mapping, triple);
            }
            deltas.extend(outputs.into_item_deltas(basis)?);
        }

        if definition.activation_outbound {
            if let Some(focus) = &ctx.focus.new {
                let status = effective_status_of(focus, ctx.now)?;
                let delta = ItemDelta::replace_property(administrative_status_path(), [status.as_str()]);
                deltas.push(match basis {
                    Some(object) => delta.narrow(&object.root)?,
                    None => delta,
                });
            }
        }

        if definition.password_outbound {
            if let Some(password) = changed_password(ctx)? {
                deltas.push(ItemDelta::replace_property(password_path(), [password]));
            }
        }

        deltas.retain(|d| !d.is_empty());
        Ok(deltas)
    }

    /// Existing shadow with the name the new shadow would get. A shadow
    /// without an owner, or owned by this focus, is returned so it can be
    /// linked instead.
    async fn find_shadow_conflict(
        &self,
        ctx: &LensContext,
        projection: &ProjectionContext,
    ) -> Result<Option<IdentityObject>> {
        let (Some(definition), Some(shadow)) = (
            &projection.definition,
            projection
                .secondary_delta
                .as_ref()
                .and_then(ObjectDelta::object_to_add),
        ) else {
            return Ok(None);
        };
        let naming_path = definition.naming_path();
        let Some(name) = shadow.property_value(&naming_path)? else {
            return Ok(None);
        };

        let query = ObjectQuery::Equal {
            path: naming_path,
            value: name.clone(),
        };
        let resource = projection.key.object_type.resource_oid;
        let mut existing = None;
        for shadow in self
            .repository
            .search_objects(ctx.tenant_id, ObjectType::Shadow, &query)
            .await?
        {
            if shadow_resource(&shadow)? == Some(resource) {
                existing = Some(shadow);
                break;
            }
        }
        let Some(existing) = existing else {
            return Ok(None);
        };

        match shadow_owner(&existing)? {
            Some(owner) if owner != ctx.focus.oid => Err(ProjectorError::already_exists(
                existing.oid,
                Some(name.to_string()),
                format!(
                    "{} '{name}' on {} is owned by {owner}",
                    ObjectType::Shadow,
                    projection.key
                ),
            )),
            _ => Ok(Some(existing)),
        }
    }
}
