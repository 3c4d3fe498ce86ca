//! Per-request projection state.
//!
//! A [`LensContext`] is created by the caller for one change request, owned
//! exclusively by it and mutated by the projector across waves. Nothing in
//! it is shared between requests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use xavyo_delta::{
    names, IdentityObject, ItemDelta, ItemPath, ObjectDelta, ObjectType, Oid, RealValue,
};

use crate::definition::ProjectionDefinition;
use crate::error::{ProjectorError, Result};
use crate::types::{
    PolicyDecision, ProjectionDependency, ProjectionKey, ProjectionStatus, ResourceObjectType,
    SynchronizationIntent,
};

// ============================================================================
// Progress and trace
// ============================================================================

/// Counters accumulated while projecting. Threaded through the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectionProgress {
    pub waves: u32,
    pub projections_processed: u32,
    pub projections_broken: u32,
    pub iteration_attempts: u32,
    pub conflicts: u32,
}

/// Outcome of a traced operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TraceOutcome {
    Success,
    Failure { message: String },
}

/// One entry of the operation trace kept on the context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTraceEntry {
    pub operation: String,
    pub wave: u32,
    pub outcome: TraceOutcome,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Focus
// ============================================================================

/// State of the focus object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusContext {
    pub object_type: ObjectType,
    /// Oid of the focus; pre-generated for new objects.
    pub oid: Oid,
    /// Object as the request first saw it.
    pub old: Option<IdentityObject>,
    /// Object as currently persisted.
    pub current: Option<IdentityObject>,
    /// Object after primary and secondary deltas.
    pub new: Option<IdentityObject>,
    /// Change requested by the caller.
    pub primary_delta: Option<ObjectDelta>,
    /// Changes computed by the projector, per wave.
    pub secondary_deltas: BTreeMap<u32, ObjectDelta>,
    pub iteration: u32,
    pub iteration_token: Option<String>,
    /// Set once an inherited iteration was reset after a rename.
    #[serde(default)]
    pub(crate) iteration_reset_done: bool,
    pub template_oid: Option<Oid>,
    pub fresh: bool,
}

impl FocusContext {
    /// Focus being created by the caller.
    #[must_use]
    pub fn for_add(mut object: IdentityObject) -> Self {
        let oid = *object.oid.get_or_insert_with(Oid::new);
        let object_type = object.object_type;
        Self {
            object_type,
            oid,
            old: None,
            current: None,
            new: None,
            primary_delta: Some(ObjectDelta::add(object)),
            secondary_deltas: BTreeMap::new(),
            iteration: 0,
            iteration_token: None,
            iteration_reset_done: false,
            template_oid: None,
            fresh: false,
        }
    }

    /// Existing focus changed by `delta` (a MODIFY or DELETE). The current
    /// object is loaded by the projector when not supplied.
    ///
    /// # Errors
    ///
    /// Returns an illegal state error if the delta is an ADD or has no oid.
    pub fn for_change(delta: ObjectDelta) -> Result<Self> {
        let Some(oid) = delta.oid() else {
            return Err(ProjectorError::Delta(xavyo_delta::DeltaError::illegal_state(
                "focus delta has no oid",
            )));
        };
        if delta.is_add() {
            return Err(ProjectorError::Delta(xavyo_delta::DeltaError::illegal_state(
                "use FocusContext::for_add for new objects",
            )));
        }
        Ok(Self {
            object_type: delta.object_type(),
            oid,
            old: None,
            current: None,
            new: None,
            primary_delta: Some(delta),
            secondary_deltas: BTreeMap::new(),
            iteration: 0,
            iteration_token: None,
            iteration_reset_done: false,
            template_oid: None,
            fresh: false,
        })
    }

    /// Existing focus recomputed without an explicit change.
    #[must_use]
    pub fn for_recompute(object_type: ObjectType, oid: Oid) -> Self {
        Self {
            object_type,
            oid,
            old: None,
            current: None,
            new: None,
            primary_delta: None,
            secondary_deltas: BTreeMap::new(),
            iteration: 0,
            iteration_token: None,
            iteration_reset_done: false,
            template_oid: None,
            fresh: false,
        }
    }

    /// Supply the current object (skips loading).
    #[must_use]
    pub fn with_current(mut self, current: IdentityObject) -> Self {
        self.set_current(current);
        self
    }

    #[must_use]
    pub fn with_template(mut self, template_oid: Oid) -> Self {
        self.template_oid = Some(template_oid);
        self
    }

    /// Set the current object and pick up its stored iteration state.
    pub fn set_current(&mut self, current: IdentityObject) {
        let iteration = current
            .root
            .property_value(names::ITERATION)
            .and_then(RealValue::as_integer)
            .and_then(|i| u32::try_from(i).ok());
        if let Some(iteration) = iteration {
            self.iteration = iteration;
            self.iteration_token = current
                .root
                .property_value(names::ITERATION_TOKEN)
                .and_then(RealValue::as_str)
                .map(str::to_string);
        }
        if self.old.is_none() {
            self.old = Some(current.clone());
        }
        self.current = Some(current);
        self.fresh = true;
    }

    #[must_use]
    pub fn is_add(&self) -> bool {
        self.primary_delta.as_ref().is_some_and(ObjectDelta::is_add)
    }

    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.primary_delta.as_ref().is_some_and(ObjectDelta::is_delete)
    }

    /// Name of the focus after the change.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.new
            .as_ref()
            .or(self.current.as_ref())
            .and_then(IdentityObject::name)
    }

    /// Whether the primary delta touches `path` (or a parent or child).
    #[must_use]
    pub fn primary_touches(&self, path: &ItemPath) -> bool {
        self.primary_delta
            .as_ref()
            .is_some_and(|d| d.has_related_delta(path))
    }

    /// Secondary delta of a wave.
    #[must_use]
    pub fn secondary_delta(&self, wave: u32) -> Option<&ObjectDelta> {
        self.secondary_deltas.get(&wave)
    }

    /// Fold an item delta into the secondary delta of `wave`.
    ///
    /// # Errors
    ///
    /// Propagates merge errors.
    pub fn swallow_to_secondary(&mut self, wave: u32, delta: ItemDelta) -> Result<()> {
        let object_type = self.object_type;
        let oid = self.oid;
        self.secondary_deltas
            .entry(wave)
            .or_insert_with(|| ObjectDelta::modify(object_type, oid))
            .swallow(delta)?;
        Ok(())
    }

    /// Primary delta followed by all secondary deltas, summarized.
    ///
    /// # Errors
    ///
    /// Propagates merge errors.
    pub fn summary_delta(&self) -> Result<Option<ObjectDelta>> {
        let deltas = self
            .primary_delta
            .iter()
            .chain(self.secondary_deltas.values())
            .cloned();
        Ok(ObjectDelta::summarize(deltas)?)
    }

    /// Object after the primary delta and the secondary deltas of waves
    /// before `wave`.
    ///
    /// # Errors
    ///
    /// Returns an error if a delta cannot be applied.
    pub fn object_before_wave(&self, wave: u32) -> Result<Option<IdentityObject>> {
        let base = match &self.primary_delta {
            Some(delta) => delta.compute_changed_object(self.current.as_ref())?,
            None => self.current.clone(),
        };
        let Some(mut object) = base else {
            return Ok(None);
        };
        for delta in self.secondary_deltas.range(..wave).map(|(_, d)| d) {
            delta.apply_to(&mut object)?;
        }
        Ok(Some(object))
    }

    /// Recompute `new` from the current object and all deltas.
    ///
    /// # Errors
    ///
    /// Returns an error if a delta cannot be applied.
    pub fn recompute(&mut self) -> Result<()> {
        self.new = self.object_before_wave(u32::MAX)?;
        Ok(())
    }

    /// Normalize all deltas.
    pub fn normalize(&mut self) {
        if let Some(delta) = &mut self.primary_delta {
            delta.normalize();
        }
        for delta in self.secondary_deltas.values_mut() {
            delta.normalize();
        }
        self.secondary_deltas.retain(|_, d| !d.is_empty());
    }
}

// ============================================================================
// Projections
// ============================================================================

/// State of one projection of the focus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionContext {
    pub key: ProjectionKey,
    /// Oid of the linked shadow, if any.
    pub shadow_oid: Option<Oid>,
    pub old: Option<IdentityObject>,
    pub current: Option<IdentityObject>,
    pub new: Option<IdentityObject>,
    pub primary_delta: Option<ObjectDelta>,
    pub secondary_delta: Option<ObjectDelta>,
    pub synchronization_intent: Option<SynchronizationIntent>,
    pub policy_decision: Option<PolicyDecision>,
    /// Whether an assignment demands this projection.
    pub assigned: bool,
    /// Whether execution already provisioned this projection.
    pub provisioned: bool,
    pub wave: Option<u32>,
    /// Earliest wave this context may run in.
    pub min_wave: u32,
    pub status: ProjectionStatus,
    pub broken_reason: Option<String>,
    pub fresh: bool,
    pub do_reconciliation: bool,
    pub definition: Option<ProjectionDefinition>,
}

impl ProjectionContext {
    /// Projection of the given object type, not yet linked to a shadow.
    #[must_use]
    pub fn new(object_type: ResourceObjectType) -> Self {
        Self {
            key: ProjectionKey::new(object_type),
            shadow_oid: None,
            old: None,
            current: None,
            new: None,
            primary_delta: None,
            secondary_delta: None,
            synchronization_intent: None,
            policy_decision: None,
            assigned: false,
            provisioned: false,
            wave: None,
            min_wave: 0,
            status: ProjectionStatus::Normal,
            broken_reason: None,
            fresh: false,
            do_reconciliation: false,
            definition: None,
        }
    }

    /// Projection demanded by an assignment.
    #[must_use]
    pub fn assigned(object_type: ResourceObjectType) -> Self {
        Self {
            assigned: true,
            ..Self::new(object_type)
        }
    }

    #[must_use]
    pub fn with_shadow(mut self, shadow_oid: Oid) -> Self {
        self.shadow_oid = Some(shadow_oid);
        self
    }

    #[must_use]
    pub fn with_current(mut self, shadow: IdentityObject) -> Self {
        self.set_current(shadow);
        self
    }

    #[must_use]
    pub fn with_intent(mut self, intent: SynchronizationIntent) -> Self {
        self.synchronization_intent = Some(intent);
        self
    }

    #[must_use]
    pub fn with_definition(mut self, definition: ProjectionDefinition) -> Self {
        self.definition = Some(definition);
        self
    }

    #[must_use]
    pub fn provisioned(mut self) -> Self {
        self.provisioned = true;
        self
    }

    pub fn set_current(&mut self, shadow: IdentityObject) {
        self.shadow_oid = shadow.oid.or(self.shadow_oid);
        if self.old.is_none() {
            self.old = Some(shadow.clone());
        }
        self.current = Some(shadow);
        self.fresh = true;
    }

    /// Whether the projection is going away.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.policy_decision.is_some_and(|d| d.is_removal())
            || self.primary_delta.as_ref().is_some_and(ObjectDelta::is_delete)
            || matches!(
                self.synchronization_intent,
                Some(SynchronizationIntent::Delete | SynchronizationIntent::Unlink)
            )
    }

    /// Whether the projection exists on the resource or is being created.
    #[must_use]
    pub fn is_provisioned_or_pending(&self) -> bool {
        self.provisioned
            || self.current.is_some()
            || self.policy_decision == Some(PolicyDecision::Add)
    }

    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.status == ProjectionStatus::Broken
    }

    /// Whether the context takes part in wave processing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ProjectionStatus::Normal
    }

    /// Exclude from further waves.
    pub fn mark_broken(&mut self, reason: impl Into<String>) {
        self.status = ProjectionStatus::Broken;
        self.broken_reason = Some(reason.into());
    }

    /// Declared dependencies applying to this context's order.
    #[must_use]
    pub fn dependencies(&self) -> Vec<ProjectionDependency> {
        self.definition
            .as_ref()
            .map(|d| d.dependencies_for_order(self.key.order).cloned().collect())
            .unwrap_or_default()
    }

    /// Another context for the same resource object, processed later under
    /// a different order.
    #[must_use]
    pub fn clone_for_order(&self, order: u32) -> Self {
        Self {
            key: self.key.with_order(order),
            shadow_oid: self.shadow_oid,
            old: self.old.clone(),
            current: self.current.clone(),
            new: None,
            primary_delta: None,
            secondary_delta: None,
            synchronization_intent: self.synchronization_intent,
            policy_decision: self.policy_decision,
            assigned: self.assigned,
            provisioned: self.provisioned,
            wave: None,
            min_wave: 0,
            status: ProjectionStatus::Normal,
            broken_reason: None,
            fresh: self.fresh,
            do_reconciliation: self.do_reconciliation,
            definition: self.definition.clone(),
        }
    }

    /// Fold an item delta into the secondary delta. A projection being
    /// created gets it folded into its ADD snapshot.
    ///
    /// # Errors
    ///
    /// Returns an illegal state error if there is no delta to fold into and
    /// no shadow oid to create a MODIFY for.
    pub fn swallow_to_secondary(&mut self, delta: ItemDelta) -> Result<()> {
        if self.secondary_delta.is_none() {
            let Some(oid) = self.shadow_oid else {
                return Err(ProjectorError::Delta(xavyo_delta::DeltaError::illegal_state(
                    format!("projection {} has no shadow to modify", self.key),
                )));
            };
            self.secondary_delta = Some(ObjectDelta::modify(ObjectType::Shadow, oid));
        }
        if let Some(secondary) = &mut self.secondary_delta {
            secondary.swallow(delta)?;
        }
        Ok(())
    }

    /// Recompute `new` from the current object and deltas.
    ///
    /// # Errors
    ///
    /// Returns an error if a delta cannot be applied.
    pub fn recompute(&mut self) -> Result<()> {
        let mut object = self.current.clone();
        for delta in self.primary_delta.iter().chain(self.secondary_delta.iter()) {
            object = delta.compute_changed_object(object.as_ref())?;
        }
        self.new = object;
        Ok(())
    }

    pub fn normalize(&mut self) {
        for delta in self
            .primary_delta
            .iter_mut()
            .chain(self.secondary_delta.iter_mut())
        {
            delta.normalize();
        }
        if self.secondary_delta.as_ref().is_some_and(ObjectDelta::is_empty) {
            self.secondary_delta = None;
        }
    }
}

// ============================================================================
// Lens context
// ============================================================================

/// Everything the projector needs for one change request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LensContext {
    pub tenant_id: Uuid,
    pub focus: FocusContext,
    pub projections: Vec<ProjectionContext>,
    pub projection_wave: u32,
    pub max_waves: u32,
    pub fresh: bool,
    /// Reference time for validity evaluation.
    pub now: DateTime<Utc>,
    pub progress: ProjectionProgress,
    pub operation_trace: Vec<OperationTraceEntry>,
    /// Conflicting projections discovered in the current wave.
    #[serde(skip)]
    pub(crate) conflicting: Vec<ProjectionContext>,
}

impl LensContext {
    #[must_use]
    pub fn new(tenant_id: Uuid, focus: FocusContext) -> Self {
        Self {
            tenant_id,
            focus,
            projections: Vec::new(),
            projection_wave: 0,
            max_waves: 0,
            fresh: false,
            now: Utc::now(),
            progress: ProjectionProgress::default(),
            operation_trace: Vec::new(),
            conflicting: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_projection(mut self, projection: ProjectionContext) -> Self {
        self.projections.push(projection);
        self
    }

    #[must_use]
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Index of the context with exactly this key.
    #[must_use]
    pub fn find_projection(&self, key: &ProjectionKey) -> Option<usize> {
        self.projections.iter().position(|p| &p.key == key)
    }

    /// Borrow the context with exactly this key.
    #[must_use]
    pub fn projection(&self, key: &ProjectionKey) -> Option<&ProjectionContext> {
        self.find_projection(key).map(|i| &self.projections[i])
    }

    /// Indexes of active contexts assigned to `wave`.
    #[must_use]
    pub fn projections_in_wave(&self, wave: u32) -> Vec<usize> {
        self.projections
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_active() && p.wave == Some(wave))
            .map(|(i, _)| i)
            .collect()
    }

    /// Normalize all deltas.
    pub fn normalize(&mut self) {
        self.focus.normalize();
        for projection in &mut self.projections {
            projection.normalize();
        }
    }

    pub(crate) fn record_operation(&mut self, operation: impl Into<String>, outcome: TraceOutcome) {
        self.operation_trace.push(OperationTraceEntry {
            operation: operation.into(),
            wave: self.projection_wave,
            outcome,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> IdentityObject {
        IdentityObject::new(ObjectType::User).with_property(names::NAME, name)
    }

    #[test]
    fn test_for_add_pregenerates_oid() {
        let focus = FocusContext::for_add(user("jack"));
        assert!(focus.is_add());
        let added = focus.primary_delta.as_ref().unwrap().object_to_add().unwrap();
        assert_eq!(added.oid, Some(focus.oid));
    }

    #[test]
    fn test_for_change_rejects_add() {
        assert!(FocusContext::for_change(ObjectDelta::add(user("jack").with_oid(Oid::new()))).is_err());
    }

    #[test]
    fn test_secondary_deltas_per_wave() {
        let oid = Oid::new();
        let current = user("jack").with_oid(oid);
        let mut focus = FocusContext::for_recompute(ObjectType::User, oid).with_current(current);

        focus
            .swallow_to_secondary(0, ItemDelta::replace_property(ItemPath::name("fullName"), ["Jack"]))
            .unwrap();
        focus
            .swallow_to_secondary(1, ItemDelta::replace_property(ItemPath::name("title"), ["Captain"]))
            .unwrap();

        let before_one = focus.object_before_wave(1).unwrap().unwrap();
        assert!(before_one.root.item("fullName").is_some());
        assert!(before_one.root.item("title").is_none());

        focus.recompute().unwrap();
        assert!(focus.new.as_ref().unwrap().root.item("title").is_some());

        let summary = focus.summary_delta().unwrap().unwrap();
        assert_eq!(summary.modifications().len(), 2);
    }

    #[test]
    fn test_set_current_reads_iteration() {
        let oid = Oid::new();
        let current = user("jack1")
            .with_oid(oid)
            .with_property(names::ITERATION, 1_i64)
            .with_property(names::ITERATION_TOKEN, "1");
        let focus = FocusContext::for_recompute(ObjectType::User, oid).with_current(current);
        assert_eq!(focus.iteration, 1);
        assert_eq!(focus.iteration_token.as_deref(), Some("1"));
        assert!(focus.old.is_some());
    }

    #[test]
    fn test_projection_clone_for_order() {
        let resource = Oid::new();
        let projection = ProjectionContext::assigned(ResourceObjectType::account(resource))
            .with_intent(SynchronizationIntent::Add);
        let clone = projection.clone_for_order(1);
        assert_eq!(clone.key.order, 1);
        assert!(clone.assigned);
        assert_eq!(clone.synchronization_intent, Some(SynchronizationIntent::Add));
        assert!(clone.wave.is_none());
        assert_eq!(clone.key.object_type, projection.key.object_type);
    }

    #[test]
    fn test_projection_swallow_requires_shadow() {
        let mut projection = ProjectionContext::new(ResourceObjectType::account(Oid::new()));
        let delta = ItemDelta::replace_property(ItemPath::from_names(["attributes", "uid"]), ["x"]);
        assert!(projection.swallow_to_secondary(delta.clone()).is_err());

        let mut projection = projection.with_shadow(Oid::new());
        projection.swallow_to_secondary(delta).unwrap();
        assert!(projection.secondary_delta.as_ref().unwrap().is_modify());
    }
}
