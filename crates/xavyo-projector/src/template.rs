//! Object template processing with bounded iteration.
//!
//! Template mappings are evaluated against the focus; the resulting deltas
//! are applied to a preview and checked for uniqueness against persisted
//! objects. A collision bumps the iteration (and with it the iteration
//! token that mappings can embed) until the preview is unique or the
//! iteration limit is exceeded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use xavyo_delta::{names, IdentityObject, ItemDelta, ItemPath, Oid};

use crate::config::ProjectorConfig;
use crate::context::LensContext;
use crate::definition::{IterationSpecification, ObjectTemplate};
use crate::error::{ProjectorError, Result};
use crate::mapping::{
    Mapping, MappingEvaluator, MappingOutputs, MappingStrength, MappingVariables,
};
use crate::repository::{ObjectQuery, ObjectRepository};
use crate::resolver::DefinitionResolver;
use crate::trace::{TraceEvent, TraceSink};

/// Template with the mappings of all included templates.
#[derive(Debug, Clone)]
pub struct ResolvedTemplate {
    pub template: ObjectTemplate,
    /// Mappings of included templates first, then the template's own.
    pub mappings: Vec<Mapping>,
}

/// Why an iteration was rejected.
#[derive(Debug)]
struct Rejection {
    reason: String,
    conflicting: Option<IdentityObject>,
}

enum Attempt {
    Accepted(Vec<ItemDelta>),
    Rejected(Rejection),
    /// The focus was renamed; the inherited iteration must start over.
    Renamed,
}

/// Applies the focus object template.
pub struct TemplateProcessor {
    repository: Arc<dyn ObjectRepository>,
    resolver: Arc<dyn DefinitionResolver>,
    evaluator: Arc<dyn MappingEvaluator>,
    trace_sink: Arc<dyn TraceSink>,
    config: ProjectorConfig,
}

impl TemplateProcessor {
    pub fn new(
        repository: Arc<dyn ObjectRepository>,
        resolver: Arc<dyn DefinitionResolver>,
        evaluator: Arc<dyn MappingEvaluator>,
        trace_sink: Arc<dyn TraceSink>,
        config: ProjectorConfig,
    ) -> Self {
        Self {
            repository,
            resolver,
            evaluator,
            trace_sink,
            config,
        }
    }

    /// Resolve a template and collect the mappings of its includes.
    ///
    /// # Errors
    ///
    /// Returns a schema error if templates include each other in a cycle,
    /// and not found if a template is missing.
    pub async fn resolve_template(&self, tenant_id: Uuid, oid: Oid) -> Result<ResolvedTemplate> {
        enum Step {
            Enter(Oid),
            Exit(Oid),
        }

        let mut loaded: HashMap<Oid, ObjectTemplate> = HashMap::new();
        let mut on_path: HashSet<Oid> = HashSet::new();
        let mut done: HashSet<Oid> = HashSet::new();
        let mut mappings = Vec::new();
        let mut stack = vec![Step::Enter(oid)];

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(current) => {
                    if on_path.contains(&current) {
                        return Err(ProjectorError::schema(format!(
                            "object template {current} includes itself"
                        )));
                    }
                    if done.contains(&current) {
                        continue;
                    }
                    let template = self.resolver.object_template(tenant_id, current).await?;
                    on_path.insert(current);
                    stack.push(Step::Exit(current));
                    for include in template.includes.iter().rev() {
                        stack.push(Step::Enter(*include));
                    }
                    loaded.insert(current, template);
                }
                Step::Exit(current) => {
                    on_path.remove(&current);
                    done.insert(current);
                    if let Some(template) = loaded.get(&current) {
                        mappings.extend(template.mappings.iter().cloned());
                    }
                }
            }
        }

        let template = loaded
            .remove(&oid)
            .ok_or_else(|| ProjectorError::not_found("object_template", oid))?;
        Ok(ResolvedTemplate { template, mappings })
    }

    /// Apply the focus template for the current wave.
    ///
    /// # Errors
    ///
    /// Returns `ObjectAlreadyExists` naming the conflicting object when no
    /// unique iteration is found within the limit, or a policy violation
    /// when the iteration conditions never hold.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, focus = %ctx.focus.oid, wave = ctx.projection_wave))]
    pub async fn process(&self, ctx: &mut LensContext) -> Result<()> {
        if ctx.focus.is_delete() {
            return Ok(());
        }
        let Some(template_oid) = ctx.focus.template_oid else {
            return Ok(());
        };
        let resolved = self.resolve_template(ctx.tenant_id, template_oid).await?;
        let Some(base) = ctx.focus.object_before_wave(ctx.projection_wave)? else {
            return Ok(());
        };
        let spec = resolved.template.iteration.clone();
        let max_iterations = spec.as_ref().map_or(0, |s| {
            s.max_iterations.unwrap_or(self.config.default_max_iterations)
        });

        loop {
            let iteration = ctx.focus.iteration;
            let token = match &ctx.focus.iteration_token {
                Some(token) => token.clone(),
                None => self.iteration_token(spec.as_ref(), iteration, &base).await?,
            };
            let variables = MappingVariables::for_focus(Some(base.clone()), ctx.focus.old.clone())
                .with_iteration(iteration, token.clone());

            let attempt = self
                .attempt(ctx, &base, &resolved.mappings, spec.as_ref(), &variables)
                .await?;
            let rejection = match attempt {
                Attempt::Renamed => {
                    info!(iteration, "Focus renamed, restarting iteration");
                    ctx.focus.iteration = 0;
                    ctx.focus.iteration_token = None;
                    continue;
                }
                Attempt::Accepted(deltas) => {
                    ctx.progress.iteration_attempts += 1;
                    self.trace_sink
                        .record(
                            ctx.tenant_id,
                            TraceEvent::IterationAttempt {
                                iteration,
                                token: token.clone(),
                                conflict: None,
                            },
                        )
                        .await;
                    let wave = ctx.projection_wave;
                    for delta in deltas {
                        ctx.focus.swallow_to_secondary(wave, delta)?;
                    }
                    ctx.focus.iteration_token = Some(token);
                    debug!(iteration, "Template applied");
                    return Ok(());
                }
                Attempt::Rejected(rejection) => rejection,
            };

            ctx.progress.iteration_attempts += 1;
            self.trace_sink
                .record(
                    ctx.tenant_id,
                    TraceEvent::IterationAttempt {
                        iteration,
                        token,
                        conflict: Some(rejection.reason.clone()),
                    },
                )
                .await;

            if iteration >= max_iterations {
                warn!(
                    iteration,
                    max_iterations,
                    reason = %rejection.reason,
                    "Iteration limit exceeded"
                );
                return Err(match rejection.conflicting {
                    Some(existing) => ProjectorError::already_exists(
                        existing.oid,
                        existing.name().map(str::to_string),
                        format!(
                            "{} after {} iterations: {}",
                            existing.describe(),
                            iteration + 1,
                            rejection.reason
                        ),
                    ),
                    None => ProjectorError::policy_violation(format!(
                        "no acceptable iteration after {} attempts: {}",
                        iteration + 1,
                        rejection.reason
                    )),
                });
            }
            debug!(iteration, reason = %rejection.reason, "Iteration rejected, retrying");
            ctx.focus.iteration = iteration + 1;
            ctx.focus.iteration_token = None;
        }
    }

    async fn attempt(
        &self,
        ctx: &mut LensContext,
        base: &IdentityObject,
        mappings: &[Mapping],
        spec: Option<&IterationSpecification>,
        variables: &MappingVariables,
    ) -> Result<Attempt> {
        if let Some(condition) = spec.and_then(|s| s.pre_condition.as_ref()) {
            if !self.evaluator.evaluate_condition(condition, variables).await? {
                return Ok(Attempt::Rejected(Rejection {
                    reason: "pre-iteration condition not satisfied".to_string(),
                    conflicting: None,
                }));
            }
        }

        let mut deltas = self.evaluate_mappings(ctx, base, mappings, variables).await?;
        if spec.is_some() {
            let iteration = ItemDelta::replace_property(
                ItemPath::name(names::ITERATION),
                [i64::from(variables.iteration)],
            );
            let token = ItemDelta::replace_property(
                ItemPath::name(names::ITERATION_TOKEN),
                [variables.iteration_token.as_str()],
            );
            deltas.push(iteration.narrow(&base.root)?);
            deltas.push(token.narrow(&base.root)?);
        }
        deltas.retain(|d| !d.is_empty());

        let mut preview = base.clone();
        for delta in &deltas {
            delta.apply_to_root(&mut preview.root)?;
        }

        if !ctx.focus.iteration_reset_done {
            ctx.focus.iteration_reset_done = true;
            let old_name = ctx.focus.old.as_ref().and_then(IdentityObject::name);
            if variables.iteration > 0 && old_name.is_some() && preview.name() != old_name {
                return Ok(Attempt::Renamed);
            }
        }

        if let Some((path, existing)) = self.find_conflict(ctx, &preview).await? {
            return Ok(Attempt::Rejected(Rejection {
                reason: format!("'{path}' already used by {}", existing.describe()),
                conflicting: Some(existing),
            }));
        }

        if let Some(condition) = spec.and_then(|s| s.post_condition.as_ref()) {
            let preview_variables = MappingVariables {
                focus: Some(preview),
                ..variables.clone()
            };
            if !self
                .evaluator
                .evaluate_condition(condition, &preview_variables)
                .await?
            {
                return Ok(Attempt::Rejected(Rejection {
                    reason: "post-iteration condition not satisfied".to_string(),
                    conflicting: None,
                }));
            }
        }
        Ok(Attempt::Accepted(deltas))
    }

    /// Evaluate applicable mappings and consolidate them per target.
    async fn evaluate_mappings(
        &self,
        ctx: &LensContext,
        base: &IdentityObject,
        mappings: &[Mapping],
        variables: &MappingVariables,
    ) -> Result<Vec<ItemDelta>> {
        let mut outputs = MappingOutputs::new();
        for mapping in mappings {
            match mapping.strength {
                MappingStrength::Weak if !base.property_values(&mapping.target)?.is_empty() => {
                    continue
                }
                MappingStrength::Normal if ctx.focus.primary_touches(&mapping.target) => continue,
                _ => {}
            }
            let triple = self.evaluator.evaluate_mapping(mapping, variables).await?;
            outputs.add(mapping, triple);
        }
        outputs.into_item_deltas(Some(base))
    }

    async fn iteration_token(
        &self,
        spec: Option<&IterationSpecification>,
        iteration: u32,
        base: &IdentityObject,
    ) -> Result<String> {
        match spec.and_then(|s| s.token_expression.as_ref()) {
            Some(expression) => {
                let variables =
                    MappingVariables::for_focus(Some(base.clone()), None).with_iteration(iteration, "");
                Ok(self
                    .evaluator
                    .evaluate_string(expression, &variables)
                    .await?
                    .unwrap_or_default())
            }
            None if iteration == 0 => Ok(String::new()),
            None => Ok(iteration.to_string()),
        }
    }

    /// First persisted object sharing a unique value with the preview.
    async fn find_conflict(
        &self,
        ctx: &LensContext,
        preview: &IdentityObject,
    ) -> Result<Option<(ItemPath, IdentityObject)>> {
        let paths = std::iter::once(ItemPath::name(names::NAME))
            .chain(self.config.unique_paths.iter().cloned());
        for path in paths {
            for value in preview.property_values(&path)? {
                let query = ObjectQuery::Equal {
                    path: path.clone(),
                    value: value.value,
                }
                .excluding(Some(ctx.focus.oid));
                let found = self
                    .repository
                    .search_objects(ctx.tenant_id, ctx.focus.object_type, &query)
                    .await?;
                if let Some(existing) = found.into_iter().next() {
                    return Ok(Some((path, existing)));
                }
            }
        }
        Ok(None)
    }
}
