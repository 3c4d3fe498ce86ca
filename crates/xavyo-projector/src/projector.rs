//! The projector: wave-based computation of secondary deltas.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use xavyo_delta::ObjectType;

use crate::activation::process_focus_activation;
use crate::config::ProjectorConfig;
use crate::context::{LensContext, TraceOutcome};
use crate::dependency::{
    check_final_dependencies, sort_projections_to_waves, split_by_order, unsatisfied_dependency,
};
use crate::error::Result;
use crate::mapping::MappingEvaluator;
use crate::password::process_password_policy;
use crate::projection::{apply_policy_decisions, ProjectionProcessor};
use crate::repository::ObjectRepository;
use crate::resolver::DefinitionResolver;
use crate::template::TemplateProcessor;
use crate::trace::{NoopTraceSink, TraceEvent, TraceSink};
use crate::types::ProjectionStatus;

/// Computes what a change request means for the focus and its projections.
///
/// The projector never persists anything: it reads through the repository
/// and resolver and leaves its results as secondary deltas on the
/// [`LensContext`].
pub struct Projector {
    repository: Arc<dyn ObjectRepository>,
    resolver: Arc<dyn DefinitionResolver>,
    evaluator: Arc<dyn MappingEvaluator>,
    trace_sink: Arc<dyn TraceSink>,
    config: ProjectorConfig,
}

impl Projector {
    /// Create a projector with the default configuration and no trace sink.
    pub fn new(
        repository: Arc<dyn ObjectRepository>,
        resolver: Arc<dyn DefinitionResolver>,
        evaluator: Arc<dyn MappingEvaluator>,
    ) -> Self {
        Self {
            repository,
            resolver,
            evaluator,
            trace_sink: Arc::new(NoopTraceSink),
            config: ProjectorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ProjectorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_trace_sink(mut self, trace_sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = trace_sink;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    /// Project the change described by `ctx`.
    ///
    /// On failure the error is recorded on the context's operation trace and
    /// returned; the context keeps whatever was computed up to that point.
    ///
    /// # Errors
    ///
    /// Returns schema, policy violation, not found, already exists,
    /// expression and collaborator errors. Projections whose strict
    /// dependencies fail mid-run are marked broken instead.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, focus = %ctx.focus.oid))]
    pub async fn project(&self, ctx: &mut LensContext) -> Result<()> {
        self.trace_sink
            .record(
                ctx.tenant_id,
                TraceEvent::ProjectionStarted {
                    focus_oid: ctx.focus.oid,
                    projections: ctx.projections.len(),
                },
            )
            .await;

        let result = self.project_inner(ctx).await;
        let error = match &result {
            Ok(()) => {
                ctx.record_operation("project", TraceOutcome::Success);
                info!(
                    waves = ctx.progress.waves,
                    processed = ctx.progress.projections_processed,
                    broken = ctx.progress.projections_broken,
                    "Projection finished"
                );
                None
            }
            Err(e) => {
                ctx.record_operation(
                    "project",
                    TraceOutcome::Failure {
                        message: e.to_string(),
                    },
                );
                warn!(error = %e, wave = ctx.projection_wave, "Projection failed");
                Some(e.to_string())
            }
        };
        self.trace_sink
            .record(
                ctx.tenant_id,
                TraceEvent::ProjectionFinished {
                    success: error.is_none(),
                    error,
                },
            )
            .await;
        result
    }

    async fn project_inner(&self, ctx: &mut LensContext) -> Result<()> {
        ctx.normalize();
        ctx.projection_wave = 0;
        ctx.fresh = false;
        ctx.conflicting.clear();

        self.load(ctx).await?;
        self.check_password_policy(ctx).await?;
        apply_policy_decisions(ctx);
        split_by_order(ctx);
        let max_waves = sort_projections_to_waves(ctx, self.config.max_waves_cap)?;
        debug!(max_waves, "Projections sorted into waves");
        self.trace_sink
            .record(ctx.tenant_id, TraceEvent::WavesDetermined { max_waves })
            .await;

        let templates = TemplateProcessor::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.resolver),
            Arc::clone(&self.evaluator),
            Arc::clone(&self.trace_sink),
            self.config.clone(),
        );
        let projections = ProjectionProcessor::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.evaluator),
            Arc::clone(&self.trace_sink),
            self.config.clone(),
        );

        while ctx.projection_wave < ctx.max_waves {
            let wave = ctx.projection_wave;
            debug!(wave, max_waves = ctx.max_waves, "Wave started");
            self.trace_sink
                .record(ctx.tenant_id, TraceEvent::WaveStarted { wave })
                .await;

            templates.process(ctx).await?;
            process_focus_activation(ctx)?;
            ctx.focus.recompute()?;
            sort_projections_to_waves(ctx, self.config.max_waves_cap)?;

            for index in ctx.projections_in_wave(wave) {
                if let Some(reason) = unsatisfied_dependency(ctx, &ctx.projections[index]) {
                    let key = ctx.projections[index].key.clone();
                    warn!(key = %key, reason = %reason, "Projection broken");
                    ctx.projections[index].mark_broken(reason.clone());
                    ctx.progress.projections_broken += 1;
                    self.trace_sink
                        .record(ctx.tenant_id, TraceEvent::ProjectionBroken { key, reason })
                        .await;
                    continue;
                }
                projections.process(ctx, index).await?;
            }

            let conflicting = std::mem::take(&mut ctx.conflicting);
            if !conflicting.is_empty() {
                for linked in conflicting {
                    match ctx.find_projection(&linked.key) {
                        Some(i) if ctx.projections[i].status == ProjectionStatus::Ignore => {
                            ctx.projections[i] = linked;
                        }
                        _ => ctx.projections.push(linked),
                    }
                }
                sort_projections_to_waves(ctx, self.config.max_waves_cap)?;
            }

            ctx.progress.waves += 1;
            self.trace_sink
                .record(ctx.tenant_id, TraceEvent::WaveFinished { wave })
                .await;
            ctx.projection_wave += 1;
        }

        ctx.normalize();
        ctx.focus.recompute()?;
        if self.config.check_final_dependencies {
            check_final_dependencies(ctx)?;
        }
        ctx.fresh = true;
        Ok(())
    }

    /// Load the focus, projection definitions and linked shadows that the
    /// caller did not supply.
    async fn load(&self, ctx: &mut LensContext) -> Result<()> {
        if !ctx.focus.is_add() && ctx.focus.current.is_none() {
            let current = self
                .repository
                .get_object(ctx.tenant_id, ctx.focus.object_type, ctx.focus.oid)
                .await?;
            ctx.focus.set_current(current);
        }

        for index in 0..ctx.projections.len() {
            if ctx.projections[index].definition.is_none() {
                let object_type = ctx.projections[index].key.object_type.clone();
                ctx.projections[index].definition = self
                    .resolver
                    .projection_definition(ctx.tenant_id, &object_type)
                    .await?;
            }

            let projection = &ctx.projections[index];
            let Some(shadow_oid) = projection.shadow_oid.filter(|_| projection.current.is_none())
            else {
                continue;
            };
            match self
                .repository
                .get_object(ctx.tenant_id, ObjectType::Shadow, shadow_oid)
                .await
            {
                Ok(shadow) => ctx.projections[index].set_current(shadow),
                Err(e) if e.is_not_found() => {
                    warn!(shadow = %shadow_oid, "Linked shadow no longer exists");
                    ctx.projections[index].shadow_oid = None;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn check_password_policy(&self, ctx: &LensContext) -> Result<()> {
        let Some(template_oid) = ctx.focus.template_oid else {
            return Ok(());
        };
        let template = self
            .resolver
            .object_template(ctx.tenant_id, template_oid)
            .await?;
        let Some(policy_oid) = template.password_policy else {
            return Ok(());
        };
        let policy = self.resolver.value_policy(ctx.tenant_id, policy_oid).await?;
        process_password_policy(ctx, &policy)
    }
}
