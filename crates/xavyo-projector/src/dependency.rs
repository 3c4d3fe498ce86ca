//! Projection dependencies: wave sorting and dependency checks.
//!
//! A projection runs one wave after the latest projection it depends on.
//! Dependencies declared with an order above zero are served by a separate
//! context for the same resource object type, so a projection can be
//! processed both before and after its target.

use std::collections::HashMap;

use tracing::debug;

use crate::context::{LensContext, ProjectionContext};
use crate::error::{ProjectorError, Result};
use crate::types::{DependencyStrictness, ProjectionKey, ProjectionStatus};

/// Create contexts for dependency orders that have none yet.
pub fn split_by_order(ctx: &mut LensContext) {
    let mut created = Vec::new();
    for projection in ctx.projections.iter().filter(|p| p.key.order == 0) {
        let Some(definition) = &projection.definition else {
            continue;
        };
        for order in 1..=definition.max_order() {
            if definition.dependencies_for_order(order).next().is_none() {
                continue;
            }
            let key = projection.key.with_order(order);
            if ctx.find_projection(&key).is_none() {
                debug!(key = %key, "Splitting projection by dependency order");
                created.push(projection.clone_for_order(order));
            }
        }
    }
    ctx.projections.extend(created);
}

/// Index of the context a dependency on `key` resolves to. Ignored
/// contexts do not satisfy dependencies.
fn resolve_target(ctx: &LensContext, key: &ProjectionKey) -> Option<usize> {
    ctx.find_projection(key)
        .filter(|&i| ctx.projections[i].status != ProjectionStatus::Ignore)
}

fn determine_wave(
    ctx: &LensContext,
    index: usize,
    waves: &mut HashMap<usize, u32>,
    path: &mut Vec<usize>,
) -> Result<u32> {
    if let Some(wave) = waves.get(&index) {
        return Ok(*wave);
    }
    let projection = &ctx.projections[index];
    if path.contains(&index) {
        let cycle: Vec<String> = path
            .iter()
            .skip_while(|&&i| i != index)
            .chain(std::iter::once(&index))
            .map(|&i| ctx.projections[i].key.to_string())
            .collect();
        return Err(ProjectorError::policy_violation(format!(
            "circular projection dependency: {}",
            cycle.join(" -> ")
        )));
    }
    path.push(index);

    let mut targets = Vec::new();
    if projection.key.order > 0 {
        let previous = projection.key.with_order(projection.key.order - 1);
        if let Some(target) = resolve_target(ctx, &previous) {
            targets.push(target);
        }
    }
    if !projection.is_delete() {
        for dependency in projection.dependencies() {
            let key = ProjectionKey::new(dependency.target.clone());
            match resolve_target(ctx, &key) {
                Some(target) => targets.push(target),
                None if dependency.strictness == DependencyStrictness::Strict => {
                    return Err(ProjectorError::policy_violation(format!(
                        "projection {} strictly depends on {}, which is not projected",
                        projection.key, dependency.target
                    )));
                }
                None => debug!(
                    key = %projection.key,
                    target = %dependency.target,
                    strictness = %dependency.strictness,
                    "Ignoring unsatisfied dependency"
                ),
            }
        }
    }

    let mut wave = projection.min_wave;
    for target in targets {
        let target_wave = determine_wave(ctx, target, waves, path)?;
        wave = wave.max(target_wave + 1);
    }

    path.pop();
    waves.insert(index, wave);
    Ok(wave)
}

/// Assign every participating projection to a wave and compute the number
/// of waves. Returns the new `max_waves`.
///
/// # Errors
///
/// Returns a policy violation for circular dependencies and for strict
/// dependencies on projections that are not part of the context, and a
/// configuration error when the waves exceed `max_waves_cap`.
pub fn sort_projections_to_waves(ctx: &mut LensContext, max_waves_cap: u32) -> Result<u32> {
    let mut waves = HashMap::new();
    for index in 0..ctx.projections.len() {
        if ctx.projections[index].status == ProjectionStatus::Ignore {
            continue;
        }
        determine_wave(ctx, index, &mut waves, &mut Vec::new())?;
    }

    let mut max_wave = 0;
    for (index, projection) in ctx.projections.iter_mut().enumerate() {
        projection.wave = waves.get(&index).copied();
        if let Some(wave) = projection.wave {
            max_wave = max_wave.max(wave);
        }
    }

    let max_waves = max_wave + 2;
    if max_waves > max_waves_cap {
        return Err(ProjectorError::configuration(format!(
            "projection needs {max_waves} waves, more than the configured cap of {max_waves_cap}"
        )));
    }
    ctx.max_waves = max_waves;
    Ok(max_waves)
}

/// Reason why a projection cannot be processed because a strict dependency
/// is no longer satisfied, if any. Targets being deleted are left to the
/// final check.
#[must_use]
pub fn unsatisfied_dependency(ctx: &LensContext, projection: &ProjectionContext) -> Option<String> {
    if projection.is_delete() {
        return None;
    }
    for dependency in projection.dependencies() {
        if dependency.strictness != DependencyStrictness::Strict {
            continue;
        }
        let key = ProjectionKey::new(dependency.target.clone());
        let reason = match ctx.projection(&key) {
            None => Some("is not projected"),
            Some(target) if target.is_broken() => Some("is broken"),
            Some(target) if target.status == ProjectionStatus::Ignore => Some("is not projected"),
            Some(target) if !target.is_delete() && !target.is_provisioned_or_pending() => {
                Some("is not provisioned")
            }
            Some(_) => None,
        };
        if let Some(reason) = reason {
            return Some(format!("dependency {} {reason}", dependency.target));
        }
    }
    None
}

/// Check every dependency after the last wave.
///
/// # Errors
///
/// Returns a policy violation if a projection others strictly depend on is
/// being deleted, or if a strict or relaxed dependency is not provisioned.
pub fn check_final_dependencies(ctx: &LensContext) -> Result<()> {
    for dependent in &ctx.projections {
        if dependent.is_broken() || dependent.is_delete() || dependent.status == ProjectionStatus::Ignore
        {
            continue;
        }
        for dependency in dependent.dependencies() {
            let key = ProjectionKey::new(dependency.target.clone());
            let target = ctx.projection(&key);

            if let Some(target) = target.filter(|t| t.is_delete()) {
                if dependency.strictness == DependencyStrictness::Strict {
                    return Err(ProjectorError::policy_violation(format!(
                        "cannot remove projection {}: {} strictly depends on it",
                        target.key, dependent.key
                    )));
                }
                continue;
            }

            let satisfied = target.is_some_and(|t| {
                !t.is_broken()
                    && t.status != ProjectionStatus::Ignore
                    && t.is_provisioned_or_pending()
            });
            if !satisfied && dependency.strictness != DependencyStrictness::Lax {
                return Err(ProjectorError::policy_violation(format!(
                    "projection {} depends ({}) on {}, which was not provisioned",
                    dependent.key, dependency.strictness, dependency.target
                )));
            }
        }
    }
    Ok(())
}
