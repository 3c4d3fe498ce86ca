//! Integration tests for dependency waves.
//!
//! These tests run the full projector over projections that depend on each
//! other and check wave assignment, broken propagation and the final
//! dependency check.

mod common;

use xavyo_delta::ObjectType;
use xavyo_projector::context::FocusContext;
use xavyo_projector::{
    LensContext, ProjectionContext, ProjectionDefinition, ProjectionDependency,
    ProjectionStatus, ProjectorConfig, TraceEvent, TraceOutcome,
};

use common::{account_definition, user, TestContext};

/// Chain of three account definitions: the second strictly depends on the
/// first, the third on the second.
async fn chain(ctx: &TestContext) -> [ProjectionDefinition; 3] {
    let p0 = account_definition();
    let p1 = account_definition()
        .with_dependency(ProjectionDependency::strict(p0.object_type.clone()));
    let p2 = account_definition()
        .with_dependency(ProjectionDependency::strict(p1.object_type.clone()));
    [
        ctx.add_definition(ctx.tenant_a, p0).await,
        ctx.add_definition(ctx.tenant_a, p1).await,
        ctx.add_definition(ctx.tenant_a, p2).await,
    ]
}

// ============================================================================
// Wave assignment
// ============================================================================

/// Given a new user assigned three chained accounts
/// When the change is projected
/// Then the accounts run in waves 0, 1 and 2 and every account is created
#[tokio::test]
async fn test_chained_projections_run_in_successive_waves() {
    let ctx = TestContext::new();
    let [p0, p1, p2] = chain(&ctx).await;

    let mut lens = LensContext::new(ctx.tenant_a, FocusContext::for_add(user("jack")))
        .with_projection(ProjectionContext::assigned(p2.object_type.clone()))
        .with_projection(ProjectionContext::assigned(p0.object_type.clone()))
        .with_projection(ProjectionContext::assigned(p1.object_type.clone()));

    ctx.projector()
        .project(&mut lens)
        .await
        .expect("Projection failed");

    let wave_of = |definition: &ProjectionDefinition| {
        lens.projections
            .iter()
            .find(|p| p.key.object_type == definition.object_type)
            .and_then(|p| p.wave)
    };
    assert_eq!(wave_of(&p0), Some(0));
    assert_eq!(wave_of(&p1), Some(1));
    assert_eq!(wave_of(&p2), Some(2));
    assert_eq!(lens.max_waves, 4);
    assert_eq!(lens.progress.waves, 4);
    assert_eq!(lens.progress.projections_processed, 3);
    assert!(lens.fresh);
    for projection in &lens.projections {
        assert!(projection
            .secondary_delta
            .as_ref()
            .is_some_and(|d| d.is_add()));
    }
    assert_eq!(
        lens.operation_trace.last().map(|e| e.outcome.clone()),
        Some(TraceOutcome::Success)
    );
}

/// Given two accounts that strictly depend on each other
/// When the change is projected
/// Then projection fails with a policy violation naming the cycle
#[tokio::test]
async fn test_circular_dependency_is_rejected() {
    let ctx = TestContext::new();
    let mut first = account_definition();
    let second = account_definition()
        .with_dependency(ProjectionDependency::strict(first.object_type.clone()));
    first = first.with_dependency(ProjectionDependency::strict(second.object_type.clone()));
    ctx.add_definition(ctx.tenant_a, first.clone()).await;
    ctx.add_definition(ctx.tenant_a, second.clone()).await;

    let mut lens = LensContext::new(ctx.tenant_a, FocusContext::for_add(user("jack")))
        .with_projection(ProjectionContext::assigned(first.object_type.clone()))
        .with_projection(ProjectionContext::assigned(second.object_type.clone()));

    let err = ctx.projector().project(&mut lens).await.unwrap_err();

    assert!(err.is_policy_violation());
    assert!(err.to_string().contains("circular"));
    assert!(matches!(
        lens.operation_trace.last().map(|e| &e.outcome),
        Some(TraceOutcome::Failure { .. })
    ));
}

/// Given a wave cap lower than the waves a chain needs
/// When the change is projected
/// Then projection fails with a configuration error
#[tokio::test]
async fn test_wave_cap_is_enforced() {
    let ctx = TestContext::new();
    let [p0, p1, p2] = chain(&ctx).await;
    let config = ProjectorConfig {
        max_waves_cap: 3,
        ..ProjectorConfig::default()
    };

    let mut lens = LensContext::new(ctx.tenant_a, FocusContext::for_add(user("jack")))
        .with_projection(ProjectionContext::assigned(p0.object_type.clone()))
        .with_projection(ProjectionContext::assigned(p1.object_type.clone()))
        .with_projection(ProjectionContext::assigned(p2.object_type.clone()));

    let err = ctx.projector_with(config).project(&mut lens).await.unwrap_err();
    assert!(err.to_string().contains("cap"));
}

// ============================================================================
// Broken dependencies
// ============================================================================

/// Given a chain whose middle account is already broken
/// When the change is projected
/// Then the dependent account is marked broken and projection still succeeds
#[tokio::test]
async fn test_broken_dependency_breaks_dependent_without_failing() {
    let ctx = TestContext::new();
    let [p0, p1, p2] = chain(&ctx).await;

    let mut broken = ProjectionContext::assigned(p1.object_type.clone());
    broken.mark_broken("connector unreachable");
    let mut lens = LensContext::new(ctx.tenant_a, FocusContext::for_add(user("jack")))
        .with_projection(ProjectionContext::assigned(p0.object_type.clone()))
        .with_projection(broken)
        .with_projection(ProjectionContext::assigned(p2.object_type.clone()));

    ctx.projector()
        .project(&mut lens)
        .await
        .expect("Projection failed");

    let dependent = lens
        .projections
        .iter()
        .find(|p| p.key.object_type == p2.object_type)
        .expect("dependent projection");
    assert_eq!(dependent.status, ProjectionStatus::Broken);
    assert!(dependent.secondary_delta.is_none());
    assert_eq!(lens.progress.projections_broken, 1);
    assert_eq!(lens.progress.projections_processed, 1);

    let events = ctx.trace_sink.events().await;
    assert!(events
        .iter()
        .any(|e| matches!(e, TraceEvent::ProjectionBroken { key, .. } if key.object_type == p2.object_type)));
}

/// Given an existing user with accounts on P1 and P2, where P2 strictly
/// depends on P1
/// When P1 is unassigned
/// Then projection fails because P2 still needs it
#[tokio::test]
async fn test_deleting_strict_dependency_target_fails() {
    let ctx = TestContext::new();
    let [_, p1, p2] = chain(&ctx).await;
    let user_oid = ctx.add_user(ctx.tenant_a, "jack").await;
    let p1_shadow = ctx
        .add_owned_shadow(ctx.tenant_a, &p1.object_type, user_oid, "jack")
        .await;
    let p2_shadow = ctx
        .add_owned_shadow(ctx.tenant_a, &p2.object_type, user_oid, "jack")
        .await;

    let mut lens = LensContext::new(
        ctx.tenant_a,
        FocusContext::for_recompute(ObjectType::User, user_oid),
    )
    .with_projection(ProjectionContext::new(p1.object_type.clone()).with_shadow(p1_shadow))
    .with_projection(ProjectionContext::assigned(p2.object_type.clone()).with_shadow(p2_shadow));

    let err = ctx.projector().project(&mut lens).await.unwrap_err();

    assert!(err.is_policy_violation());
    assert!(err.to_string().contains("strictly depends"));
}

/// Given the same accounts with P2 also unassigned
/// When both are removed
/// Then projection succeeds with delete deltas for both shadows
#[tokio::test]
async fn test_deleting_dependent_and_target_together_succeeds() {
    let ctx = TestContext::new();
    let [_, p1, p2] = chain(&ctx).await;
    let user_oid = ctx.add_user(ctx.tenant_a, "jack").await;
    let p1_shadow = ctx
        .add_owned_shadow(ctx.tenant_a, &p1.object_type, user_oid, "jack")
        .await;
    let p2_shadow = ctx
        .add_owned_shadow(ctx.tenant_a, &p2.object_type, user_oid, "jack")
        .await;

    let mut lens = LensContext::new(
        ctx.tenant_a,
        FocusContext::for_recompute(ObjectType::User, user_oid),
    )
    .with_projection(ProjectionContext::new(p1.object_type.clone()).with_shadow(p1_shadow))
    .with_projection(ProjectionContext::new(p2.object_type.clone()).with_shadow(p2_shadow));

    ctx.projector()
        .project(&mut lens)
        .await
        .expect("Projection failed");

    for (projection, shadow) in lens.projections.iter().zip([p1_shadow, p2_shadow]) {
        let delta = projection.secondary_delta.as_ref().expect("delete delta");
        assert!(delta.is_delete());
        assert_eq!(delta.oid(), Some(shadow));
    }
}
