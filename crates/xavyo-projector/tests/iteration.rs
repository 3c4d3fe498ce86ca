//! Integration tests for template iteration.
//!
//! These tests verify that generated focus values are made unique through
//! the iteration token, and that iteration gives up after the limit.

mod common;

use xavyo_delta::{names, IdentityObject, ItemPath, ObjectType, RealValue};
use xavyo_projector::context::FocusContext;
use xavyo_projector::{
    IterationSpecification, LensContext, Mapping, MappingExpression, MappingStrength,
    ObjectRepository, ObjectTemplate, ProjectorConfig, ProjectorError, TraceEvent, TraceOutcome,
};

use common::TestContext;

fn username_mapping(pattern: &str) -> Mapping {
    Mapping::new(
        "username",
        ItemPath::name(names::NAME),
        MappingExpression::Template {
            pattern: pattern.to_string(),
            lowercase: true,
        },
    )
    .with_strength(MappingStrength::Strong)
}

fn iterating(template: ObjectTemplate, max_iterations: u32) -> ObjectTemplate {
    template.with_iteration(IterationSpecification {
        max_iterations: Some(max_iterations),
        ..IterationSpecification::default()
    })
}

fn jack() -> IdentityObject {
    IdentityObject::new(ObjectType::User)
        .with_property("givenName", "Jack")
        .with_property("familyName", "Sparrow")
}

fn focus_name(lens: &LensContext) -> Option<String> {
    lens.focus
        .new
        .as_ref()
        .and_then(|o| o.name().map(str::to_string))
}

// ============================================================================
// Unique names
// ============================================================================

/// Given an existing user named jack.sparrow
/// When a new Jack Sparrow is created through an iterating template
/// Then the new user is named jack.sparrow1 with iteration 1
#[tokio::test]
async fn test_name_collision_uses_next_iteration() {
    let ctx = TestContext::new();
    let template = iterating(
        ObjectTemplate::new("user template")
            .with_mapping(username_mapping("{givenName}.{familyName}{iterationToken}")),
        5,
    );
    let template_oid = template.oid;
    ctx.resolver.add_template(ctx.tenant_a, template).await;
    ctx.add_user(ctx.tenant_a, "jack.sparrow").await;

    let mut lens = LensContext::new(
        ctx.tenant_a,
        FocusContext::for_add(jack()).with_template(template_oid),
    );
    ctx.projector()
        .project(&mut lens)
        .await
        .expect("Projection failed");

    assert_eq!(focus_name(&lens).as_deref(), Some("jack.sparrow1"));
    assert_eq!(lens.focus.iteration, 1);
    assert_eq!(lens.focus.iteration_token.as_deref(), Some("1"));
    let stored_token = lens
        .focus
        .new
        .as_ref()
        .and_then(|o| o.property_value(&ItemPath::name(names::ITERATION_TOKEN)).ok())
        .flatten();
    assert_eq!(stored_token, Some(RealValue::from("1")));

    let conflicts = ctx
        .trace_sink
        .events()
        .await
        .into_iter()
        .filter(|e| matches!(e, TraceEvent::IterationAttempt { conflict: Some(_), .. }))
        .count();
    assert_eq!(conflicts, 1);
}

/// Given a user named jack.sparrow in another tenant
/// When Jack Sparrow is created in this tenant
/// Then no iteration is needed
#[tokio::test]
async fn test_collision_in_other_tenant_is_ignored() {
    let ctx = TestContext::new();
    let template = iterating(
        ObjectTemplate::new("user template")
            .with_mapping(username_mapping("{givenName}.{familyName}{iterationToken}")),
        5,
    );
    let template_oid = template.oid;
    ctx.resolver.add_template(ctx.tenant_a, template).await;
    ctx.add_user(ctx.tenant_b, "jack.sparrow").await;

    let mut lens = LensContext::new(
        ctx.tenant_a,
        FocusContext::for_add(jack()).with_template(template_oid),
    );
    ctx.projector()
        .project(&mut lens)
        .await
        .expect("Projection failed");

    assert_eq!(focus_name(&lens).as_deref(), Some("jack.sparrow"));
    assert_eq!(lens.focus.iteration, 0);
}

/// Given an existing user holding the generated e-mail address under a
/// different name, and e-mail configured as unique
/// When Jack Sparrow is created
/// Then both generated values move to the next iteration
#[tokio::test]
async fn test_configured_unique_path_drives_iteration() {
    let ctx = TestContext::new();
    let email = ItemPath::name("emailAddress");
    let template = iterating(
        ObjectTemplate::new("user template")
            .with_mapping(username_mapping("{givenName}.{familyName}{iterationToken}"))
            .with_mapping(
                Mapping::template(
                    "email",
                    "{givenName}.{familyName}{iterationToken}@example.com",
                    email.clone(),
                )
                .with_strength(MappingStrength::Strong),
            ),
        5,
    );
    let template_oid = template.oid;
    ctx.resolver.add_template(ctx.tenant_a, template).await;
    ctx.repository
        .add_object(
            ctx.tenant_a,
            IdentityObject::new(ObjectType::User)
                .with_property(names::NAME, "captain")
                .with_property("emailAddress", "Jack.Sparrow@example.com"),
        )
        .await
        .expect("Failed to add user");
    let config = ProjectorConfig {
        unique_paths: vec![email.clone()],
        ..ProjectorConfig::default()
    };

    let mut lens = LensContext::new(
        ctx.tenant_a,
        FocusContext::for_add(jack()).with_template(template_oid),
    );
    ctx.projector_with(config)
        .project(&mut lens)
        .await
        .expect("Projection failed");

    let focus = lens.focus.new.as_ref().expect("focus after projection");
    assert_eq!(focus.name(), Some("jack.sparrow1"));
    assert_eq!(
        focus.property_value(&email).expect("email"),
        Some(RealValue::from("Jack.Sparrow1@example.com"))
    );
}

// ============================================================================
// Iteration limit
// ============================================================================

/// Given a template whose generated name ignores the iteration token and
/// collides with an existing user
/// When the user is created with at most 2 iterations
/// Then 3 attempts are made and projection fails with ObjectAlreadyExists
/// naming the existing user
#[tokio::test]
async fn test_iteration_limit_reports_existing_object() {
    let ctx = TestContext::new();
    let template = iterating(
        ObjectTemplate::new("user template")
            .with_mapping(username_mapping("{givenName}.{familyName}")),
        2,
    );
    let template_oid = template.oid;
    ctx.resolver.add_template(ctx.tenant_a, template).await;
    let existing = ctx.add_user(ctx.tenant_a, "jack.sparrow").await;

    let mut lens = LensContext::new(
        ctx.tenant_a,
        FocusContext::for_add(jack()).with_template(template_oid),
    );
    let err = ctx.projector().project(&mut lens).await.unwrap_err();

    match err {
        ProjectorError::ObjectAlreadyExists {
            conflicting_oid,
            conflicting_name,
            ..
        } => {
            assert_eq!(conflicting_oid, Some(existing));
            assert_eq!(conflicting_name.as_deref(), Some("jack.sparrow"));
        }
        other => panic!("expected ObjectAlreadyExists, got {other:?}"),
    }
    assert_eq!(lens.progress.iteration_attempts, 3);

    let attempts = ctx
        .trace_sink
        .events()
        .await
        .into_iter()
        .filter(|e| matches!(e, TraceEvent::IterationAttempt { .. }))
        .count();
    assert_eq!(attempts, 3);
    assert!(matches!(
        lens.operation_trace.last().map(|e| &e.outcome),
        Some(TraceOutcome::Failure { .. })
    ));
    assert!(matches!(
        ctx.trace_sink.events().await.last(),
        Some(TraceEvent::ProjectionFinished { success: false, .. })
    ));
}
