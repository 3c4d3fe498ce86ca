//! Password policy processing.

use std::collections::HashSet;

use tracing::debug;
use xavyo_delta::{names, ItemPath, ObjectChange, PropertyValue, RealValue};

use crate::context::LensContext;
use crate::definition::ValuePolicy;
use crate::error::{ProjectorError, Result};

/// Path of the focus password value.
#[must_use]
pub fn password_path() -> ItemPath {
    ItemPath::from_names([names::CREDENTIALS, names::PASSWORD, names::VALUE])
}

/// Check a password against a value policy. Returns one message per failed
/// rule; an empty list means the password is acceptable.
#[must_use]
pub fn validate_password(password: &str, policy: &ValuePolicy, focus_name: Option<&str>) -> Vec<String> {
    let mut failures = Vec::new();
    let length = password.chars().count();

    if let Some(min) = policy.min_length {
        if length < min {
            failures.push(format!("must be at least {min} characters long"));
        }
    }
    if let Some(max) = policy.max_length {
        if length > max {
            failures.push(format!("must be at most {max} characters long"));
        }
    }
    if let Some(min_unique) = policy.min_unique_chars {
        let unique = password.chars().collect::<HashSet<_>>().len();
        if unique < min_unique {
            failures.push(format!("must contain at least {min_unique} unique characters"));
        }
    }
    for class in &policy.character_classes {
        let occurs = password
            .chars()
            .filter(|c| class.characters.contains(*c))
            .count();
        if occurs < class.min_occurs {
            failures.push(format!(
                "must contain at least {} {} characters",
                class.min_occurs, class.name
            ));
        }
    }

    let lowered = password.to_lowercase();
    for prohibited in &policy.prohibited_substrings {
        if !prohibited.is_empty() && lowered.contains(&prohibited.to_lowercase()) {
            failures.push(format!("must not contain '{prohibited}'"));
        }
    }
    if policy.prohibit_focus_name {
        if let Some(name) = focus_name.filter(|n| !n.is_empty()) {
            if lowered.contains(&name.to_lowercase()) {
                failures.push("must not contain the user name".to_string());
            }
        }
    }
    failures
}

/// Password values set by the primary focus delta.
fn new_passwords(ctx: &LensContext) -> Result<Vec<PropertyValue>> {
    let Some(primary) = &ctx.focus.primary_delta else {
        return Ok(Vec::new());
    };
    let path = password_path();
    Ok(match primary.change() {
        ObjectChange::Add { object } => object.property_values(&path)?,
        ObjectChange::Modify { .. } => match primary.find_item_delta(&path) {
            Some(delta) => {
                let Some(property) = delta.as_property() else {
                    return Err(ProjectorError::schema(format!(
                        "'{path}' must be a property"
                    )));
                };
                match property.values_to_replace() {
                    Some(values) => values.to_vec(),
                    None => property.values_to_add().to_vec(),
                }
            }
            None => Vec::new(),
        },
        ObjectChange::Delete => Vec::new(),
    })
}

/// Clear-text password changed by the primary focus delta, if any.
///
/// # Errors
///
/// Returns a schema error if the password is not a string property.
pub fn changed_password(ctx: &LensContext) -> Result<Option<RealValue>> {
    Ok(new_passwords(ctx)?.into_iter().next().map(|v| v.value))
}

/// Validate a password change of the primary delta against `policy`.
///
/// # Errors
///
/// Returns a policy violation listing every failed rule.
pub fn process_password_policy(ctx: &LensContext, policy: &ValuePolicy) -> Result<()> {
    let Some(value) = changed_password(ctx)? else {
        return Ok(());
    };
    let clear = match &value {
        RealValue::Protected(secret) => secret.expose(),
        RealValue::String(s) => s.as_str(),
        _ => {
            return Err(ProjectorError::schema(
                "password must be a string or protected string",
            ))
        }
    };
    let focus_name = ctx
        .focus
        .object_before_wave(0)?
        .and_then(|o| o.name().map(str::to_string));
    let failures = validate_password(clear, policy, focus_name.as_deref());
    if failures.is_empty() {
        debug!(policy = %policy.name, "Password satisfies policy");
        return Ok(());
    }
    Err(ProjectorError::policy_violation(format!(
        "password violates policy '{}': {}",
        policy.name,
        failures.join("; ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FocusContext;
    use crate::definition::CharacterClassRule;
    use uuid::Uuid;
    use xavyo_delta::{
        ContainerValue, IdentityObject, ItemDelta, ObjectDelta, ObjectType, Oid, ProtectedString,
    };

    fn policy() -> ValuePolicy {
        ValuePolicy {
            name: "standard".to_string(),
            min_length: Some(8),
            max_length: Some(32),
            min_unique_chars: Some(4),
            character_classes: vec![
                CharacterClassRule::new("digit", "0123456789", 1),
                CharacterClassRule::new("uppercase", "ABCDEFGHIJKLMNOPQRSTUVWXYZ", 1),
            ],
            prohibited_substrings: vec!["password".to_string()],
            prohibit_focus_name: true,
            ..ValuePolicy::default()
        }
    }

    #[test]
    fn test_valid_password() {
        assert!(validate_password("Tr0ub4dor&3", &policy(), Some("jack")).is_empty());
    }

    #[test]
    fn test_every_failed_rule_is_reported() {
        let failures = validate_password("aaa", &policy(), None);
        assert_eq!(failures.len(), 4, "{failures:?}");
    }

    #[test]
    fn test_prohibited_substrings_and_name() {
        let failures = validate_password("MyPassword1", &policy(), None);
        assert_eq!(failures, vec!["must not contain 'password'"]);

        let failures = validate_password("Jack1234x", &policy(), Some("jack"));
        assert_eq!(failures, vec!["must not contain the user name"]);
    }

    fn add_context(password: &str) -> LensContext {
        let user = IdentityObject::new(ObjectType::User)
            .with_property(names::NAME, "jack")
            .with_container(
                names::CREDENTIALS,
                vec![ContainerValue::new().with_container(
                    names::PASSWORD,
                    vec![ContainerValue::new()
                        .with_property(names::VALUE, ProtectedString::new(password))],
                )],
            );
        LensContext::new(Uuid::new_v4(), FocusContext::for_add(user))
    }

    #[test]
    fn test_policy_on_added_focus() {
        assert!(process_password_policy(&add_context("Sup3rSecret"), &policy()).is_ok());
        let err = process_password_policy(&add_context("jack"), &policy()).unwrap_err();
        assert!(err.is_policy_violation());
        assert!(err.to_string().contains("user name"));
    }

    #[test]
    fn test_policy_on_modified_focus() {
        let oid = Oid::new();
        let current = IdentityObject::new(ObjectType::User)
            .with_oid(oid)
            .with_property(names::NAME, "jack");
        let primary = ObjectDelta::modify_with(
            ObjectType::User,
            oid,
            [ItemDelta::replace_property(
                password_path(),
                [ProtectedString::new("short")],
            )],
        )
        .unwrap();
        let focus = FocusContext::for_change(primary).unwrap().with_current(current);
        let ctx = LensContext::new(Uuid::new_v4(), focus);
        assert!(process_password_policy(&ctx, &policy())
            .unwrap_err()
            .is_policy_violation());
    }

    #[test]
    fn test_no_password_change_passes() {
        let oid = Oid::new();
        let focus = FocusContext::for_recompute(ObjectType::User, oid)
            .with_current(IdentityObject::new(ObjectType::User).with_oid(oid));
        let ctx = LensContext::new(Uuid::new_v4(), focus);
        assert!(process_password_policy(&ctx, &policy()).is_ok());
    }
}
