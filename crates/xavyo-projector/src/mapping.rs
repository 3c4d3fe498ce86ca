//! Mappings and their evaluation.
//!
//! A mapping computes values for one target item from variables: the focus
//! (before and after the change), the projection and the iteration state.
//! Evaluation yields a plus/zero/minus triple so several mappings targeting
//! the same item can be merged before consolidation.
//!
//! Variables are addressed by name:
//! - `iteration`, `iterationToken`
//! - `focus/<path>` or a bare `<path>` for the focus
//! - `projection/<path>` for the projection

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use xavyo_delta::{
    AnyItem, DeltaSetTriple, IdentityObject, ItemDelta, ItemPath, ItemValue, PropertyValue,
    RealValue, ValueMetadata,
};

use crate::error::{ProjectorError, Result};

/// Variable holding the iteration number.
pub const VAR_ITERATION: &str = "iteration";
/// Variable holding the iteration token.
pub const VAR_ITERATION_TOKEN: &str = "iterationToken";

// ============================================================================
// Definitions
// ============================================================================

/// When a mapping may overwrite the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStrength {
    /// Only fills an empty target.
    Weak,
    /// Applies unless the caller explicitly changes the target.
    #[default]
    Normal,
    /// Always applies.
    Strong,
}

/// Expression producing mapping values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MappingExpression {
    /// Copy the values of a variable.
    AsIs { source: String },
    /// Constant values.
    Literal { values: Vec<RealValue> },
    /// String template with `{variable}` placeholders.
    Template {
        pattern: String,
        #[serde(default)]
        lowercase: bool,
    },
    /// Script for an external script engine.
    Script { code: String },
}

impl MappingExpression {
    /// Short form used in diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::AsIs { source } => format!("asIs({source})"),
            Self::Literal { values } => format!("literal({} values)", values.len()),
            Self::Template { pattern, .. } => format!("template({pattern})"),
            Self::Script { .. } => "script".to_string(),
        }
    }
}

/// Boolean condition over mapping variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// The variable has at least one value.
    Exists { variable: String },
    /// The variable has the given value.
    Equals { variable: String, value: RealValue },
    Not { condition: Box<Condition> },
    All { conditions: Vec<Condition> },
    /// Script for an external script engine.
    Script { code: String },
}

impl Condition {
    #[must_use]
    pub fn exists(variable: impl Into<String>) -> Self {
        Self::Exists {
            variable: variable.into(),
        }
    }

    #[must_use]
    pub fn equals(variable: impl Into<String>, value: impl Into<RealValue>) -> Self {
        Self::Equals {
            variable: variable.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not {
            condition: Box::new(self),
        }
    }
}

/// A mapping into one target item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    /// Name used in value metadata and diagnostics.
    pub name: String,
    /// Target item, relative to the object the mapping writes to.
    pub target: ItemPath,
    pub expression: MappingExpression,
    #[serde(default)]
    pub strength: MappingStrength,
    /// Mapping applies only while the condition holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Tolerant targets keep values the mapping did not produce.
    #[serde(default)]
    pub tolerant: bool,
}

impl Mapping {
    pub fn new(name: impl Into<String>, target: ItemPath, expression: MappingExpression) -> Self {
        Self {
            name: name.into(),
            target,
            expression,
            strength: MappingStrength::default(),
            condition: None,
            tolerant: false,
        }
    }

    /// Mapping copying `source` into `target`.
    pub fn as_is(name: impl Into<String>, source: impl Into<String>, target: ItemPath) -> Self {
        Self::new(
            name,
            target,
            MappingExpression::AsIs {
                source: source.into(),
            },
        )
    }

    /// Mapping rendering a string template into `target`.
    pub fn template(name: impl Into<String>, pattern: impl Into<String>, target: ItemPath) -> Self {
        Self::new(
            name,
            target,
            MappingExpression::Template {
                pattern: pattern.into(),
                lowercase: false,
            },
        )
    }

    #[must_use]
    pub fn with_strength(mut self, strength: MappingStrength) -> Self {
        self.strength = strength;
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn tolerant(mut self) -> Self {
        self.tolerant = true;
        self
    }
}

// ============================================================================
// Variables
// ============================================================================

/// Inputs available to mapping expressions.
#[derive(Debug, Clone, Default)]
pub struct MappingVariables {
    /// Focus after the change.
    pub focus: Option<IdentityObject>,
    /// Focus before the change.
    pub focus_old: Option<IdentityObject>,
    pub projection: Option<IdentityObject>,
    pub iteration: u32,
    pub iteration_token: String,
}

impl MappingVariables {
    #[must_use]
    pub fn for_focus(focus: Option<IdentityObject>, focus_old: Option<IdentityObject>) -> Self {
        Self {
            focus,
            focus_old,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_projection(mut self, projection: Option<IdentityObject>) -> Self {
        self.projection = projection;
        self
    }

    #[must_use]
    pub fn with_iteration(mut self, iteration: u32, token: impl Into<String>) -> Self {
        self.iteration = iteration;
        self.iteration_token = token.into();
        self
    }

    /// Variables describing the state before the change, if known.
    #[must_use]
    pub fn old_state(&self) -> Option<MappingVariables> {
        self.focus_old.as_ref().map(|old| MappingVariables {
            focus: Some(old.clone()),
            focus_old: None,
            projection: self.projection.clone(),
            iteration: self.iteration,
            iteration_token: self.iteration_token.clone(),
        })
    }

    /// Values of a variable.
    ///
    /// # Errors
    ///
    /// Returns a schema error for malformed or ambiguous paths.
    pub fn resolve(&self, variable: &str) -> Result<Vec<RealValue>> {
        match variable {
            VAR_ITERATION => return Ok(vec![RealValue::Integer(i64::from(self.iteration))]),
            VAR_ITERATION_TOKEN => return Ok(vec![RealValue::from(self.iteration_token.as_str())]),
            _ => {}
        }
        let (object, path) = if let Some(rest) = variable.strip_prefix("projection/") {
            (self.projection.as_ref(), rest)
        } else if let Some(rest) = variable.strip_prefix("focus/") {
            (self.focus.as_ref(), rest)
        } else {
            (self.focus.as_ref(), variable)
        };
        let Some(object) = object else {
            return Ok(Vec::new());
        };
        let path: ItemPath = path.parse()?;
        Ok(object
            .property_values(&path)?
            .into_iter()
            .map(|v| v.value)
            .collect())
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// Mapping outputs collected per target path.
#[derive(Debug, Default)]
pub struct MappingOutputs {
    targets: BTreeMap<String, (ItemPath, DeltaSetTriple<PropertyValue>, bool)>,
}

impl MappingOutputs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the output of `mapping` with earlier outputs for its target.
    /// A target stays tolerant only while every contributing mapping is.
    pub fn add(&mut self, mapping: &Mapping, triple: DeltaSetTriple<PropertyValue>) {
        if triple.is_empty() {
            return;
        }
        let entry = self
            .targets
            .entry(mapping.target.to_string())
            .or_insert_with(|| (mapping.target.clone(), DeltaSetTriple::new(), true));
        entry.1.merge(triple);
        entry.2 &= mapping.tolerant;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Consolidate into item deltas that change `basis`. Deltas that would
    /// not change anything are dropped.
    ///
    /// # Errors
    ///
    /// Returns a schema error for malformed target paths.
    pub fn into_item_deltas(self, basis: Option<&IdentityObject>) -> Result<Vec<ItemDelta>> {
        let mut deltas = Vec::with_capacity(self.targets.len());
        for (path, triple, tolerant) in self.targets.into_values() {
            let current = match basis {
                Some(object) => object.find_item(&path)?.and_then(AnyItem::as_property),
                None => None,
            };
            let delta = triple.to_item_delta(path, current, tolerant);
            if !delta.is_empty() {
                deltas.push(ItemDelta::from(delta));
            }
        }
        Ok(deltas)
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluates mappings, string expressions and conditions.
#[async_trait]
pub trait MappingEvaluator: Send + Sync {
    /// Evaluate a mapping into a plus/zero/minus triple.
    async fn evaluate_mapping(
        &self,
        mapping: &Mapping,
        variables: &MappingVariables,
    ) -> Result<DeltaSetTriple<PropertyValue>>;

    /// Evaluate an expression to a single string (e.g. an iteration token).
    async fn evaluate_string(
        &self,
        expression: &MappingExpression,
        variables: &MappingVariables,
    ) -> Result<Option<String>>;

    /// Evaluate a condition.
    async fn evaluate_condition(
        &self,
        condition: &Condition,
        variables: &MappingVariables,
    ) -> Result<bool>;
}

/// Evaluator for the built-in expression forms. Scripts are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicMappingEvaluator;

impl BasicMappingEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn values(expression: &MappingExpression, variables: &MappingVariables) -> Result<Vec<RealValue>> {
        match expression {
            MappingExpression::AsIs { source } => variables.resolve(source),
            MappingExpression::Literal { values } => Ok(values.clone()),
            MappingExpression::Template { pattern, lowercase } => {
                let rendered = render_template(pattern, variables)?;
                Ok(rendered
                    .filter(|s| !s.is_empty())
                    .map(|s| if *lowercase { s.to_lowercase() } else { s })
                    .map(RealValue::from)
                    .into_iter()
                    .collect())
            }
            MappingExpression::Script { code } => Err(ProjectorError::expression(
                code.clone(),
                "script expressions require a script-capable evaluator",
            )),
        }
    }

    fn condition(condition: &Condition, variables: &MappingVariables) -> Result<bool> {
        match condition {
            Condition::Exists { variable } => Ok(!variables.resolve(variable)?.is_empty()),
            Condition::Equals { variable, value } => {
                Ok(variables.resolve(variable)?.iter().any(|v| v == value))
            }
            Condition::Not { condition } => Ok(!Self::condition(condition, variables)?),
            Condition::All { conditions } => {
                for condition in conditions {
                    if !Self::condition(condition, variables)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Script { code } => Err(ProjectorError::expression(
                code.clone(),
                "script conditions require a script-capable evaluator",
            )),
        }
    }

    fn mapping_values(mapping: &Mapping, variables: &MappingVariables) -> Result<Vec<PropertyValue>> {
        if let Some(condition) = &mapping.condition {
            if !Self::condition(condition, variables)? {
                return Ok(Vec::new());
            }
        }
        Ok(Self::values(&mapping.expression, variables)?
            .into_iter()
            .map(|v| PropertyValue::new(v).with_metadata(ValueMetadata::from_mapping(&mapping.name)))
            .collect())
    }
}

#[async_trait]
impl MappingEvaluator for BasicMappingEvaluator {
    async fn evaluate_mapping(
        &self,
        mapping: &Mapping,
        variables: &MappingVariables,
    ) -> Result<DeltaSetTriple<PropertyValue>> {
        let new_values = Self::mapping_values(mapping, variables)?;
        let old_values = match variables.old_state() {
            Some(old) => Self::mapping_values(mapping, &old)?,
            None => Vec::new(),
        };

        let mut triple = DeltaSetTriple::new();
        for value in &new_values {
            if old_values.iter().any(|o| o.equals_real(value)) {
                triple.add_to_zero(value.clone());
            } else {
                triple.add_to_plus(value.clone());
            }
        }
        for value in old_values {
            if !new_values.iter().any(|n| n.equals_real(&value)) {
                triple.add_to_minus(value);
            }
        }
        Ok(triple)
    }

    async fn evaluate_string(
        &self,
        expression: &MappingExpression,
        variables: &MappingVariables,
    ) -> Result<Option<String>> {
        Ok(Self::values(expression, variables)?
            .into_iter()
            .next()
            .map(|v| v.to_string()))
    }

    async fn evaluate_condition(
        &self,
        condition: &Condition,
        variables: &MappingVariables,
    ) -> Result<bool> {
        Self::condition(condition, variables)
    }
}

/// Render `{variable}` placeholders. Missing variables render empty; the
/// result is `None` when every source placeholder (anything but the
/// iteration variables) was missing.
fn render_template(pattern: &str, variables: &MappingVariables) -> Result<Option<String>> {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    let mut placeholders = 0usize;
    let mut resolved = 0usize;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(ProjectorError::expression(
                pattern,
                "unclosed placeholder in template",
            ));
        };
        let name = after[..end].trim();
        if name.is_empty() {
            return Err(ProjectorError::expression(pattern, "empty placeholder in template"));
        }
        let is_source = name != VAR_ITERATION && name != VAR_ITERATION_TOKEN;
        if is_source {
            placeholders += 1;
        }
        if let Some(value) = variables.resolve(name)?.into_iter().next() {
            if let RealValue::Protected(_) = value {
                return Err(ProjectorError::expression(
                    pattern,
                    format!("protected variable '{name}' cannot be rendered"),
                ));
            }
            let text = value.to_string();
            if is_source && !text.is_empty() {
                resolved += 1;
            }
            out.push_str(&text);
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    if placeholders > 0 && resolved == 0 {
        return Ok(None);
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use xavyo_delta::{ObjectType, Oid};

    fn jack() -> IdentityObject {
        IdentityObject::new(ObjectType::User)
            .with_oid(Oid::new())
            .with_property("givenName", "Jack")
            .with_property("familyName", "Sparrow")
    }

    fn name_mapping() -> Mapping {
        Mapping::new(
            "name",
            ItemPath::name("name"),
            MappingExpression::Template {
                pattern: "{givenName}.{familyName}{iterationToken}".to_string(),
                lowercase: true,
            },
        )
    }

    fn strings(values: &[PropertyValue]) -> Vec<String> {
        values.iter().map(|v| v.value.to_string()).collect()
    }

    #[tokio::test]
    async fn test_template_with_iteration_token() {
        let evaluator = BasicMappingEvaluator::new();
        let vars = MappingVariables::for_focus(Some(jack()), None).with_iteration(2, "2");
        let triple = evaluator.evaluate_mapping(&name_mapping(), &vars).await.unwrap();
        assert_eq!(strings(&triple.plus), vec!["jack.sparrow2"]);
        assert!(triple.zero.is_empty());
        assert_eq!(
            triple.plus[0].metadata,
            ValueMetadata::from_mapping("name")
        );
    }

    #[tokio::test]
    async fn test_triple_against_old_state() {
        let evaluator = BasicMappingEvaluator::new();
        let old = jack();
        let new = old.clone().with_property("givenName", "Will");
        let vars = MappingVariables::for_focus(Some(new), Some(old));
        let triple = evaluator.evaluate_mapping(&name_mapping(), &vars).await.unwrap();
        assert_eq!(strings(&triple.plus), vec!["will.sparrow"]);
        assert_eq!(strings(&triple.minus), vec!["jack.sparrow"]);

        let unchanged = MappingVariables::for_focus(Some(jack()), Some(jack()));
        let triple = evaluator
            .evaluate_mapping(&name_mapping(), &unchanged)
            .await
            .unwrap();
        assert_eq!(strings(&triple.zero), vec!["jack.sparrow"]);
        assert!(triple.plus.is_empty() && triple.minus.is_empty());
    }

    #[tokio::test]
    async fn test_missing_sources_produce_nothing() {
        let evaluator = BasicMappingEvaluator::new();
        let vars = MappingVariables::for_focus(Some(IdentityObject::new(ObjectType::User)), None);
        let triple = evaluator.evaluate_mapping(&name_mapping(), &vars).await.unwrap();
        assert!(triple.is_empty());
    }

    #[tokio::test]
    async fn test_condition_gates_mapping() {
        let evaluator = BasicMappingEvaluator::new();
        let mapping = Mapping::as_is("mail", "emailAddress", ItemPath::name("mail"))
            .with_condition(Condition::equals("employeeType", "staff"));
        let focus = jack().with_property("emailAddress", "jack@example.com");

        let vars = MappingVariables::for_focus(Some(focus.clone()), None);
        assert!(evaluator.evaluate_mapping(&mapping, &vars).await.unwrap().is_empty());

        let staff = focus.with_property("employeeType", "staff");
        let vars = MappingVariables::for_focus(Some(staff), None);
        let triple = evaluator.evaluate_mapping(&mapping, &vars).await.unwrap();
        assert_eq!(strings(&triple.plus), vec!["jack@example.com"]);
    }

    #[tokio::test]
    async fn test_scripts_are_rejected() {
        let evaluator = BasicMappingEvaluator::new();
        let vars = MappingVariables::default();
        let err = evaluator
            .evaluate_string(
                &MappingExpression::Script {
                    code: "1 + 1".to_string(),
                },
                &vars,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectorError::ExpressionEvaluation { .. }));

        let err = evaluator
            .evaluate_condition(
                &Condition::Script {
                    code: "true".to_string(),
                },
                &vars,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectorError::ExpressionEvaluation { .. }));
    }

    #[tokio::test]
    async fn test_projection_and_iteration_variables() {
        let shadow = IdentityObject::new(ObjectType::Shadow).with_container(
            "attributes",
            vec![xavyo_delta::ContainerValue::new().with_property("uid", "u-100")],
        );
        let vars = MappingVariables::default()
            .with_projection(Some(shadow))
            .with_iteration(3, "-3");
        assert_eq!(
            vars.resolve("projection/attributes/uid").unwrap(),
            vec![RealValue::from("u-100")]
        );
        assert_eq!(vars.resolve("iteration").unwrap(), vec![RealValue::Integer(3)]);
        let evaluator = BasicMappingEvaluator::new();
        let token = evaluator
            .evaluate_string(
                &MappingExpression::Template {
                    pattern: "x{iterationToken}".to_string(),
                    lowercase: false,
                },
                &vars,
            )
            .await
            .unwrap();
        assert_eq!(token.as_deref(), Some("x-3"));
    }

    #[test]
    fn test_outputs_merge_per_target() {
        let target = ItemPath::name("mail");
        let first = Mapping::as_is("primary", "emailAddress", target.clone()).tolerant();
        let second = Mapping::as_is("alias", "alias", target.clone());
        let mut outputs = MappingOutputs::new();
        outputs.add(&first, DeltaSetTriple::from_plus(vec![PropertyValue::new("a@example.com")]));
        outputs.add(&second, DeltaSetTriple::from_zero(vec![PropertyValue::new("b@example.com")]));
        outputs.add(&second, DeltaSetTriple::new());

        let current = IdentityObject::new(ObjectType::User).with_property("mail", "b@example.com");
        let deltas = outputs.into_item_deltas(Some(&current)).unwrap();
        assert_eq!(deltas.len(), 1);
        let replaced = deltas[0].as_property().unwrap().values_to_replace().unwrap();
        assert_eq!(replaced.len(), 2);
    }

    #[test]
    fn test_unclosed_placeholder() {
        let vars = MappingVariables::default();
        assert!(render_template("{givenName", &vars).is_err());
    }
}
