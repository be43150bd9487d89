//! Monitor condition trees (`conditions` config key).
//!
//! A condition list is evaluated left to right; every node after the first is
//! folded into the running result with its own `andOr` connective.
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use super::EvaluationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AndOr {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    LessThan,
    GreaterThan,
    LessThanOrEqualTo,
    GreaterThanOrEqualTo,
}

impl ConditionOperator {
    pub fn apply(&self, left: &str, right: &str) -> bool {
        let numbers = || -> Option<(f64, f64)> {
            Some((left.trim().parse().ok()?, right.trim().parse().ok()?))
        };
        match self {
            ConditionOperator::Equals => left == right,
            ConditionOperator::NotEquals => left != right,
            ConditionOperator::Contains => left.contains(right),
            ConditionOperator::NotContains => !left.contains(right),
            ConditionOperator::StartsWith => left.starts_with(right),
            ConditionOperator::NotStartsWith => !left.starts_with(right),
            ConditionOperator::EndsWith => left.ends_with(right),
            ConditionOperator::NotEndsWith => !left.ends_with(right),
            ConditionOperator::LessThan => numbers().is_some_and(|(l, r)| l < r),
            ConditionOperator::GreaterThan => numbers().is_some_and(|(l, r)| l > r),
            ConditionOperator::LessThanOrEqualTo => numbers().is_some_and(|(l, r)| l <= r),
            ConditionOperator::GreaterThanOrEqualTo => numbers().is_some_and(|(l, r)| l >= r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConditionExpression {
    #[serde(default, rename = "andOr")]
    pub and_or: AndOr,
    pub variable: String,
    pub operator: ConditionOperator,
    #[serde(default, deserialize_with = "value_as_string")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConditionGroup {
    #[serde(default, rename = "andOr")]
    pub and_or: AndOr,
    #[serde(default)]
    pub children: Vec<ConditionNode>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConditionNode {
    Expression(ConditionExpression),
    Group(ConditionGroup),
}

impl ConditionNode {
    fn and_or(&self) -> AndOr {
        match self {
            ConditionNode::Expression(e) => e.and_or,
            ConditionNode::Group(g) => g.and_or,
        }
    }

    fn evaluate(&self, context: &HashMap<&str, String>) -> Result<bool, EvaluationError> {
        match self {
            ConditionNode::Expression(expr) => {
                let actual = context
                    .get(expr.variable.as_str())
                    .ok_or_else(|| EvaluationError::UnknownVariable(expr.variable.clone()))?;
                Ok(expr.operator.apply(actual, &expr.value))
            }
            ConditionNode::Group(group) => evaluate_nodes(&group.children, context),
        }
    }
}

fn evaluate_nodes(nodes: &[ConditionNode], context: &HashMap<&str, String>) -> Result<bool, EvaluationError> {
    let mut result: Option<bool> = None;
    for node in nodes {
        let value = node.evaluate(context)?;
        result = Some(match (result, node.and_or()) {
            (None, _) => value,
            (Some(acc), AndOr::And) => acc && value,
            (Some(acc), AndOr::Or) => acc || value,
        });
    }
    // An empty list imposes nothing.
    Ok(result.unwrap_or(true))
}

fn value_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Top-level condition list attached to a monitor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConditionExpressionGroup {
    pub children: Vec<ConditionNode>,
}

impl ConditionExpressionGroup {
    /// Parses the monitor's `conditions` value (array or JSON string).
    ///
    /// Returns `Ok(None)` when nothing is configured.
    pub fn from_config(value: Option<&Value>) -> Result<Option<Self>, EvaluationError> {
        let nodes = match value {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(raw)) if raw.trim().is_empty() => return Ok(None),
            Some(Value::String(raw)) => serde_json::from_str::<Vec<ConditionNode>>(raw)
                .map_err(|_| EvaluationError::InvalidConditions)?,
            Some(other @ Value::Array(_)) => serde_json::from_value::<Vec<ConditionNode>>(other.clone())
                .map_err(|_| EvaluationError::InvalidConditions)?,
            Some(_) => return Err(EvaluationError::InvalidConditions),
        };
        Ok(Some(Self { children: nodes }))
    }

    pub fn has_conditions(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn evaluate(&self, context: &HashMap<&str, String>) -> Result<bool, EvaluationError> {
        evaluate_nodes(&self.children, context)
    }
}

/// `Some(group)` only when the group has at least one child.
pub fn active_conditions(value: Option<&Value>) -> Result<Option<ConditionExpressionGroup>, EvaluationError> {
    Ok(ConditionExpressionGroup::from_config(value)?.filter(ConditionExpressionGroup::has_conditions))
}
