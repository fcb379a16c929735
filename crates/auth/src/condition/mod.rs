//! ABAC condition trees attached to action grants.
//!
//! A `ConditionGroup` is read-only once loaded; `compile` turns it into a
//! `Predicate` for one request.

mod compiler;
pub mod field_path;

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuthzError;
use crate::predicate::CompareOp;

pub use compiler::compile;
pub use field_path::storage_path;

/// Boolean combinator of a group. Parsed leniently: anything but `OR` is `AND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
        }
    }

    /// Returns `None` for unrecognized spellings; callers fall back to `And`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("and") {
            Some(LogicalOperator::And)
        } else if raw.eq_ignore_ascii_case("or") {
            Some(LogicalOperator::Or)
        } else {
            None
        }
    }
}

/// Rule operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Contains,
    StartsWith,
    EndsWith,
}

impl RuleOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleOperator::Eq => "eq",
            RuleOperator::Ne => "ne",
            RuleOperator::Gt => "gt",
            RuleOperator::Gte => "gte",
            RuleOperator::Lt => "lt",
            RuleOperator::Lte => "lte",
            RuleOperator::In => "in",
            RuleOperator::Nin => "nin",
            RuleOperator::Contains => "contains",
            RuleOperator::StartsWith => "startsWith",
            RuleOperator::EndsWith => "endsWith",
        }
    }

    pub fn compare_op(self) -> CompareOp {
        match self {
            RuleOperator::Eq => CompareOp::Eq,
            RuleOperator::Ne => CompareOp::Ne,
            RuleOperator::Gt => CompareOp::Gt,
            RuleOperator::Gte => CompareOp::Gte,
            RuleOperator::Lt => CompareOp::Lt,
            RuleOperator::Lte => CompareOp::Lte,
            RuleOperator::In => CompareOp::In,
            RuleOperator::Nin => CompareOp::Nin,
            RuleOperator::Contains => CompareOp::Contains,
            RuleOperator::StartsWith => CompareOp::StartsWith,
            RuleOperator::EndsWith => CompareOp::EndsWith,
        }
    }
}

impl FromStr for RuleOperator {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s {
            "eq" => RuleOperator::Eq,
            "ne" => RuleOperator::Ne,
            "gt" => RuleOperator::Gt,
            "gte" => RuleOperator::Gte,
            "lt" => RuleOperator::Lt,
            "lte" => RuleOperator::Lte,
            "in" => RuleOperator::In,
            "nin" => RuleOperator::Nin,
            "contains" => RuleOperator::Contains,
            "startsWith" | "starts_with" => RuleOperator::StartsWith,
            "endsWith" | "ends_with" => RuleOperator::EndsWith,
            other => return Err(AuthzError::UnknownOperator(other.to_string())),
        };
        Ok(op)
    }
}

impl core::fmt::Display for RuleOperator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleValueType {
    Literal,
    Variable,
}

/// A single `(field, operator, value)` test.
///
/// `operator` stays a raw string so that stored rules with an unknown operator
/// still load; they fail at compile time instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionRule {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
    /// When omitted, a `$`-prefixed string value is a variable reference.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<RuleValueType>,
}

impl ConditionRule {
    pub fn literal(field: impl Into<String>, op: RuleOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: op.as_str().to_string(),
            value: value.into(),
            value_type: Some(RuleValueType::Literal),
        }
    }

    /// `variable` may be given with or without the leading `$`.
    pub fn variable(field: impl Into<String>, op: RuleOperator, variable: &str) -> Self {
        let name = variable.strip_prefix('$').unwrap_or(variable);
        Self {
            field: field.into(),
            operator: op.as_str().to_string(),
            value: Value::String(format!("${name}")),
            value_type: Some(RuleValueType::Variable),
        }
    }

    pub fn is_variable(&self) -> bool {
        match self.value_type {
            Some(RuleValueType::Variable) => true,
            Some(RuleValueType::Literal) => false,
            None => self.value.as_str().is_some_and(|s| s.starts_with('$')),
        }
    }
}

fn default_group_operator() -> String {
    LogicalOperator::And.as_str().to_string()
}

/// Recursive boolean tree of rules and nested groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default = "default_group_operator")]
    pub operator: String,
    #[serde(default)]
    pub rules: Vec<ConditionRule>,
    #[serde(default)]
    pub groups: Vec<ConditionGroup>,
}

impl Default for ConditionGroup {
    fn default() -> Self {
        Self {
            operator: default_group_operator(),
            rules: Vec::new(),
            groups: Vec::new(),
        }
    }
}

impl ConditionGroup {
    pub fn all<I: IntoIterator<Item = ConditionRule>>(rules: I) -> Self {
        Self {
            rules: rules.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn any<I: IntoIterator<Item = ConditionRule>>(rules: I) -> Self {
        Self {
            operator: LogicalOperator::Or.as_str().to_string(),
            rules: rules.into_iter().collect(),
            groups: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: ConditionGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn logical_operator(&self) -> LogicalOperator {
        LogicalOperator::parse(&self.operator).unwrap_or(LogicalOperator::And)
    }

    /// No rules and no nested groups.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn group_operator_is_case_insensitive_and_defaults_to_and() {
        let mut group = ConditionGroup::default();
        group.operator = "or".into();
        assert_eq!(group.logical_operator(), LogicalOperator::Or);
        group.operator = "XOR".into();
        assert_eq!(group.logical_operator(), LogicalOperator::And);
    }

    #[test]
    fn unknown_rule_operator_is_rejected() {
        let err = "like".parse::<RuleOperator>().unwrap_err();
        assert!(matches!(err, AuthzError::UnknownOperator(op) if op == "like"));
    }

    #[test]
    fn variable_detection_honours_explicit_type() {
        let rule: ConditionRule =
            serde_json::from_value(json!({"field": "owner", "operator": "eq", "value": "$user.id"}))
                .unwrap();
        assert!(rule.is_variable());

        let rule: ConditionRule = serde_json::from_value(
            json!({"field": "code", "operator": "eq", "value": "$100", "type": "literal"}),
        )
        .unwrap();
        assert!(!rule.is_variable());
    }

    #[test]
    fn stored_groups_load_with_defaults() {
        let group: ConditionGroup = serde_json::from_value(json!({
            "rules": [{"field": "stage", "operator": "eq", "value": "won"}],
            "groups": [{"operator": "OR", "rules": []}]
        }))
        .unwrap();
        assert_eq!(group.operator, "AND");
        assert_eq!(group.groups.len(), 1);
        assert!(group.groups[0].is_empty());
    }

    #[test]
    fn variable_builder_normalizes_prefix() {
        let a = ConditionRule::variable("owner", RuleOperator::Eq, "user.id");
        let b = ConditionRule::variable("owner", RuleOperator::Eq, "$user.id");
        assert_eq!(a, b);
        assert_eq!(a.value, json!("$user.id"));
    }
}
