use serde_json::Value;

use crate::error::{AuthzError, AuthzResult};
use crate::predicate::{Leaf, Predicate};
use crate::principal::ContextData;

use super::{ConditionGroup, ConditionRule, LogicalOperator, RuleOperator, storage_path};

/// Compile a condition tree into a row filter for one request.
///
/// - `None` or an empty group compiles to `Predicate::Always`.
/// - Variables resolve against `context`; a missing one is a hard error.
/// - Any rule error aborts the whole compilation.
///
/// Pure: the same `(group, context)` always yields the same predicate.
pub fn compile(group: Option<&ConditionGroup>, context: &ContextData) -> AuthzResult<Predicate> {
    match group {
        None => Ok(Predicate::Always),
        Some(group) => compile_group(group, context),
    }
}

fn compile_group(group: &ConditionGroup, context: &ContextData) -> AuthzResult<Predicate> {
    let mut parts = Vec::with_capacity(group.rules.len() + group.groups.len());

    for rule in &group.rules {
        parts.push(compile_rule(rule, context)?);
    }

    for nested in &group.groups {
        let compiled = compile_group(nested, context)?;
        // Empty nested groups contribute nothing.
        if !compiled.is_always() {
            parts.push(compiled);
        }
    }

    let operator = match LogicalOperator::parse(&group.operator) {
        Some(op) => op,
        None => {
            tracing::warn!(operator = %group.operator, "unrecognized group operator, using AND");
            LogicalOperator::And
        }
    };

    Ok(match parts.len() {
        0 => Predicate::Always,
        1 => parts.remove(0),
        _ => match operator {
            LogicalOperator::And => Predicate::And(parts),
            LogicalOperator::Or => Predicate::Or(parts),
        },
    })
}

fn compile_rule(rule: &ConditionRule, context: &ContextData) -> AuthzResult<Predicate> {
    let operator: RuleOperator = rule.operator.parse()?;

    if rule.field.trim().is_empty() {
        return Err(AuthzError::invalid_value(
            &rule.field,
            operator.as_str(),
            "field name is empty",
        ));
    }

    let value = resolve_value(rule, context)?;
    check_value_shape(rule, operator, &value)?;

    Ok(Predicate::Leaf(Leaf {
        path: storage_path(&rule.field).into_owned(),
        op: operator.compare_op(),
        value,
    }))
}

fn resolve_value(rule: &ConditionRule, context: &ContextData) -> AuthzResult<Value> {
    if !rule.is_variable() {
        return Ok(rule.value.clone());
    }

    let Some(reference) = rule.value.as_str() else {
        return Err(AuthzError::invalid_value(
            &rule.field,
            &rule.operator,
            "variable reference must be a string",
        ));
    };

    let name = reference.strip_prefix('$').unwrap_or(reference);
    context
        .get(name)
        .cloned()
        .ok_or_else(|| AuthzError::UnresolvedVariable(name.to_string()))
}

fn check_value_shape(rule: &ConditionRule, operator: RuleOperator, value: &Value) -> AuthzResult<()> {
    match operator {
        RuleOperator::Contains | RuleOperator::StartsWith | RuleOperator::EndsWith
            if !value.is_string() =>
        {
            Err(AuthzError::invalid_value(
                &rule.field,
                operator.as_str(),
                format!("expected a string, got {value}"),
            ))
        }
        RuleOperator::In | RuleOperator::Nin if !value.is_array() => {
            Err(AuthzError::invalid_value(
                &rule.field,
                operator.as_str(),
                format!("expected a list, got {value}"),
            ))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::predicate::CompareOp;

    fn ctx() -> ContextData {
        ContextData::new()
            .with("user.id", "u1")
            .with("user.groups", json!(["g1", "g2"]))
            .with("now", "2026-01-01T00:00:00.000Z")
    }

    #[test]
    fn absent_or_empty_group_is_unrestricted() {
        assert_eq!(compile(None, &ctx()).unwrap(), Predicate::Always);
        assert_eq!(
            compile(Some(&ConditionGroup::default()), &ContextData::new()).unwrap(),
            Predicate::Always
        );
    }

    #[test]
    fn owner_variable_resolves_to_data_path() {
        let group = ConditionGroup::all([ConditionRule::variable("owner", RuleOperator::Eq, "$user.id")]);
        assert_eq!(
            compile(Some(&group), &ctx()).unwrap(),
            Predicate::eq("data.owner", "u1")
        );
    }

    #[test]
    fn now_resolves_from_context() {
        let group = ConditionGroup::all([ConditionRule::variable("close_date", RuleOperator::Gte, "$now")]);
        assert_eq!(
            compile(Some(&group), &ctx()).unwrap(),
            Predicate::leaf("data.close_date", CompareOp::Gte, "2026-01-01T00:00:00.000Z")
        );
    }

    #[test]
    fn missing_variable_is_a_hard_error() {
        let group = ConditionGroup::all([ConditionRule::variable("org", RuleOperator::Eq, "$user.org_id")]);
        let err = compile(Some(&group), &ctx()).unwrap_err();
        assert!(matches!(err, AuthzError::UnresolvedVariable(name) if name == "user.org_id"));
    }

    #[test]
    fn text_operators_require_string_values() {
        let group = ConditionGroup::all([ConditionRule::literal("name", RuleOperator::Contains, 123)]);
        let err = compile(Some(&group), &ctx()).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidRuleValue { .. }));
    }

    #[test]
    fn membership_operators_require_lists() {
        let group = ConditionGroup::all([ConditionRule::literal("team", RuleOperator::In, "g1")]);
        assert!(matches!(
            compile(Some(&group), &ctx()).unwrap_err(),
            AuthzError::InvalidRuleValue { .. }
        ));

        let group = ConditionGroup::all([ConditionRule::variable("team", RuleOperator::In, "user.groups")]);
        assert_eq!(
            compile(Some(&group), &ctx()).unwrap(),
            Predicate::leaf("data.team", CompareOp::In, json!(["g1", "g2"]))
        );
    }

    #[test]
    fn unknown_operator_fails_closed() {
        let group: ConditionGroup = serde_json::from_value(json!({
            "rules": [{"field": "stage", "operator": "like", "value": "won"}]
        }))
        .unwrap();
        assert!(matches!(
            compile(Some(&group), &ctx()).unwrap_err(),
            AuthzError::UnknownOperator(_)
        ));
    }

    #[test]
    fn one_bad_rule_aborts_the_whole_tree() {
        let group = ConditionGroup::any([ConditionRule::literal("stage", RuleOperator::Eq, "won")])
            .with_group(ConditionGroup::all([ConditionRule::variable(
                "owner",
                RuleOperator::Eq,
                "$user.manager_id",
            )]));
        assert!(compile(Some(&group), &ctx()).is_err());
    }

    #[test]
    fn nested_groups_combine_and_drop_empty_branches() {
        let group = ConditionGroup::any([ConditionRule::variable("owner", RuleOperator::Eq, "$user.id")])
            .with_group(ConditionGroup::all([
                ConditionRule::literal("stage", RuleOperator::Ne, "lost"),
                ConditionRule::literal("company", RuleOperator::StartsWith, "Ac"),
            ]))
            .with_group(ConditionGroup::default());

        assert_eq!(
            compile(Some(&group), &ctx()).unwrap(),
            Predicate::Or(vec![
                Predicate::eq("data.owner", "u1"),
                Predicate::And(vec![
                    Predicate::leaf("data.stage", CompareOp::Ne, "lost"),
                    Predicate::leaf("data.company", CompareOp::StartsWith, "Ac"),
                ]),
            ])
        );
    }

    #[test]
    fn group_of_only_empty_subgroups_is_unrestricted() {
        let group = ConditionGroup::default()
            .with_group(ConditionGroup::default())
            .with_group(ConditionGroup::any(Vec::<ConditionRule>::new()));
        assert_eq!(compile(Some(&group), &ctx()).unwrap(), Predicate::Always);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn rule_strategy() -> impl Strategy<Value = ConditionRule> {
            let field = prop::sample::select(vec!["owner", "stage", "created_by", "amount"]);
            let op = prop::sample::select(vec![
                RuleOperator::Eq,
                RuleOperator::Ne,
                RuleOperator::Gt,
                RuleOperator::StartsWith,
            ]);
            (field, op, "[a-z]{1,8}", any::<bool>()).prop_map(|(field, op, literal, use_var)| {
                if use_var {
                    ConditionRule::variable(field, op, "user.id")
                } else {
                    ConditionRule::literal(field, op, literal)
                }
            })
        }

        fn group_strategy() -> impl Strategy<Value = ConditionGroup> {
            let leaf = (prop::collection::vec(rule_strategy(), 0..4), any::<bool>()).prop_map(
                |(rules, or)| {
                    if or {
                        ConditionGroup::any(rules)
                    } else {
                        ConditionGroup::all(rules)
                    }
                },
            );
            leaf.prop_recursive(3, 16, 3, |inner| {
                (
                    prop::collection::vec(rule_strategy(), 0..3),
                    prop::collection::vec(inner, 0..3),
                    any::<bool>(),
                )
                    .prop_map(|(rules, groups, or)| {
                        let mut group = if or {
                            ConditionGroup::any(rules)
                        } else {
                            ConditionGroup::all(rules)
                        };
                        group.groups = groups;
                        group
                    })
            })
        }

        proptest! {
            /// Property: compilation is deterministic.
            #[test]
            fn compile_is_deterministic(group in group_strategy()) {
                let first = compile(Some(&group), &ctx()).unwrap();
                let second = compile(Some(&group), &ctx()).unwrap();
                prop_assert_eq!(first, second);
            }

            /// Property: an empty group never restricts, whatever the context.
            #[test]
            fn empty_group_is_always_true(user in "[a-z0-9]{0,12}") {
                let context = ContextData::new().with("user.id", user);
                prop_assert_eq!(
                    compile(Some(&ConditionGroup::default()), &context).unwrap(),
                    Predicate::Always
                );
            }
        }
    }
}
