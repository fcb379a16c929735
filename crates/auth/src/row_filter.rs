//! Row-level filter derivation.
//!
//! Unlike the aggregator, this walks every role's permission records without
//! merging them first, so conditional grants from different roles are
//! OR-ed together instead of one shadowing the other.

use crate::condition::compile;
use crate::error::AuthzResult;
use crate::permissions::Permission;
use crate::predicate::Predicate;
use crate::principal::ContextData;

/// Derive the row filter for `(resource_id, action)` from raw role grants.
///
/// - any unconditional allow -> `Always`
/// - no applicable allow -> `Never`
/// - one conditional allow -> its compiled predicate
/// - several -> `Or` of all of them, in input order
///
/// Every applicable condition is compiled even when an unconditional allow is
/// present, so a broken condition fails the call regardless of role order.
pub fn derive_row_filter<'a, I>(
    permissions: I,
    resource_id: &str,
    action: &str,
    context: &ContextData,
) -> AuthzResult<Predicate>
where
    I: IntoIterator<Item = &'a Permission>,
{
    let mut full_access = false;
    let mut any_of = Vec::new();

    for permission in permissions {
        if !permission.resource.covers(resource_id) {
            continue;
        }
        let Some(grant) = permission.action(action).filter(|g| g.allowed) else {
            continue;
        };

        match &grant.conditions {
            None => full_access = true,
            Some(conditions) => any_of.push(compile(Some(conditions), context)?),
        }
    }

    if full_access {
        return Ok(Predicate::Always);
    }

    Ok(match any_of.len() {
        0 => Predicate::Never,
        1 => any_of.remove(0),
        _ => Predicate::Or(any_of),
    })
}

#[cfg(test)]
mod tests {
    use nexcrm_core::{RoleId, TenantId};

    use super::*;
    use crate::condition::{ConditionGroup, ConditionRule, RuleOperator};
    use crate::error::AuthzError;
    use crate::permissions::{ActionPermission, ResourceRef};
    use crate::predicate::CompareOp;

    fn ctx() -> ContextData {
        ContextData::new()
            .with("user.id", "u1")
            .with("user.groups", serde_json::json!(["g1"]))
    }

    fn grant(resource: ResourceRef, action: &str, grant: ActionPermission) -> Permission {
        Permission::new(TenantId::new(), RoleId::new(), resource).with_action(action, grant)
    }

    fn owner_only() -> ActionPermission {
        ActionPermission::allow_when(ConditionGroup::all([ConditionRule::variable(
            "owner",
            RuleOperator::Eq,
            "$user.id",
        )]))
    }

    fn team_only() -> ActionPermission {
        ActionPermission::allow_when(ConditionGroup::all([ConditionRule::variable(
            "team",
            RuleOperator::In,
            "$user.groups",
        )]))
    }

    #[test]
    fn single_conditional_grant_is_returned_directly() {
        let a = grant(ResourceRef::module("crm.leads"), "read", owner_only());
        assert_eq!(
            derive_row_filter([&a], "crm.leads", "read", &ctx()).unwrap(),
            Predicate::eq("data.owner", "u1")
        );
    }

    #[test]
    fn unconditional_grant_wins_over_conditional() {
        let a = grant(ResourceRef::module("crm.leads"), "read", owner_only());
        let b = grant(ResourceRef::module("crm.leads"), "read", ActionPermission::allow());
        assert_eq!(
            derive_row_filter([&a, &b], "crm.leads", "read", &ctx()).unwrap(),
            Predicate::Always
        );
    }

    #[test]
    fn conditional_grants_from_several_roles_are_ored() {
        let a = grant(ResourceRef::module("crm.leads"), "read", owner_only());
        let b = grant(ResourceRef::wildcard(), "read", team_only());
        assert_eq!(
            derive_row_filter([&a, &b], "crm.leads", "read", &ctx()).unwrap(),
            Predicate::Or(vec![
                Predicate::eq("data.owner", "u1"),
                Predicate::leaf("data.team", CompareOp::In, serde_json::json!(["g1"])),
            ])
        );
    }

    #[test]
    fn nothing_applicable_denies_all_rows() {
        let other_resource = grant(ResourceRef::module("crm.deals"), "read", ActionPermission::allow());
        let other_action = grant(ResourceRef::module("crm.leads"), "delete", ActionPermission::allow());
        let denied = grant(ResourceRef::module("crm.leads"), "read", ActionPermission::deny());
        assert_eq!(
            derive_row_filter(
                [&other_resource, &other_action, &denied],
                "crm.leads",
                "read",
                &ctx()
            )
            .unwrap(),
            Predicate::Never
        );
    }

    #[test]
    fn broken_condition_fails_even_next_to_full_access() {
        let full = grant(ResourceRef::module("crm.leads"), "read", ActionPermission::allow());
        let broken = grant(
            ResourceRef::module("crm.leads"),
            "read",
            ActionPermission::allow_when(ConditionGroup::all([ConditionRule::variable(
                "org",
                RuleOperator::Eq,
                "$user.org_id",
            )])),
        );
        let err = derive_row_filter([&full, &broken], "crm.leads", "read", &ctx()).unwrap_err();
        assert!(matches!(err, AuthzError::UnresolvedVariable(_)));
    }
}
