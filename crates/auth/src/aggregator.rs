//! Permission Aggregator: folds every role's grants into one `Permission` per resource.
//!
//! Action merge precedence, per `(resource id, action)`:
//! 1. first grant seen is adopted as-is;
//! 2. an unconditional allow overwrites whatever is stored;
//! 3. an allow replaces a stored deny (conditions travel with it);
//! 4. otherwise the stored grant is kept.
//!
//! Rule 4 means two different conditional allows are NOT unioned here. Row
//! scoping that must union conditions across roles goes through
//! [`derive_row_filter`](crate::row_filter::derive_row_filter) instead.

use std::collections::BTreeMap;

use serde::Serialize;

use nexcrm_core::{RoleId, TenantId};

use crate::error::AuthzResult;
use crate::fields::merge_field_rules;
use crate::permissions::{ActionPermission, Permission, WILDCARD_RESOURCE};
use crate::store::PermissionStore;

/// Merged grants keyed by resource id (the wildcard `"*"` included).
///
/// A snapshot: recomputed on every call, never written back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EffectivePermissions(BTreeMap<String, Permission>);

impl EffectivePermissions {
    pub fn get(&self, resource_id: &str) -> Option<&Permission> {
        self.0.get(resource_id)
    }

    pub fn wildcard(&self) -> Option<&Permission> {
        self.get(WILDCARD_RESOURCE)
    }

    /// Coarse capability: the wildcard or the exact resource allows `action`.
    ///
    /// Conditions are not evaluated.
    pub fn allows(&self, resource_id: &str, action: &str) -> bool {
        self.wildcard().is_some_and(|p| p.allows(action))
            || self.get(resource_id).is_some_and(|p| p.allows(action))
    }

    /// The grant that decides `allows`, preferring the wildcard.
    pub fn grant_for(&self, resource_id: &str, action: &str) -> Option<&ActionPermission> {
        [self.wildcard(), self.get(resource_id)]
            .into_iter()
            .flatten()
            .filter_map(|p| p.action(action))
            .find(|grant| grant.allowed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Permission)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Merge permission records (in role order) into effective permissions.
///
/// Inputs are never mutated; the first record per resource is cloned and the
/// clone is the accumulator.
pub fn merge_effective_permissions<'a, I>(permissions: I) -> EffectivePermissions
where
    I: IntoIterator<Item = &'a Permission>,
{
    let mut merged: BTreeMap<String, Permission> = BTreeMap::new();
    for permission in permissions {
        match merged.get_mut(&permission.resource.id) {
            Some(acc) => merge_permission(acc, permission),
            None => {
                merged.insert(permission.resource.id.clone(), permission.clone());
            }
        }
    }
    EffectivePermissions(merged)
}

fn merge_permission(acc: &mut Permission, incoming: &Permission) {
    for (action, grant) in &incoming.actions {
        match acc.actions.get_mut(action) {
            Some(stored) => merge_action(stored, grant),
            None => {
                acc.actions.insert(action.clone(), grant.clone());
            }
        }
    }
    merge_field_rules(&mut acc.field_rules, &incoming.field_rules);
}

/// Apply the action precedence rules to one stored grant.
pub fn merge_action(stored: &mut ActionPermission, incoming: &ActionPermission) {
    if incoming.is_unconditional_allow() || (incoming.allowed && !stored.allowed) {
        *stored = incoming.clone();
    }
}

/// Loads role grants from the store and merges them.
#[derive(Debug, Clone)]
pub struct PermissionAggregator<S> {
    store: S,
}

impl<S> PermissionAggregator<S>
where
    S: PermissionStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Effective permissions for a set of roles.
    ///
    /// Store failures abort the call; they never degrade to "no permissions".
    #[tracing::instrument(skip(self, role_ids), fields(roles = role_ids.len()))]
    pub async fn effective_permissions(
        &self,
        tenant_id: TenantId,
        role_ids: &[RoleId],
    ) -> AuthzResult<EffectivePermissions> {
        let mut records = Vec::new();
        for role_id in role_ids {
            let mut grants = self
                .store
                .list_permissions_by_role(tenant_id, *role_id)
                .await
                .inspect_err(|e| tracing::error!(%role_id, error = %e, "failed to load role permissions"))?;
            records.append(&mut grants);
        }

        let effective = merge_effective_permissions(&records);
        tracing::debug!(resources = effective.len(), "effective permissions computed");
        Ok(effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ConditionGroup, ConditionRule, RuleOperator};
    use crate::permissions::{FieldAccessLevel, ResourceRef};

    fn perm(resource: &str) -> Permission {
        Permission::new(TenantId::new(), RoleId::new(), ResourceRef::module(resource))
    }

    fn owner_only() -> ConditionGroup {
        ConditionGroup::all([ConditionRule::variable("owner", RuleOperator::Eq, "user.id")])
    }

    fn team_only() -> ConditionGroup {
        ConditionGroup::all([ConditionRule::variable("team", RuleOperator::In, "user.groups")])
    }

    #[test]
    fn first_grant_is_adopted_as_is() {
        let a = perm("crm.leads").with_action("read", ActionPermission::allow_when(owner_only()));
        let effective = merge_effective_permissions([&a]);
        assert_eq!(effective.get("crm.leads"), Some(&a));
    }

    #[test]
    fn unconditional_allow_overwrites_conditional() {
        let a = perm("crm.leads").with_action("read", ActionPermission::allow_when(owner_only()));
        let b = perm("crm.leads").with_action("read", ActionPermission::allow());
        let effective = merge_effective_permissions([&a, &b]);
        assert!(effective.get("crm.leads").unwrap().actions["read"].is_unconditional_allow());
    }

    #[test]
    fn conditional_allow_replaces_deny() {
        let a = perm("crm.leads").with_action("update", ActionPermission::deny());
        let b = perm("crm.leads").with_action("update", ActionPermission::allow_when(owner_only()));
        let effective = merge_effective_permissions([&a, &b]);
        assert_eq!(
            effective.get("crm.leads").unwrap().actions["update"].conditions,
            Some(owner_only())
        );
    }

    #[test]
    fn second_conditional_allow_does_not_union() {
        let a = perm("crm.leads").with_action("read", ActionPermission::allow_when(owner_only()));
        let b = perm("crm.leads").with_action("read", ActionPermission::allow_when(team_only()));
        let effective = merge_effective_permissions([&a, &b]);
        assert_eq!(
            effective.get("crm.leads").unwrap().actions["read"].conditions,
            Some(owner_only())
        );
    }

    #[test]
    fn deny_never_downgrades_an_allow() {
        let a = perm("crm.leads").with_action("read", ActionPermission::allow());
        let b = perm("crm.leads").with_action("read", ActionPermission::deny());
        let effective = merge_effective_permissions([&a, &b]);
        assert!(effective.allows("crm.leads", "read"));
    }

    #[test]
    fn merge_does_not_mutate_inputs() {
        let a = perm("crm.leads")
            .with_action("read", ActionPermission::deny())
            .with_field("email", FieldAccessLevel::NoAccess);
        let b = perm("crm.leads")
            .with_action("read", ActionPermission::allow())
            .with_action("delete", ActionPermission::allow())
            .with_field("email", FieldAccessLevel::ReadWrite);
        let before = a.clone();

        let effective = merge_effective_permissions([&a, &b]);
        assert_eq!(a, before);

        let merged = effective.get("crm.leads").unwrap();
        assert_eq!(merged.field_rules["email"], FieldAccessLevel::ReadWrite);
        assert!(merged.allows("delete"));
    }

    #[test]
    fn wildcard_grants_count_for_every_resource() {
        let any = Permission::new(TenantId::new(), RoleId::new(), ResourceRef::wildcard())
            .with_action("read", ActionPermission::allow());
        let effective = merge_effective_permissions([&any]);
        assert!(effective.allows("crm.deals", "read"));
        assert!(!effective.allows("crm.deals", "delete"));
        assert!(effective.grant_for("crm.deals", "read").is_some());
    }

    #[test]
    fn coarse_check_ignores_conditions() {
        let a = perm("crm.leads").with_action("read", ActionPermission::allow_when(owner_only()));
        assert!(merge_effective_permissions([&a]).allows("crm.leads", "read"));
    }
}
