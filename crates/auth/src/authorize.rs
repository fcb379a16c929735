//! Access Control Service: the public face of the permission engine.
//!
//! Three questions, each per principal, tenant, resource and action:
//! - `check_permission`: coarse capability gate (conditions ignored)
//! - `get_access_filter`: which rows may be touched (conditions compiled)
//! - `get_field_permissions`: which fields are visible/editable
//!
//! `check_permission` answering `true` does NOT mean every row is accessible.
//! Endpoints that mutate or delete a single record should also call
//! `authorize_record` (or apply `get_access_filter` to the lookup), otherwise
//! row conditions are not enforced for that write.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use nexcrm_core::{RoleId, TenantId, UserId};

use crate::aggregator::{EffectivePermissions, PermissionAggregator};
use crate::error::{AuthzError, AuthzResult};
use crate::fields::{FieldPermissions, resolve_field_permissions};
use crate::permissions::Permission;
use crate::predicate::Predicate;
use crate::principal::{ContextData, RequestContext};
use crate::roles::{AccessPolicy, Role};
use crate::row_filter::derive_row_filter;
use crate::store::{PermissionStore, PrincipalDirectory};

pub struct AccessControlService<S, D> {
    aggregator: PermissionAggregator<S>,
    directory: D,
    policy: AccessPolicy,
}

impl<S, D> AccessControlService<S, D>
where
    S: PermissionStore,
    D: PrincipalDirectory,
{
    pub fn new(store: S, directory: D) -> Self {
        Self {
            aggregator: PermissionAggregator::new(store),
            directory,
            policy: AccessPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    fn store(&self) -> &S {
        self.aggregator.store()
    }

    /// Roles currently assigned to the request's principal, in assignment order.
    ///
    /// Assignments pointing at deleted roles are skipped: a role that no longer
    /// exists grants nothing and lifts no field restriction.
    pub async fn principal_roles(&self, ctx: &RequestContext) -> AuthzResult<Vec<Role>> {
        let tenant_id = ctx.tenant_id();
        let user_id = ctx.user_id();

        let role_ids = self
            .directory
            .role_ids(tenant_id, user_id)
            .await
            .inspect_err(|e| tracing::error!(%user_id, error = %e, "failed to load role assignments"))?
            .ok_or(AuthzError::PrincipalNotFound(user_id))?;

        let mut seen: HashSet<RoleId> = HashSet::with_capacity(role_ids.len());
        let mut roles = Vec::with_capacity(role_ids.len());
        for role_id in role_ids {
            if !seen.insert(role_id) {
                continue;
            }
            let role = self
                .store()
                .find_role(tenant_id, role_id)
                .await
                .inspect_err(|e| tracing::error!(%role_id, error = %e, "failed to load role"))?;
            match role {
                Some(role) => {
                    ctx.ensure_tenant(&role).inspect_err(|_| {
                        tracing::error!(%role_id, "store returned a role from another tenant");
                    })?;
                    roles.push(role);
                }
                None => {
                    tracing::warn!(%user_id, %role_id, "principal is assigned a role that does not exist");
                }
            }
        }
        Ok(roles)
    }

    fn bypass_role<'r>(&self, roles: &'r [Role]) -> Option<&'r Role> {
        roles.iter().find(|role| self.policy.is_bypass(role))
    }

    /// Effective (merged) permissions of the request's principal.
    pub async fn effective_permissions(
        &self,
        ctx: &RequestContext,
    ) -> AuthzResult<EffectivePermissions> {
        let roles = self.principal_roles(ctx).await?;
        let role_ids: Vec<RoleId> = roles.iter().map(|r| r.id).collect();
        self.aggregator
            .effective_permissions(ctx.tenant_id(), &role_ids)
            .await
    }

    /// Coarse capability gate: may the principal perform `action` on `resource_id` at all?
    ///
    /// ABAC conditions are not evaluated; a conditional allow counts as `true`.
    #[tracing::instrument(
        skip(self, ctx),
        fields(tenant_id = %ctx.tenant_id(), user_id = %ctx.user_id())
    )]
    pub async fn check_permission(
        &self,
        ctx: &RequestContext,
        resource_id: &str,
        action: &str,
    ) -> AuthzResult<bool> {
        let roles = self.principal_roles(ctx).await?;
        if let Some(role) = self.bypass_role(&roles) {
            tracing::debug!(decision = "bypass", role = %role.name);
            return Ok(true);
        }

        let role_ids: Vec<RoleId> = roles.iter().map(|r| r.id).collect();
        let effective = self
            .aggregator
            .effective_permissions(ctx.tenant_id(), &role_ids)
            .await?;
        let allowed = effective.allows(resource_id, action);
        let decision = if allowed { "allow" } else { "deny" };
        tracing::debug!(decision);
        Ok(allowed)
    }

    /// Row filter scoping list/query operations for `(resource_id, action)`.
    #[tracing::instrument(
        skip(self, ctx),
        fields(tenant_id = %ctx.tenant_id(), user_id = %ctx.user_id())
    )]
    pub async fn get_access_filter(
        &self,
        ctx: &RequestContext,
        resource_id: &str,
        action: &str,
    ) -> AuthzResult<Predicate> {
        let context = ctx.context_data();
        self.get_access_filter_with(ctx, &context, resource_id, action)
            .await
    }

    /// Like `get_access_filter`, with caller-supplied condition variables.
    pub async fn get_access_filter_with(
        &self,
        ctx: &RequestContext,
        context: &ContextData,
        resource_id: &str,
        action: &str,
    ) -> AuthzResult<Predicate> {
        let roles = self.principal_roles(ctx).await?;
        if let Some(role) = self.bypass_role(&roles) {
            tracing::debug!(decision = "bypass", role = %role.name);
            return Ok(Predicate::Always);
        }

        let grants = self.role_permissions(ctx.tenant_id(), &roles).await?;
        let filter = derive_row_filter(
            grants.iter().flat_map(|(_, perms)| perms.iter()),
            resource_id,
            action,
            context,
        )?;

        let decision = match &filter {
            Predicate::Always => "allow",
            Predicate::Never => "deny",
            _ => "conditional",
        };
        tracing::debug!(decision);
        Ok(filter)
    }

    /// Field-level restrictions for `module`; `None` means every field is
    /// visible and editable.
    #[tracing::instrument(
        skip(self, ctx),
        fields(tenant_id = %ctx.tenant_id(), user_id = %ctx.user_id())
    )]
    pub async fn get_field_permissions(
        &self,
        ctx: &RequestContext,
        module: &str,
    ) -> AuthzResult<Option<FieldPermissions>> {
        let roles = self.principal_roles(ctx).await?;
        let fields = resolve_field_permissions(&roles, module);
        tracing::debug!(restricted = fields.is_some());
        Ok(fields)
    }

    /// Row-level check for one loaded record.
    ///
    /// Derives the access filter and evaluates it against `record`. Use before
    /// same-record updates and deletes.
    pub async fn authorize_record(
        &self,
        ctx: &RequestContext,
        resource_id: &str,
        action: &str,
        record: &Value,
    ) -> AuthzResult<bool> {
        let filter = self.get_access_filter(ctx, resource_id, action).await?;
        Ok(filter.matches(record))
    }

    /// Explain why `check_permission` would answer the way it does.
    pub async fn explain_permission(
        &self,
        ctx: &RequestContext,
        resource_id: &str,
        action: &str,
    ) -> AuthzResult<AuthorizationExplanation> {
        let roles = self.principal_roles(ctx).await?;
        let principal = PrincipalState {
            user_id: ctx.user_id(),
            tenant_id: ctx.tenant_id(),
            roles: roles.iter().map(|r| r.name.clone()).collect(),
        };

        if let Some(role) = self.bypass_role(&roles) {
            return Ok(AuthorizationExplanation {
                resource: resource_id.to_string(),
                action: action.to_string(),
                granted: true,
                reason: format!("role '{}' bypasses permission checks", role.name),
                principal,
                granting_roles: vec![GrantingRole {
                    role: role.name.clone(),
                    resource: "*".to_string(),
                    conditional: false,
                }],
                denial_reason: None,
            });
        }

        let grants = self.role_permissions(ctx.tenant_id(), &roles).await?;
        let granting_roles: Vec<GrantingRole> = grants
            .iter()
            .flat_map(|(role, perms)| {
                perms
                    .iter()
                    .filter(move |p| p.resource.covers(resource_id))
                    .filter_map(move |p| {
                        let grant = p.action(action).filter(|g| g.allowed)?;
                        Some(GrantingRole {
                            role: role.name.clone(),
                            resource: p.resource.id.clone(),
                            conditional: grant.conditions.is_some(),
                        })
                    })
            })
            .collect();

        if !granting_roles.is_empty() {
            let conditional = granting_roles.iter().all(|g| g.conditional);
            let reason = if conditional {
                format!("'{action}' on '{resource_id}' is granted only under row conditions")
            } else {
                format!("'{action}' on '{resource_id}' is granted unconditionally")
            };
            return Ok(AuthorizationExplanation {
                resource: resource_id.to_string(),
                action: action.to_string(),
                granted: true,
                reason,
                principal,
                granting_roles,
                denial_reason: None,
            });
        }

        let denial_reason = if roles.is_empty() {
            DenialReason {
                kind: DenialKind::NoRoles,
                message: "principal has no roles in this tenant".to_string(),
                suggestions: vec!["Assign a role to the principal".to_string()],
            }
        } else {
            let explicitly_denied = grants.iter().any(|(_, perms)| {
                perms
                    .iter()
                    .any(|p| p.resource.covers(resource_id) && p.action(action).is_some())
            });
            DenialReason {
                kind: if explicitly_denied {
                    DenialKind::ExplicitDeny
                } else {
                    DenialKind::MissingPermission
                },
                message: format!("no role grants '{action}' on '{resource_id}'"),
                suggestions: vec![
                    format!("Grant '{action}' on '{resource_id}' to one of the principal's roles"),
                    "Assign a role that already grants it".to_string(),
                ],
            }
        };

        Ok(AuthorizationExplanation {
            resource: resource_id.to_string(),
            action: action.to_string(),
            granted: false,
            reason: denial_reason.message.clone(),
            principal,
            granting_roles,
            denial_reason: Some(denial_reason),
        })
    }

    async fn role_permissions<'r>(
        &self,
        tenant_id: TenantId,
        roles: &'r [Role],
    ) -> AuthzResult<Vec<(&'r Role, Vec<Permission>)>> {
        let mut out = Vec::with_capacity(roles.len());
        for role in roles {
            let perms = self
                .store()
                .list_permissions_by_role(tenant_id, role.id)
                .await
                .inspect_err(|e| tracing::error!(role_id = %role.id, error = %e, "failed to load role permissions"))?;
            out.push((role, perms));
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of a coarse authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub resource: String,
    pub action: String,
    pub granted: bool,
    pub reason: String,
    pub principal: PrincipalState,
    /// Roles whose grants allow the action (conditional or not).
    pub granting_roles: Vec<GrantingRole>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrincipalState {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantingRole {
    pub role: String,
    pub resource: String,
    pub conditional: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    NoRoles,
    MissingPermission,
    ExplicitDeny,
}
