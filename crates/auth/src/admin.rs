//! Administrative mutations on roles and permission grants.
//!
//! Every mutation is tenant-scoped by the request context. System roles are
//! read-only here: update, delete and grant changes fail with `Forbidden`.

use std::collections::BTreeMap;

use serde::Deserialize;

use nexcrm_core::RoleId;

use crate::error::{AuthzError, AuthzResult};
use crate::permissions::{ActionPermission, FieldRules, Permission, ResourceRef};
use crate::principal::RequestContext;
use crate::roles::{Role, RoleGrants, embedded_resource};
use crate::store::{PermissionStore, StoreError};

/// Input for creating a role.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: RoleGrants,
    #[serde(default)]
    pub field_permissions: BTreeMap<String, FieldRules>,
}

impl RoleDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Partial update for a role; `None` leaves the attribute untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Option<RoleGrants>,
    #[serde(default)]
    pub field_permissions: Option<BTreeMap<String, FieldRules>>,
}

pub struct RoleAdmin<S> {
    store: S,
}

impl<S> RoleAdmin<S>
where
    S: PermissionStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn list_roles(&self, ctx: &RequestContext) -> AuthzResult<Vec<Role>> {
        Ok(self.store.list_roles(ctx.tenant_id()).await?)
    }

    #[tracing::instrument(skip(self, ctx, draft), fields(tenant_id = %ctx.tenant_id(), name = %draft.name))]
    pub async fn create_role(&self, ctx: &RequestContext, draft: RoleDraft) -> AuthzResult<Role> {
        self.insert(ctx, draft, false).await
    }

    /// Seed a system role (e.g. the tenant's `admin`). It is immutable afterwards.
    #[tracing::instrument(skip(self, ctx, draft), fields(tenant_id = %ctx.tenant_id(), name = %draft.name))]
    pub async fn create_system_role(
        &self,
        ctx: &RequestContext,
        draft: RoleDraft,
    ) -> AuthzResult<Role> {
        self.insert(ctx, draft, true).await
    }

    /// Store a fully formed role (id and system flag kept), e.g. from a seed file.
    ///
    /// The role must belong to the request's tenant.
    #[tracing::instrument(skip(self, ctx, role), fields(tenant_id = %ctx.tenant_id(), role_id = %role.id))]
    pub async fn import_role(&self, ctx: &RequestContext, role: Role) -> AuthzResult<Role> {
        ctx.ensure_tenant(&role).inspect_err(|_| {
            tracing::warn!(role_tenant = %role.tenant_id, "refusing to import role from another tenant");
        })?;
        role.validate()?;
        self.ensure_name_free(ctx, &role.name, Some(role.id)).await?;
        let role = self.store.insert_role(role).await?;
        for permission in role.embedded_permissions() {
            self.store.upsert_permission(permission).await?;
        }
        Ok(role)
    }

    async fn insert(&self, ctx: &RequestContext, draft: RoleDraft, is_system: bool) -> AuthzResult<Role> {
        let mut role = Role::new(ctx.tenant_id(), draft.name.trim());
        role.description = draft.description;
        role.is_system = is_system;
        role.permissions = draft.permissions;
        role.field_permissions = draft.field_permissions;
        role.validate()?;

        self.ensure_name_free(ctx, &role.name, None).await?;
        let role = self.store.insert_role(role).await?;

        for permission in role.embedded_permissions() {
            self.store.upsert_permission(permission).await?;
        }

        tracing::info!(role_id = %role.id, actor = %ctx.user_id(), "role created");
        Ok(role)
    }

    #[tracing::instrument(skip(self, ctx, changes), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn update_role(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        changes: RoleChanges,
    ) -> AuthzResult<Role> {
        let existing = self.load_mutable(ctx, role_id).await?;
        let mut role = existing.clone();

        if let Some(name) = changes.name {
            let name = name.trim().to_string();
            if name != role.name {
                self.ensure_name_free(ctx, &name, Some(role_id)).await?;
            }
            role.name = name;
        }
        if let Some(description) = changes.description {
            role.description = Some(description);
        }
        if let Some(field_permissions) = changes.field_permissions {
            role.field_permissions = field_permissions;
        }
        let grants_changed = changes.permissions.is_some();
        if let Some(permissions) = changes.permissions {
            role.permissions = permissions;
        }
        role.validate()?;

        let role = self.store.update_role(role).await?;

        if grants_changed {
            for resource_id in existing.permissions.keys() {
                if !role.permissions.contains_key(resource_id) {
                    self.store
                        .delete_permission(ctx.tenant_id(), role_id, &embedded_resource(resource_id))
                        .await?;
                }
            }
            for permission in role.embedded_permissions() {
                self.store.upsert_permission(permission).await?;
            }
        }

        tracing::info!(%role_id, actor = %ctx.user_id(), "role updated");
        Ok(role)
    }

    /// Delete a role and every permission record it holds.
    #[tracing::instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn delete_role(&self, ctx: &RequestContext, role_id: RoleId) -> AuthzResult<()> {
        self.load_mutable(ctx, role_id).await?;

        if !self.store.delete_role(ctx.tenant_id(), role_id).await? {
            return Err(AuthzError::RoleNotFound(role_id));
        }

        tracing::info!(%role_id, actor = %ctx.user_id(), "role deleted");
        Ok(())
    }

    /// Grant `actions` and `field_rules` on `resource` to a role.
    ///
    /// Upsert: an existing grant for the same `(role, resource)` is replaced.
    #[tracing::instrument(skip(self, ctx, actions, field_rules), fields(tenant_id = %ctx.tenant_id(), resource = %resource))]
    pub async fn assign_permission(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        resource: ResourceRef,
        actions: BTreeMap<String, ActionPermission>,
        field_rules: FieldRules,
    ) -> AuthzResult<Permission> {
        self.load_mutable(ctx, role_id).await?;

        let mut permission = Permission::new(ctx.tenant_id(), role_id, resource);
        permission.actions = actions;
        permission.field_rules = field_rules;

        let stored = self.store.upsert_permission(permission).await?;
        tracing::info!(%role_id, permission_id = %stored.id, actor = %ctx.user_id(), "permission assigned");
        Ok(stored)
    }

    /// Returns `false` when the role held no grant on `resource`.
    #[tracing::instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), resource = %resource))]
    pub async fn revoke_permission(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        resource: &ResourceRef,
    ) -> AuthzResult<bool> {
        self.load_mutable(ctx, role_id).await?;
        let removed = self
            .store
            .delete_permission(ctx.tenant_id(), role_id, resource)
            .await?;
        if removed {
            tracing::info!(%role_id, actor = %ctx.user_id(), "permission revoked");
        }
        Ok(removed)
    }

    pub async fn permissions_for_resource(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        resource_id: &str,
    ) -> AuthzResult<Vec<Permission>> {
        Ok(self
            .store
            .list_permissions_by_resource(ctx.tenant_id(), resource_type, resource_id)
            .await?)
    }

    async fn load_mutable(&self, ctx: &RequestContext, role_id: RoleId) -> AuthzResult<Role> {
        let role = self
            .store
            .find_role(ctx.tenant_id(), role_id)
            .await?
            .ok_or(AuthzError::RoleNotFound(role_id))?;
        role.ensure_mutable()?;
        Ok(role)
    }

    async fn ensure_name_free(
        &self,
        ctx: &RequestContext,
        name: &str,
        except: Option<RoleId>,
    ) -> AuthzResult<()> {
        match self.store.find_role_by_name(ctx.tenant_id(), name).await? {
            Some(other) if Some(other.id) != except => Err(StoreError::Conflict(format!(
                "role name '{name}' already exists"
            ))
            .into()),
            _ => Ok(()),
        }
    }
}
