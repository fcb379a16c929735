//! Collaborator contracts consumed by the engine.
//!
//! The engine never owns storage. Adapters live in `nexcrm-infra`; every call
//! is tenant-scoped and every failure is surfaced as a `StoreError`, which the
//! engine propagates unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use nexcrm_core::{RoleId, TenantId, UserId};

use crate::permissions::{Permission, ResourceRef};
use crate::roles::Role;

/// Store adapter failure.
///
/// None of these is a permission decision. Callers must surface them
/// distinctly from deny results.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out")]
    Timeout,

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Tenant-scoped CRUD over roles and their permission grants.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn find_role(&self, tenant_id: TenantId, role_id: RoleId)
    -> Result<Option<Role>, StoreError>;

    async fn find_role_by_name(
        &self,
        tenant_id: TenantId,
        name: &str,
    ) -> Result<Option<Role>, StoreError>;

    async fn list_roles(&self, tenant_id: TenantId) -> Result<Vec<Role>, StoreError>;

    /// Insert a new role. Fails with `Conflict` if the id or name is taken.
    async fn insert_role(&self, role: Role) -> Result<Role, StoreError>;

    /// Replace an existing role. Fails with `Conflict` if the new name is taken.
    async fn update_role(&self, role: Role) -> Result<Role, StoreError>;

    /// Remove a role together with its permission records.
    ///
    /// Returns `false` when the role did not exist.
    async fn delete_role(&self, tenant_id: TenantId, role_id: RoleId) -> Result<bool, StoreError>;

    async fn list_permissions_by_role(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
    ) -> Result<Vec<Permission>, StoreError>;

    async fn list_permissions_by_resource(
        &self,
        tenant_id: TenantId,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<Permission>, StoreError>;

    /// Upsert keyed on `(tenant, role, resource)`.
    ///
    /// An existing record keeps its id; actions and field rules are replaced.
    async fn upsert_permission(&self, permission: Permission) -> Result<Permission, StoreError>;

    async fn delete_permission(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
        resource: &ResourceRef,
    ) -> Result<bool, StoreError>;
}

/// Principal -> assigned role ids (owned by user management).
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Role ids assigned to `user_id` in `tenant_id`, in assignment order.
    ///
    /// `None` when the principal is unknown in this tenant.
    async fn role_ids(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<Vec<RoleId>>, StoreError>;
}

#[async_trait]
impl<S> PermissionStore for Arc<S>
where
    S: PermissionStore + ?Sized,
{
    async fn find_role(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
    ) -> Result<Option<Role>, StoreError> {
        (**self).find_role(tenant_id, role_id).await
    }

    async fn find_role_by_name(
        &self,
        tenant_id: TenantId,
        name: &str,
    ) -> Result<Option<Role>, StoreError> {
        (**self).find_role_by_name(tenant_id, name).await
    }

    async fn list_roles(&self, tenant_id: TenantId) -> Result<Vec<Role>, StoreError> {
        (**self).list_roles(tenant_id).await
    }

    async fn insert_role(&self, role: Role) -> Result<Role, StoreError> {
        (**self).insert_role(role).await
    }

    async fn update_role(&self, role: Role) -> Result<Role, StoreError> {
        (**self).update_role(role).await
    }

    async fn delete_role(&self, tenant_id: TenantId, role_id: RoleId) -> Result<bool, StoreError> {
        (**self).delete_role(tenant_id, role_id).await
    }

    async fn list_permissions_by_role(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
    ) -> Result<Vec<Permission>, StoreError> {
        (**self).list_permissions_by_role(tenant_id, role_id).await
    }

    async fn list_permissions_by_resource(
        &self,
        tenant_id: TenantId,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<Permission>, StoreError> {
        (**self)
            .list_permissions_by_resource(tenant_id, resource_type, resource_id)
            .await
    }

    async fn upsert_permission(&self, permission: Permission) -> Result<Permission, StoreError> {
        (**self).upsert_permission(permission).await
    }

    async fn delete_permission(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
        resource: &ResourceRef,
    ) -> Result<bool, StoreError> {
        (**self).delete_permission(tenant_id, role_id, resource).await
    }
}

#[async_trait]
impl<D> PrincipalDirectory for Arc<D>
where
    D: PrincipalDirectory + ?Sized,
{
    async fn role_ids(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<Vec<RoleId>>, StoreError> {
        (**self).role_ids(tenant_id, user_id).await
    }
}
