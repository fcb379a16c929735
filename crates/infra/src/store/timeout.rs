use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use nexcrm_auth::{Permission, PermissionStore, PrincipalDirectory, ResourceRef, Role, StoreError};
use nexcrm_core::{RoleId, TenantId, UserId};

/// Adapter that bounds every call of the wrapped store with a deadline.
///
/// An elapsed deadline surfaces as `StoreError::Timeout`; the pending call is
/// dropped (cancelled).
#[derive(Debug, Clone)]
pub struct TimeoutStore<S> {
    inner: S,
    limit: Duration,
}

impl<S> TimeoutStore<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.limit, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    operation,
                    limit_ms = self.limit.as_millis() as u64,
                    "store call timed out"
                );
                Err(StoreError::Timeout)
            }
        }
    }
}

#[async_trait]
impl<S> PermissionStore for TimeoutStore<S>
where
    S: PermissionStore,
{
    async fn find_role(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
    ) -> Result<Option<Role>, StoreError> {
        self.bounded("find_role", self.inner.find_role(tenant_id, role_id))
            .await
    }

    async fn find_role_by_name(
        &self,
        tenant_id: TenantId,
        name: &str,
    ) -> Result<Option<Role>, StoreError> {
        self.bounded("find_role_by_name", self.inner.find_role_by_name(tenant_id, name))
            .await
    }

    async fn list_roles(&self, tenant_id: TenantId) -> Result<Vec<Role>, StoreError> {
        self.bounded("list_roles", self.inner.list_roles(tenant_id)).await
    }

    async fn insert_role(&self, role: Role) -> Result<Role, StoreError> {
        self.bounded("insert_role", self.inner.insert_role(role)).await
    }

    async fn update_role(&self, role: Role) -> Result<Role, StoreError> {
        self.bounded("update_role", self.inner.update_role(role)).await
    }

    async fn delete_role(&self, tenant_id: TenantId, role_id: RoleId) -> Result<bool, StoreError> {
        self.bounded("delete_role", self.inner.delete_role(tenant_id, role_id))
            .await
    }

    async fn list_permissions_by_role(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
    ) -> Result<Vec<Permission>, StoreError> {
        self.bounded(
            "list_permissions_by_role",
            self.inner.list_permissions_by_role(tenant_id, role_id),
        )
        .await
    }

    async fn list_permissions_by_resource(
        &self,
        tenant_id: TenantId,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<Permission>, StoreError> {
        self.bounded(
            "list_permissions_by_resource",
            self.inner
                .list_permissions_by_resource(tenant_id, resource_type, resource_id),
        )
        .await
    }

    async fn upsert_permission(&self, permission: Permission) -> Result<Permission, StoreError> {
        self.bounded("upsert_permission", self.inner.upsert_permission(permission))
            .await
    }

    async fn delete_permission(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
        resource: &ResourceRef,
    ) -> Result<bool, StoreError> {
        self.bounded(
            "delete_permission",
            self.inner.delete_permission(tenant_id, role_id, resource),
        )
        .await
    }
}

#[async_trait]
impl<S> PrincipalDirectory for TimeoutStore<S>
where
    S: PrincipalDirectory,
{
    async fn role_ids(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<Vec<RoleId>>, StoreError> {
        self.bounded("role_ids", self.inner.role_ids(tenant_id, user_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPermissionStore;

    /// Directory whose lookups never finish in time.
    struct StalledDirectory;

    #[async_trait]
    impl PrincipalDirectory for StalledDirectory {
        async fn role_ids(
            &self,
            _tenant_id: TenantId,
            _user_id: UserId,
        ) -> Result<Option<Vec<RoleId>>, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(vec![]))
        }
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let store = TimeoutStore::new(StalledDirectory, Duration::from_millis(10));
        let err = store
            .role_ids(TenantId::new(), UserId::new())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Timeout);
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let store = TimeoutStore::new(InMemoryPermissionStore::new(), Duration::from_secs(1));
        let tenant = TenantId::new();
        let role = store.insert_role(Role::new(tenant, "sales")).await.unwrap();
        assert_eq!(store.find_role(tenant, role.id).await.unwrap(), Some(role));
    }
}
