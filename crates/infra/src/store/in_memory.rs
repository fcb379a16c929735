use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use nexcrm_auth::{Permission, PermissionStore, PrincipalDirectory, ResourceRef, Role, StoreError};
use nexcrm_core::{RoleId, TenantId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PermissionKey {
    tenant_id: TenantId,
    role_id: RoleId,
    resource_type: String,
    resource_id: String,
}

impl PermissionKey {
    fn new(tenant_id: TenantId, role_id: RoleId, resource: &ResourceRef) -> Self {
        Self {
            tenant_id,
            role_id,
            resource_type: resource.kind.clone(),
            resource_id: resource.id.clone(),
        }
    }
}

/// In-memory tenant-isolated role/permission store.
///
/// Intended for tests/dev and the policy CLI. Also serves as the principal
/// directory: role assignments are registered with [`assign_roles`](Self::assign_roles).
///
/// Calls that need both `roles` and `permissions` lock them in that order.
#[derive(Debug, Default)]
pub struct InMemoryPermissionStore {
    roles: RwLock<BTreeMap<(TenantId, RoleId), Role>>,
    permissions: RwLock<BTreeMap<PermissionKey, Permission>>,
    assignments: RwLock<HashMap<(TenantId, UserId), Vec<RoleId>>>,
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `user_id` in `tenant_id` with the given role ids (replacing any
    /// previous assignment). Unknown role ids are accepted as-is.
    pub fn assign_roles<I>(&self, tenant_id: TenantId, user_id: UserId, role_ids: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = RoleId>,
    {
        let mut map = self.assignments.write().map_err(|_| poisoned())?;
        map.insert((tenant_id, user_id), role_ids.into_iter().collect());
        Ok(())
    }

    fn name_taken(
        roles: &BTreeMap<(TenantId, RoleId), Role>,
        tenant_id: TenantId,
        name: &str,
        except: RoleId,
    ) -> bool {
        roles
            .iter()
            .any(|((t, id), r)| *t == tenant_id && *id != except && r.name == name)
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn find_role(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
    ) -> Result<Option<Role>, StoreError> {
        let map = self.roles.read().map_err(|_| poisoned())?;
        Ok(map.get(&(tenant_id, role_id)).cloned())
    }

    async fn find_role_by_name(
        &self,
        tenant_id: TenantId,
        name: &str,
    ) -> Result<Option<Role>, StoreError> {
        let map = self.roles.read().map_err(|_| poisoned())?;
        Ok(map
            .iter()
            .find(|((t, _), r)| *t == tenant_id && r.name == name)
            .map(|(_, r)| r.clone()))
    }

    async fn list_roles(&self, tenant_id: TenantId) -> Result<Vec<Role>, StoreError> {
        let map = self.roles.read().map_err(|_| poisoned())?;
        Ok(map
            .iter()
            .filter_map(|((t, _), r)| if *t == tenant_id { Some(r.clone()) } else { None })
            .collect())
    }

    async fn insert_role(&self, role: Role) -> Result<Role, StoreError> {
        let mut map = self.roles.write().map_err(|_| poisoned())?;
        let key = (role.tenant_id, role.id);
        if map.contains_key(&key) {
            return Err(StoreError::Conflict(format!("role {} already exists", role.id)));
        }
        if Self::name_taken(&map, role.tenant_id, &role.name, role.id) {
            return Err(StoreError::Conflict(format!(
                "role name '{}' already exists",
                role.name
            )));
        }
        map.insert(key, role.clone());
        Ok(role)
    }

    async fn update_role(&self, role: Role) -> Result<Role, StoreError> {
        let mut map = self.roles.write().map_err(|_| poisoned())?;
        let key = (role.tenant_id, role.id);
        if !map.contains_key(&key) {
            return Err(StoreError::Backend(format!("role {} not found", role.id)));
        }
        if Self::name_taken(&map, role.tenant_id, &role.name, role.id) {
            return Err(StoreError::Conflict(format!(
                "role name '{}' already exists",
                role.name
            )));
        }
        map.insert(key, role.clone());
        Ok(role)
    }

    async fn delete_role(&self, tenant_id: TenantId, role_id: RoleId) -> Result<bool, StoreError> {
        let mut roles = self.roles.write().map_err(|_| poisoned())?;
        let mut permissions = self.permissions.write().map_err(|_| poisoned())?;
        if roles.remove(&(tenant_id, role_id)).is_none() {
            return Ok(false);
        }
        permissions.retain(|k, _| !(k.tenant_id == tenant_id && k.role_id == role_id));
        Ok(true)
    }

    async fn list_permissions_by_role(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
    ) -> Result<Vec<Permission>, StoreError> {
        let map = self.permissions.read().map_err(|_| poisoned())?;
        Ok(map
            .iter()
            .filter(|(k, _)| k.tenant_id == tenant_id && k.role_id == role_id)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn list_permissions_by_resource(
        &self,
        tenant_id: TenantId,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<Permission>, StoreError> {
        let map = self.permissions.read().map_err(|_| poisoned())?;
        Ok(map
            .iter()
            .filter(|(k, _)| {
                k.tenant_id == tenant_id
                    && k.resource_type == resource_type
                    && k.resource_id == resource_id
            })
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn upsert_permission(&self, mut permission: Permission) -> Result<Permission, StoreError> {
        // Held until the insert so the role cannot be deleted in between.
        let roles = self.roles.read().map_err(|_| poisoned())?;
        if !roles.contains_key(&(permission.tenant_id, permission.role_id)) {
            let elsewhere = roles.keys().any(|(_, id)| *id == permission.role_id);
            return Err(if elsewhere {
                StoreError::TenantIsolation(format!(
                    "role {} belongs to another tenant",
                    permission.role_id
                ))
            } else {
                StoreError::Backend(format!("role {} not found", permission.role_id))
            });
        }

        let key = PermissionKey::new(permission.tenant_id, permission.role_id, &permission.resource);
        let mut map = self.permissions.write().map_err(|_| poisoned())?;
        if let Some(existing) = map.get(&key) {
            permission.id = existing.id;
        }
        map.insert(key, permission.clone());
        Ok(permission)
    }

    async fn delete_permission(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
        resource: &ResourceRef,
    ) -> Result<bool, StoreError> {
        let mut map = self.permissions.write().map_err(|_| poisoned())?;
        Ok(map
            .remove(&PermissionKey::new(tenant_id, role_id, resource))
            .is_some())
    }

}

#[async_trait]
impl PrincipalDirectory for InMemoryPermissionStore {
    async fn role_ids(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<Vec<RoleId>>, StoreError> {
        let map = self.assignments.read().map_err(|_| poisoned())?;
        Ok(map.get(&(tenant_id, user_id)).cloned())
    }
}
