use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use nexcrm_core::{DomainError, DomainResult, Entity, RoleId, TenantId, TenantOwned};

use crate::error::AuthzError;
use crate::permissions::{
    ActionPermission, FieldAccessLevel, FieldRules, Permission, ResourceRef, WILDCARD_RESOURCE,
};

/// Grants declared inline on a role: resource id -> action -> grant.
pub type RoleGrants = BTreeMap<String, BTreeMap<String, ActionPermission>>;

/// Tenant-scoped principal group.
///
/// # Invariants
/// - `tenant_id` never changes after creation.
/// - System roles (`is_system`) reject update and delete.
/// - Names are non-empty and unique within a tenant (enforced by admin + store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub tenant_id: TenantId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub permissions: RoleGrants,
    /// Module name -> field name -> access level.
    ///
    /// A module with no entry here is unrestricted for this role.
    #[serde(default)]
    pub field_permissions: BTreeMap<String, FieldRules>,
}

impl Role {
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id: RoleId::new(),
            tenant_id,
            name: name.into(),
            description: None,
            is_system: false,
            permissions: RoleGrants::new(),
            field_permissions: BTreeMap::new(),
        }
    }

    pub fn system(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            is_system: true,
            ..Self::new(tenant_id, name)
        }
    }

    pub fn with_id(mut self, id: RoleId) -> Self {
        self.id = id;
        self
    }

    pub fn with_grant(
        mut self,
        resource: impl Into<String>,
        action: impl Into<String>,
        grant: ActionPermission,
    ) -> Self {
        self.permissions
            .entry(resource.into())
            .or_default()
            .insert(action.into(), grant);
        self
    }

    pub fn with_field_rule(
        mut self,
        module: impl Into<String>,
        field: impl Into<String>,
        level: FieldAccessLevel,
    ) -> Self {
        self.field_permissions
            .entry(module.into())
            .or_default()
            .insert(field.into(), level);
        self
    }

    /// Field rules this role declares for `module`, if any.
    pub fn field_rules_for(&self, module: &str) -> Option<&FieldRules> {
        self.field_permissions.get(module)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("role name must not be empty"));
        }
        Ok(())
    }

    pub fn ensure_mutable(&self) -> Result<(), AuthzError> {
        if self.is_system {
            return Err(AuthzError::forbidden(format!(
                "system role '{}' cannot be modified",
                self.name
            )));
        }
        Ok(())
    }

    /// Materialize the inline grants as one `Permission` per resource.
    ///
    /// Resource ids are treated as module names; `"*"` becomes the wildcard.
    pub fn embedded_permissions(&self) -> Vec<Permission> {
        self.permissions
            .iter()
            .map(|(resource_id, actions)| {
                let mut perm =
                    Permission::new(self.tenant_id, self.id, embedded_resource(resource_id));
                perm.actions = actions.clone();
                perm
            })
            .collect()
    }
}

/// Resource reference for an inline grant key.
pub fn embedded_resource(resource_id: &str) -> ResourceRef {
    if resource_id == WILDCARD_RESOURCE {
        ResourceRef::wildcard()
    } else {
        ResourceRef::module(resource_id)
    }
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantOwned for Role {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Role names that bypass every permission check (exact, case-sensitive match).
pub const DEFAULT_BYPASS_ROLES: [&str; 2] = ["admin", "Super Admin"];

fn default_bypass_roles() -> BTreeSet<String> {
    DEFAULT_BYPASS_ROLES.iter().map(|r| r.to_string()).collect()
}

/// Engine-wide policy knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    #[serde(default = "default_bypass_roles")]
    pub bypass_roles: BTreeSet<String>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            bypass_roles: default_bypass_roles(),
        }
    }
}

impl AccessPolicy {
    pub fn with_bypass_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bypass_roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_bypass(&self, role: &Role) -> bool {
        self.bypass_roles.contains(&role.name)
    }
}
