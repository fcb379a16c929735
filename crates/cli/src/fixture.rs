//! JSON policy fixtures: roles, extra permission grants and users of one tenant.
//!
//! ```json
//! {
//!   "tenant_id": "0190f5c2-7a41-7cc3-9a52-4a8f6b0e1d10",
//!   "roles": [
//!     { "name": "sales", "permissions": { "crm.leads": { "read": { "allowed": true } } } }
//!   ],
//!   "permissions": [
//!     { "role": "sales", "resource": { "type": "module", "id": "crm.deals" },
//!       "actions": { "read": { "allowed": true } } }
//!   ],
//!   "users": [ { "name": "alice", "groups": ["east"], "roles": ["sales"] } ]
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use nexcrm_auth::roles::RoleGrants;
use nexcrm_auth::{
    ActionPermission, FieldRules, Principal, RequestContext, ResourceRef, Role, RoleAdmin,
};
use nexcrm_core::{RoleId, TenantId, UserId};
use nexcrm_infra::store::InMemoryPermissionStore;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyFixture {
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub roles: Vec<FixtureRole>,
    #[serde(default)]
    pub permissions: Vec<FixturePermission>,
    #[serde(default)]
    pub users: Vec<FixtureUser>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureRole {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub permissions: RoleGrants,
    #[serde(default)]
    pub field_permissions: BTreeMap<String, FieldRules>,
}

/// Grant outside a role's embedded map. Roles are referenced by name.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixturePermission {
    pub role: String,
    pub resource: ResourceRef,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionPermission>,
    #[serde(default)]
    pub field_rules: FieldRules,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureUser {
    /// Handle used on the command line.
    pub name: String,
    #[serde(default)]
    pub id: Option<UserId>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    /// Role names; unknown names become dangling assignments.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// A fixture loaded into a store.
#[derive(Debug)]
pub struct LoadedPolicy {
    pub tenant_id: TenantId,
    pub users: HashMap<String, Principal>,
}

impl LoadedPolicy {
    pub fn context_for(&self, user: &str) -> Result<RequestContext> {
        let principal = self
            .users
            .get(user)
            .cloned()
            .ok_or_else(|| anyhow!("unknown user '{user}' in fixture"))?;
        Ok(RequestContext::new(self.tenant_id, principal))
    }
}

impl PolicyFixture {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read policy fixture: {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("parse policy fixture: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let fixture: Self = serde_json::from_str(contents)?;
        fixture.validate()?;
        Ok(fixture)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashMap::new();
        for user in &self.users {
            if seen.insert(user.name.as_str(), ()).is_some() {
                bail!("duplicate user '{}'", user.name);
            }
        }
        Ok(())
    }

    /// Seed `store` with the fixture's roles, grants and role assignments.
    pub async fn seed(self, store: &Arc<InMemoryPermissionStore>) -> Result<LoadedPolicy> {
        let tenant_id = self.tenant_id.unwrap_or_default();
        let admin = RoleAdmin::new(store.clone());
        let operator = RequestContext::new(tenant_id, Principal::new(UserId::new()));

        let mut role_ids: HashMap<String, RoleId> = HashMap::new();
        for spec in self.roles {
            let mut role = Role::new(tenant_id, spec.name.clone());
            role.description = spec.description;
            role.is_system = spec.is_system;
            role.permissions = spec.permissions;
            role.field_permissions = spec.field_permissions;
            let role = admin
                .import_role(&operator, role)
                .await
                .with_context(|| format!("import role '{}'", spec.name))?;
            role_ids.insert(role.name.clone(), role.id);
        }

        for grant in self.permissions {
            let role_id = *role_ids
                .get(&grant.role)
                .ok_or_else(|| anyhow!("permission references unknown role '{}'", grant.role))?;
            admin
                .assign_permission(&operator, role_id, grant.resource, grant.actions, grant.field_rules)
                .await
                .with_context(|| format!("assign permission to role '{}'", grant.role))?;
        }

        let mut users = HashMap::new();
        for user in self.users {
            let mut principal = Principal::new(user.id.unwrap_or_default()).with_groups(user.groups);
            if let Some(email) = user.email {
                principal = principal.with_email(email);
            }
            if let Some(org_id) = user.org_id {
                principal = principal.with_org(org_id);
            }

            let assigned: Vec<RoleId> = user
                .roles
                .iter()
                .map(|name| {
                    role_ids.get(name).copied().unwrap_or_else(|| {
                        tracing::warn!(user = %user.name, role = %name, "fixture assigns an unknown role");
                        RoleId::new()
                    })
                })
                .collect();
            store.assign_roles(tenant_id, principal.user_id, assigned)?;
            users.insert(user.name, principal);
        }

        tracing::info!(%tenant_id, roles = role_ids.len(), users = users.len(), "policy fixture loaded");
        Ok(LoadedPolicy { tenant_id, users })
    }
}

#[cfg(test)]
mod tests {
    use nexcrm_auth::{AccessControlService, Predicate};

    use super::*;

    const FIXTURE: &str = r#"{
        "roles": [
            { "name": "admin", "is_system": true },
            { "name": "sales",
              "permissions": { "crm.leads": { "read": {
                  "allowed": true,
                  "conditions": { "operator": "and", "rules": [
                      { "field": "owner", "operator": "eq", "value": "$user.id" } ] } } } },
              "field_permissions": { "crm.leads": { "salary": "none" } } }
        ],
        "permissions": [
            { "role": "sales", "resource": { "type": "module", "id": "crm.deals" },
              "actions": { "read": { "allowed": true } } }
        ],
        "users": [
            { "name": "root", "roles": ["admin"] },
            { "name": "alice", "groups": ["east"], "roles": ["sales", "ghost"] }
        ]
    }"#;

    #[test]
    fn parses_fixture() {
        let fixture = PolicyFixture::parse(FIXTURE).unwrap();
        assert_eq!(fixture.roles.len(), 2);
        assert!(fixture.roles[0].is_system);
        assert_eq!(fixture.users[1].roles, vec!["sales", "ghost"]);
    }

    #[test]
    fn rejects_unknown_keys_and_duplicate_users() {
        assert!(PolicyFixture::parse(r#"{"rolez": []}"#).is_err());
        assert!(
            PolicyFixture::parse(r#"{"users": [{"name": "a"}, {"name": "a"}]}"#)
                .unwrap_err()
                .to_string()
                .contains("duplicate user")
        );
    }

    #[tokio::test]
    async fn seeded_fixture_answers_questions() {
        let store = Arc::new(InMemoryPermissionStore::new());
        let loaded = PolicyFixture::parse(FIXTURE).unwrap().seed(&store).await.unwrap();
        let service = AccessControlService::new(store.clone(), store);

        let alice = loaded.context_for("alice").unwrap();
        assert!(service.check_permission(&alice, "crm.deals", "read").await.unwrap());
        assert_eq!(
            service.get_access_filter(&alice, "crm.leads", "read").await.unwrap(),
            Predicate::eq("data.owner", alice.user_id().to_string())
        );
        assert!(service.get_field_permissions(&alice, "crm.leads").await.unwrap().is_some());

        let root = loaded.context_for("root").unwrap();
        assert!(service.check_permission(&root, "crm.leads", "delete").await.unwrap());

        assert!(loaded.context_for("mallory").is_err());
    }

    #[tokio::test]
    async fn grant_for_unknown_role_fails() {
        let store = Arc::new(InMemoryPermissionStore::new());
        let fixture = PolicyFixture::parse(
            r#"{"permissions": [{"role": "nobody", "resource": {"type": "*", "id": "*"}}]}"#,
        )
        .unwrap();
        let err = fixture.seed(&store).await.unwrap_err();
        assert!(err.to_string().contains("nobody"));
    }
}
