use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use nexcrm_core::{Entity, PermissionId, RoleId, TenantId, TenantOwned};

use crate::condition::ConditionGroup;

/// Resource id that matches every resource of every type.
pub const WILDCARD_RESOURCE: &str = "*";

/// Field-level access, totally ordered: `ReadWrite > ReadOnly > NoAccess`.
///
/// Merging across roles keeps the maximum (`Ord::max`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum FieldAccessLevel {
    #[default]
    #[serde(rename = "none")]
    NoAccess,
    #[serde(rename = "read_only")]
    ReadOnly,
    #[serde(rename = "read_write")]
    ReadWrite,
}

impl FieldAccessLevel {
    pub fn is_visible(self) -> bool {
        self != FieldAccessLevel::NoAccess
    }

    pub fn is_writable(self) -> bool {
        self == FieldAccessLevel::ReadWrite
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldAccessLevel::NoAccess => "none",
            FieldAccessLevel::ReadOnly => "read_only",
            FieldAccessLevel::ReadWrite => "read_write",
        }
    }
}

impl core::fmt::Display for FieldAccessLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-field access levels, keyed by logical field name.
pub type FieldRules = BTreeMap<String, FieldAccessLevel>;

/// UI hints attached to an action grant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiOptions {
    /// Filters the UI may expose for this action, in display order.
    #[serde(default)]
    pub filters: Vec<String>,
}

/// Grant for a single action on a resource.
///
/// `allowed == false` always denies; conditions are then irrelevant.
/// `conditions == None` means the grant is unconditional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPermission {
    pub allowed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<ConditionGroup>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiOptions>,
}

impl ActionPermission {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            conditions: None,
            ui: None,
        }
    }

    pub fn deny() -> Self {
        Self::default()
    }

    pub fn allow_when(conditions: ConditionGroup) -> Self {
        Self {
            allowed: true,
            conditions: Some(conditions),
            ui: None,
        }
    }

    pub fn with_ui_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ui = Some(UiOptions {
            filters: filters.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// `allowed` with no conditions: nothing can narrow it further.
    pub fn is_unconditional_allow(&self) -> bool {
        self.allowed && self.conditions.is_none()
    }

    pub fn is_conditional_allow(&self) -> bool {
        self.allowed && self.conditions.is_some()
    }
}

/// Addressable permission target: a typed resource id, or the wildcard `"*"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// A dynamic CRM module (e.g. `crm.leads`).
    pub fn module(name: impl Into<String>) -> Self {
        Self::new("module", name)
    }

    pub fn wildcard() -> Self {
        Self::new(WILDCARD_RESOURCE, WILDCARD_RESOURCE)
    }

    pub fn is_wildcard(&self) -> bool {
        self.id == WILDCARD_RESOURCE
    }

    /// Whether a grant on this resource applies to `resource_id`.
    pub fn covers(&self, resource_id: &str) -> bool {
        self.is_wildcard() || self.id == resource_id
    }
}

impl core::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// First-class resource grant held by a role.
///
/// There is at most one `Permission` per `(role_id, resource)`; stores upsert
/// on that pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub tenant_id: TenantId,
    pub role_id: RoleId,
    pub resource: ResourceRef,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionPermission>,
    #[serde(default)]
    pub field_rules: FieldRules,
}

impl Permission {
    pub fn new(tenant_id: TenantId, role_id: RoleId, resource: ResourceRef) -> Self {
        Self {
            id: PermissionId::new(),
            tenant_id,
            role_id,
            resource,
            actions: BTreeMap::new(),
            field_rules: FieldRules::new(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>, grant: ActionPermission) -> Self {
        self.actions.insert(action.into(), grant);
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, level: FieldAccessLevel) -> Self {
        self.field_rules.insert(field.into(), level);
        self
    }

    pub fn action(&self, action: &str) -> Option<&ActionPermission> {
        self.actions.get(action)
    }

    /// Coarse check: `actions[action].allowed`, conditions ignored.
    pub fn allows(&self, action: &str) -> bool {
        self.action(action).is_some_and(|a| a.allowed)
    }
}

impl Entity for Permission {
    type Id = PermissionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantOwned for Permission {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_levels_are_totally_ordered() {
        assert!(FieldAccessLevel::ReadWrite > FieldAccessLevel::ReadOnly);
        assert!(FieldAccessLevel::ReadOnly > FieldAccessLevel::NoAccess);
        assert_eq!(
            FieldAccessLevel::ReadOnly.max(FieldAccessLevel::NoAccess),
            FieldAccessLevel::ReadOnly
        );
    }

    #[test]
    fn field_levels_use_wire_names() {
        let json = serde_json::to_string(&FieldAccessLevel::NoAccess).unwrap();
        assert_eq!(json, "\"none\"");
        let level: FieldAccessLevel = serde_json::from_str("\"read_write\"").unwrap();
        assert_eq!(level, FieldAccessLevel::ReadWrite);
    }

    #[test]
    fn wildcard_resource_covers_everything() {
        assert!(ResourceRef::wildcard().covers("crm.leads"));
        assert!(ResourceRef::module("crm.leads").covers("crm.leads"));
        assert!(!ResourceRef::module("crm.leads").covers("crm.deals"));
    }

    #[test]
    fn null_conditions_deserialize_as_unconditional() {
        let grant: ActionPermission =
            serde_json::from_str(r#"{"allowed": true, "conditions": null}"#).unwrap();
        assert!(grant.is_unconditional_allow());

        let grant: ActionPermission = serde_json::from_str(
            r#"{"allowed": true, "ui": {"filters": ["status", "owner"]}}"#,
        )
        .unwrap();
        assert_eq!(grant, ActionPermission::allow().with_ui_filters(["status", "owner"]));
        assert_eq!(grant.ui.unwrap().filters, vec!["status", "owner"]);
    }

    #[test]
    fn denied_grant_never_allows() {
        let perm = Permission::new(TenantId::new(), RoleId::new(), ResourceRef::module("crm.leads"))
            .with_action("read", ActionPermission::deny());
        assert!(!perm.allows("read"));
        assert!(!perm.allows("update"));
    }
}
