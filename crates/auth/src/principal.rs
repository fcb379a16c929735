use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use nexcrm_core::{TenantId, TenantOwned, UserId};

use crate::error::AuthzError;

/// An authenticated principal (already verified by the transport layer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// Group memberships, by group id.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Principal {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            email: None,
            org_id: None,
            groups: Vec::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }
}

/// Per-request scope threaded through every engine call.
///
/// Tenant and principal are explicit here; nothing is read from ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    tenant_id: TenantId,
    principal: Principal,
    now: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(tenant_id: TenantId, principal: Principal) -> Self {
        Self::at(tenant_id, principal, Utc::now())
    }

    /// Build a context with a fixed clock (tests, replays).
    pub fn at(tenant_id: TenantId, principal: Principal, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            principal,
            now,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Reject entities owned by another tenant.
    pub fn ensure_tenant<E: TenantOwned>(&self, entity: &E) -> Result<(), AuthzError> {
        if entity.tenant_id() == self.tenant_id {
            Ok(())
        } else {
            Err(AuthzError::TenantMismatch)
        }
    }

    /// Variables available to `$`-references in conditions.
    pub fn context_data(&self) -> ContextData {
        ContextData::from_request(self)
    }
}

/// Flat variable map used to resolve `$name` references in conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextData(BTreeMap<String, Value>);

impl ContextData {
    pub const USER_ID: &'static str = "user.id";
    pub const USER_EMAIL: &'static str = "user.email";
    pub const USER_ORG_ID: &'static str = "user.org_id";
    pub const USER_GROUPS: &'static str = "user.groups";
    pub const TENANT_ID: &'static str = "tenant.id";
    pub const NOW: &'static str = "now";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_request(ctx: &RequestContext) -> Self {
        let principal = ctx.principal();
        let mut data = Self::new()
            .with(Self::USER_ID, principal.user_id.to_string())
            .with(Self::USER_GROUPS, principal.groups.clone())
            .with(Self::TENANT_ID, ctx.tenant_id().to_string())
            .with(
                Self::NOW,
                ctx.now().to_rfc3339_opts(SecondsFormat::Millis, true),
            );
        if let Some(email) = &principal.email {
            data.insert(Self::USER_EMAIL, email.clone());
        }
        if let Some(org_id) = &principal.org_id {
            data.insert(Self::USER_ORG_ID, org_id.clone());
        }
        data
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn request_context_exposes_principal_and_clock() {
        let tenant_id = TenantId::new();
        let user_id = UserId::new();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let ctx = RequestContext::at(
            tenant_id,
            Principal::new(user_id)
                .with_org("org-7")
                .with_groups(["g1", "g2"]),
            now,
        );

        let data = ctx.context_data();
        assert_eq!(data.get("user.id"), Some(&json!(user_id.to_string())));
        assert_eq!(data.get("user.org_id"), Some(&json!("org-7")));
        assert_eq!(data.get("user.groups"), Some(&json!(["g1", "g2"])));
        assert_eq!(data.get("tenant.id"), Some(&json!(tenant_id.to_string())));
        assert_eq!(data.get("now"), Some(&json!("2026-03-01T09:30:00.000Z")));
        assert_eq!(data.get("user.email"), None);
    }
}
