//! `nexcrm-auth`: permission resolution for the multi-tenant CRM.
//!
//! Roles carry action grants (optionally guarded by ABAC conditions) and
//! field-level rules. This crate compiles conditions into query predicates,
//! merges grants across roles, and answers the three access questions:
//! coarse capability, row filter and field visibility.
//!
//! It is decoupled from HTTP and storage: persistence is reached through
//! the [`store`] traits only.

pub mod admin;
pub mod aggregator;
pub mod authorize;
pub mod condition;
pub mod error;
pub mod fields;
pub mod permissions;
pub mod predicate;
pub mod principal;
pub mod roles;
pub mod row_filter;
pub mod store;

pub use admin::{RoleAdmin, RoleChanges, RoleDraft};
pub use aggregator::{EffectivePermissions, PermissionAggregator, merge_effective_permissions};
pub use authorize::{AccessControlService, AuthorizationExplanation, DenialKind};
pub use condition::{ConditionGroup, ConditionRule, LogicalOperator, RuleOperator, compile};
pub use error::{AuthzError, AuthzResult};
pub use fields::{FieldPermissions, resolve_field_permissions};
pub use permissions::{ActionPermission, FieldAccessLevel, FieldRules, Permission, ResourceRef};
pub use predicate::{CompareOp, Predicate};
pub use principal::{ContextData, Principal, RequestContext};
pub use roles::{AccessPolicy, Role, RoleGrants};
pub use row_filter::derive_row_filter;
pub use store::{PermissionStore, PrincipalDirectory, StoreError};
