//! Error kinds surfaced by the permission engine.

use thiserror::Error;

use nexcrm_core::{DomainError, RoleId, UserId};

use crate::store::StoreError;

/// Permission engine error.
///
/// A returned `Err` is never a permission decision: denials are expressed as
/// `Ok(false)`, an always-false predicate, or a hidden field. The only
/// policy-shaped variants are `Forbidden` and `TenantMismatch`, which come from
/// administrative mutations and tenant boundary checks.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// A condition references a context variable that is absent for this request.
    #[error("unresolved condition variable '{0}'")]
    UnresolvedVariable(String),

    /// Operator and value type do not fit together (e.g. `contains` with a number).
    #[error("invalid value for rule on '{field}' ({operator}): {reason}")]
    InvalidRuleValue {
        field: String,
        operator: String,
        reason: String,
    },

    #[error("unknown condition operator '{0}'")]
    UnknownOperator(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("role not found: {0}")]
    RoleNotFound(RoleId),

    #[error("principal not found: {0}")]
    PrincipalNotFound(UserId),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("tenant mismatch")]
    TenantMismatch,

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl AuthzError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub(crate) fn invalid_value(
        field: &str,
        operator: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidRuleValue {
            field: field.to_string(),
            operator: operator.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a policy outcome rather than a failure to decide.
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::Forbidden(_) | Self::TenantMismatch)
    }

    /// Whether this error originates from the store adapter.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

pub type AuthzResult<T> = Result<T, AuthzError>;
