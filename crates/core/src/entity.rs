//! Entity traits: identity + tenant ownership.

use crate::TenantId;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// An entity that lives inside exactly one tenant.
///
/// Stores key these entities by `(tenant_id, id)`; the tenant never changes
/// after creation.
pub trait TenantOwned: Entity {
    fn tenant_id(&self) -> TenantId;
}
