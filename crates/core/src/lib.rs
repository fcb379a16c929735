//! `nexcrm-core`: shared building blocks for the CRM backend.
//!
//! This crate contains identifiers and error primitives only (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::{Entity, TenantOwned};
pub use error::{DomainError, DomainResult};
pub use id::{PermissionId, RoleId, TenantId, UserId};
