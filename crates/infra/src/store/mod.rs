//! Storage adapters for the permission engine's collaborator contracts.
//!
//! Every adapter is tenant-scoped: keys or `WHERE` clauses always include the
//! tenant id, so a lookup can never return another tenant's rows.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod timeout;

pub use in_memory::InMemoryPermissionStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresPermissionStore;
pub use timeout::TimeoutStore;
