//! Infrastructure layer: store adapters, configuration and service wiring.

pub mod config;
pub mod store;


use std::sync::Arc;

use nexcrm_auth::{AccessControlService, PermissionStore, PrincipalDirectory};

use crate::config::EngineConfig;
use crate::store::TimeoutStore;

/// Access control service over type-erased collaborators.
pub type DynAccessControlService =
    AccessControlService<Arc<dyn PermissionStore>, Arc<dyn PrincipalDirectory>>;

/// Build an access control service over `store`, applying `config`.
///
/// With a configured store timeout every store call is bounded by it.
pub fn build_service<S>(store: Arc<S>, config: &EngineConfig) -> DynAccessControlService
where
    S: PermissionStore + PrincipalDirectory + 'static,
{
    let (permissions, directory): (Arc<dyn PermissionStore>, Arc<dyn PrincipalDirectory>) =
        match config.store_timeout {
            Some(limit) => {
                let bounded = Arc::new(TimeoutStore::new(store, limit));
                (
                    bounded.clone() as Arc<dyn PermissionStore>,
                    bounded as Arc<dyn PrincipalDirectory>,
                )
            }
            None => (
                store.clone() as Arc<dyn PermissionStore>,
                store as Arc<dyn PrincipalDirectory>,
            ),
        };
    AccessControlService::new(permissions, directory).with_policy(config.policy.clone())
}
