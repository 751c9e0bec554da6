use std::sync::Arc;

use sync_authn::{AuthnService, TenantResolver};
use sync_core::SyncService;
use sync_epoch::EpochCoordinator;
use sync_ratelimit::RateLimiter;
use sync_session::SessionStore;
use sync_storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub sync: SyncService,
    pub sessions: SessionStore,
    pub epoch: Arc<EpochCoordinator>,
    pub authn: Arc<AuthnService>,
    pub tenant: Arc<TenantResolver>,
    pub rate_limiter: Arc<RateLimiter>,
    pub default_tenant_id: String,
}
