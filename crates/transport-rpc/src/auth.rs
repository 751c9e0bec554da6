//! Per-call authn/session/tenant/epoch/rate-limit admission, mirroring the
//! REST middleware chain. Tonic interceptors are synchronous and these
//! checks need the database and the JWKS cache, so instead of a layer
//! stack each RPC handler calls `admit` first, in the same order the REST
//! stack enforces it.

use tonic::metadata::MetadataMap;
use tonic::Status;
use uuid::Uuid;

use sync_authn::AuthnService;
use sync_epoch::check_epoch;
use sync_ratelimit::{EndpointGroup, RateLimiter};
use sync_session::SessionStore;
use sync_storage::User;

use crate::RpcState;

fn meta_str<'m>(metadata: &'m MetadataMap, key: &str) -> Option<&'m str> {
    metadata.get(key).and_then(|v| v.to_str().ok())
}

fn bearer_token(metadata: &MetadataMap) -> Option<&str> {
    meta_str(metadata, "authorization").and_then(|v| v.strip_prefix("Bearer "))
}

/// Full chain for data-plane calls (push/pull): authn, session, tenant,
/// epoch, rate-limit. Returns the authenticated user on success.
pub async fn admit(state: &RpcState, metadata: &MetadataMap, group: EndpointGroup) -> Result<User, Status> {
    let user = authenticate(&state.authn, metadata).await?;
    require_session(&state.sessions, metadata, &user)?;
    require_tenant(state, metadata, &user).await?;
    require_epoch(metadata, &user)?;
    state.rate_limiter.check(user.id, group)?;
    Ok(user)
}

/// Authn-only chain for the bootstrap calls (server-info needs nothing;
/// begin-session/resolve-tenant need an identity but no session yet).
pub async fn authenticate(authn: &AuthnService, metadata: &MetadataMap) -> Result<User, Status> {
    let token = bearer_token(metadata);
    let dev_subject = meta_str(metadata, "x-dev-subject");
    authn.authenticate(token, dev_subject).await.map_err(Into::into)
}

fn require_session(sessions: &SessionStore, metadata: &MetadataMap, user: &User) -> Result<(), Status> {
    let session_id = meta_str(metadata, "x-sync-session")
        .and_then(|s| s.parse::<Uuid>().ok())
        .ok_or(Status::failed_precondition("a sync session is required"))?;
    match sessions.get(session_id) {
        Some(session) if session.user_id == user.id => Ok(()),
        _ => Err(Status::failed_precondition("session is unknown, expired, or belongs to another user")),
    }
}

async fn require_tenant(state: &RpcState, metadata: &MetadataMap, user: &User) -> Result<(), Status> {
    let tenant_id = meta_str(metadata, "x-tenant-id").ok_or(Status::invalid_argument("missing x-tenant-id metadata"))?;
    state.tenant.authorize(&user.subject, tenant_id).await.map_err(Into::into)
}

fn require_epoch(metadata: &MetadataMap, user: &User) -> Result<(), Status> {
    let declared: i64 = meta_str(metadata, "x-sync-epoch")
        .and_then(|s| s.parse().ok())
        .ok_or(Status::invalid_argument("missing x-sync-epoch metadata"))?;
    check_epoch(declared, user.epoch).map_err(Into::into)
}
