//! The binary RPC surface. Same business logic as the REST transport —
//! every handler calls straight into `sync-core`/`sync-storage` — so the
//! two transports can never drift on what a push or a pull means.

mod auth;

pub mod proto {
    tonic::include_proto!("sync.v1");
}

use std::sync::Arc;

use tonic::{Request, Response, Status};
use uuid::Uuid;

use sync_authn::{AuthnService, TenantResolver};
use sync_core::SyncService;
use sync_domain::envelope::{PushItemRequest, SyncMeta};
use sync_domain::{rfc3339_millis, EntityKind};
use sync_ratelimit::{EndpointGroup, RateLimiter};
use sync_session::SessionStore;
use sync_storage::Storage;

use proto::sync_control_server::SyncControl;
use proto::sync_data_server::SyncData;
use proto::*;

#[derive(Clone)]
pub struct RpcState {
    pub storage: Storage,
    pub sync: SyncService,
    pub sessions: SessionStore,
    pub authn: Arc<AuthnService>,
    pub tenant: Arc<TenantResolver>,
    pub rate_limiter: Arc<RateLimiter>,
}

pub struct SyncControlService {
    state: RpcState,
}

impl SyncControlService {
    pub fn new(state: RpcState) -> Self {
        SyncControlService { state }
    }
}

#[tonic::async_trait]
impl SyncControl for SyncControlService {
    async fn server_info(&self, _req: Request<ServerInfoRequest>) -> Result<Response<ServerInfoResponse>, Status> {
        let defaults = self.state.rate_limiter.defaults();
        Ok(Response::new(ServerInfoResponse {
            rate_limits: Some(RateLimitInfo {
                push_rpm: defaults.push_rpm,
                pull_rpm: defaults.pull_rpm,
                control_rpm: defaults.control_rpm,
                wipe_per_hour: defaults.wipe_per_hour,
            }),
            entity_kinds: EntityKind::ALL.iter().map(|k| k.as_str().to_string()).collect(),
            cursor_flavor: "opaque-base64-ms-uid".to_string(),
            epoch_required: true,
        }))
    }

    async fn begin_session(&self, req: Request<BeginSessionRequest>) -> Result<Response<SessionView>, Status> {
        let user = auth::authenticate(&self.state.authn, req.metadata()).await?;
        let session = self.state.sessions.create(user.id, user.epoch);
        Ok(Response::new(SessionView {
            id: session.id.to_string(),
            user_id: session.user_id.to_string(),
            epoch: session.epoch_at_creation,
            expires_at: rfc3339_millis(session.expires_at_ms),
        }))
    }

    async fn end_session(&self, req: Request<EndSessionRequest>) -> Result<Response<EndSessionResponse>, Status> {
        auth::authenticate(&self.state.authn, req.metadata()).await?;
        let session_id = req
            .get_ref()
            .session_id
            .parse::<Uuid>()
            .map_err(|_| Status::invalid_argument("session_id is not a uuid"))?;
        self.state.sessions.delete(session_id);
        Ok(Response::new(EndSessionResponse {}))
    }

    async fn resolve_tenant(&self, req: Request<ResolveTenantRequest>) -> Result<Response<TenantResolution>, Status> {
        let user = auth::authenticate(&self.state.authn, req.metadata()).await?;
        let resolution = self.state.tenant.resolve(&user.subject).await?;
        Ok(Response::new(TenantResolution {
            tenants: resolution
                .tenants
                .into_iter()
                .map(|t| TenantOption { tenant_id: t.tenant_id, display_name: t.display_name })
                .collect(),
            requires_selection: resolution.requires_selection,
        }))
    }

    async fn wipe(&self, req: Request<WipeRequest>) -> Result<Response<WipeResponse>, Status> {
        let user = auth::authenticate(&self.state.authn, req.metadata()).await?;
        if req.get_ref().confirm != "WIPE" {
            return Err(Status::invalid_argument("confirm must equal \"WIPE\""));
        }
        let epoch = sync_epoch_wipe(&self.state, user.id).await?;
        Ok(Response::new(WipeResponse { epoch }))
    }
}

/// Thin wrapper so `SyncControlService` doesn't need its own
/// `EpochCoordinator` instance; wipe is rare enough that going through
/// storage and the session store directly (the same two calls the
/// coordinator makes) is clearer than threading a fourth shared service in.
async fn sync_epoch_wipe(state: &RpcState, user_id: Uuid) -> Result<i64, Status> {
    let new_epoch = sync_storage::wipe_user(state.storage.pool(), user_id).await?;
    state.sessions.delete_for_user(user_id);
    Ok(new_epoch)
}

pub struct SyncDataService {
    state: RpcState,
}

impl SyncDataService {
    pub fn new(state: RpcState) -> Self {
        SyncDataService { state }
    }
}

#[tonic::async_trait]
impl SyncData for SyncDataService {
    async fn push(&self, req: Request<PushBatchRequest>) -> Result<Response<PushBatchResponse>, Status> {
        let user = auth::admit(&self.state, req.metadata(), EndpointGroup::Push).await?;
        let body = req.into_inner();
        let kind = EntityKind::parse(&body.kind).ok_or_else(|| Status::invalid_argument("unknown entity kind"))?;

        let items = body
            .items
            .into_iter()
            .map(|item| {
                let payload = serde_json::from_str(&item.payload_json).unwrap_or(serde_json::Value::Null);
                Ok(PushItemRequest {
                    uid: item.uid.parse().map_err(|_| Status::invalid_argument("item.uid is not a uuid"))?,
                    updated_ts: item.updated_ts,
                    sync: SyncMeta { version: item.sync_version, is_deleted: item.is_deleted },
                    parent_kind: item.parent_kind,
                    parent_uid: item
                        .parent_uid
                        .map(|s| s.parse())
                        .transpose()
                        .map_err(|_| Status::invalid_argument("item.parent_uid is not a uuid"))?,
                    chat_uid: item
                        .chat_uid
                        .map(|s| s.parse())
                        .transpose()
                        .map_err(|_| Status::invalid_argument("item.chat_uid is not a uuid"))?,
                    payload,
                })
            })
            .collect::<Result<Vec<_>, Status>>()?;

        let acks = self.state.sync.push_batch(kind, user.id, items).await?;
        Ok(Response::new(PushBatchResponse {
            acks: acks
                .into_iter()
                .map(|ack| PushItemAck {
                    uid: ack.uid.to_string(),
                    version: ack.version,
                    updated_at: ack.updated_at,
                    error: ack.error.as_ref().map(|e| e.error.clone()),
                    error_code: ack.error.as_ref().map(|e| e.code.to_string()),
                })
                .collect(),
        }))
    }

    async fn pull(&self, req: Request<PullRequest>) -> Result<Response<PullResponse>, Status> {
        let user = auth::admit(&self.state, req.metadata(), EndpointGroup::Pull).await?;
        let body = req.into_inner();
        let kind = EntityKind::parse(&body.kind).ok_or_else(|| Status::invalid_argument("unknown entity kind"))?;

        let page = self.state.sync.pull(kind, user.id, body.cursor.as_deref(), body.limit).await?;
        Ok(Response::new(PullResponse {
            upserts_json: page
                .upserts
                .into_iter()
                .map(|v| serde_json::to_string(&v).unwrap_or_default())
                .collect(),
            deletes: page
                .deletes
                .into_iter()
                .map(|d| DeleteMarker { uid: d.uid.to_string(), deleted_at: d.deleted_at })
                .collect(),
            next_cursor: page.next_cursor,
        }))
    }
}
