use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use sync_domain::envelope::{RateLimitInfo, ServerInfo, SessionView, TenantOption, TenantResolution};
use sync_domain::{rfc3339_millis, Error};
use sync_storage::User;

use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn server_info(State(state): State<AppState>) -> impl IntoResponse {
    let defaults = state.rate_limiter.defaults();
    Json(ServerInfo::default_for(RateLimitInfo {
        push_rpm: defaults.push_rpm,
        pull_rpm: defaults.pull_rpm,
        control_rpm: defaults.control_rpm,
        wipe_per_hour: defaults.wipe_per_hour,
    }))
}

pub async fn begin_session(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<User>,
) -> impl IntoResponse {
    let session = state.sessions.create(user.id, user.epoch);
    Json(SessionView {
        id: session.id,
        user_id: session.user_id,
        epoch: session.epoch_at_creation,
        expires_at: rfc3339_millis(session.expires_at_ms),
    })
    .into_response()
}

pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    axum::Extension(_user): axum::Extension<User>,
) -> impl IntoResponse {
    state.sessions.delete(id);
    axum::http::StatusCode::OK
}

pub async fn resolve_tenant(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<User>,
) -> Result<impl IntoResponse, Error> {
    let resolution = state.tenant.resolve(&user.subject).await?;
    Ok(Json(TenantResolution {
        tenants: resolution
            .tenants
            .into_iter()
            .map(|t| TenantOption {
                tenant_id: t.tenant_id,
                display_name: t.display_name,
            })
            .collect(),
        requires_selection: resolution.requires_selection,
    }))
}
