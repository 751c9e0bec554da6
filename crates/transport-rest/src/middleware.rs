//! The middleware chain, outermost first: request-ID, panic recovery,
//! logging, CORS and content-type checks (wired in `lib.rs` via
//! `tower_http` plus `content_type_mw` below), then the request-scoped
//! concerns below: authn, session attachment, tenant authorization,
//! epoch check, rate-limit admission. The order is normative — do not
//! reorder.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use sync_domain::Error;
use sync_ratelimit::EndpointGroup;
use sync_storage::User;

use crate::state::AppState;

/// Bootstrap endpoints: authn still applies (session begin needs an
/// identity), but session/tenant/epoch enforcement does not.
fn is_bootstrap_path(path: &str) -> bool {
    path == "/healthz"
        || path == "/v1/server-info"
        || path == "/v1/sync/sessions"
        || path.starts_with("/v1/sync/sessions/")
        || path == "/v1/auth/tenant"
}

fn is_unauthenticated_path(path: &str) -> bool {
    path == "/healthz"
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub async fn authn_mw(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if is_unauthenticated_path(&path) {
        return next.run(req).await;
    }

    let headers = req.headers();
    let token = bearer_token(headers);
    let dev_subject = header_str(headers, "X-Dev-Subject");

    match state.authn.authenticate(token, dev_subject).await {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

pub async fn session_mw(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if is_bootstrap_path(&path) {
        return next.run(req).await;
    }

    let Some(user) = req.extensions().get::<User>().cloned() else {
        return Error::Unauthenticated.into_response();
    };

    let Some(session_id) = header_str(req.headers(), "X-Sync-Session").and_then(|s| s.parse::<uuid::Uuid>().ok()) else {
        return Error::SessionRequired.into_response();
    };

    match state.sessions.get(session_id) {
        Some(session) if session.user_id == user.id => {
            req.extensions_mut().insert(session);
            next.run(req).await
        }
        _ => Error::SessionInvalid.into_response(),
    }
}

pub async fn tenant_mw(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if is_bootstrap_path(&path) {
        return next.run(req).await;
    }

    let Some(user) = req.extensions().get::<User>().cloned() else {
        return Error::Unauthenticated.into_response();
    };

    let Some(tenant_id) = header_str(req.headers(), "X-Tenant-ID").map(|s| s.to_string()) else {
        return Error::validation("missing X-Tenant-ID header").into_response();
    };

    if let Err(e) = state.tenant.authorize(&user.subject, &tenant_id).await {
        return e.into_response();
    }

    req.extensions_mut().insert(TenantId(tenant_id));
    next.run(req).await
}

#[derive(Clone)]
pub struct TenantId(pub String);

pub async fn epoch_mw(req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if is_bootstrap_path(&path) {
        return next.run(req).await;
    }

    let Some(user) = req.extensions().get::<User>().cloned() else {
        return Error::Unauthenticated.into_response();
    };

    let declared: Option<i64> = header_str(req.headers(), "X-Sync-Epoch").and_then(|s| s.parse().ok());
    let Some(declared) = declared else {
        return Error::validation("missing X-Sync-Epoch header").into_response();
    };

    match sync_epoch::check_epoch(declared, user.epoch) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

/// Rejects requests that carry a body without declaring it as JSON, before
/// any body bytes are read. GET/DELETE and bodyless POSTs (e.g. `archive`)
/// are exempt since there's nothing to mis-type.
pub async fn content_type_mw(req: Request, next: Next) -> Response {
    let has_body = header_str(req.headers(), axum::http::header::CONTENT_LENGTH.as_str())
        .and_then(|v| v.parse::<u64>().ok())
        .is_some_and(|len| len > 0);

    if has_body {
        let content_type = header_str(req.headers(), axum::http::header::CONTENT_TYPE.as_str());
        let is_json = content_type
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim() == "application/json")
            .unwrap_or(false);
        if !is_json {
            return Error::validation("Content-Type must be application/json").into_response();
        }
    }

    next.run(req).await
}

pub async fn rate_limit_mw(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(user) = req.extensions().get::<User>().cloned() else {
        return next.run(req).await; // unauthenticated requests never reach here on data-plane paths
    };

    let group = endpoint_group_for(req.uri().path(), req.method());
    if let Err(e) = state.rate_limiter.check(user.id, group) {
        return e.into_response();
    }
    next.run(req).await
}

fn endpoint_group_for(path: &str, method: &axum::http::Method) -> EndpointGroup {
    if is_bootstrap_path(path) {
        EndpointGroup::Control
    } else if path == "/v1/wipe" {
        EndpointGroup::Wipe
    } else if path.ends_with("/push") {
        EndpointGroup::Push
    } else if path.ends_with("/pull") || (method == axum::http::Method::GET && path.starts_with("/v1/")) {
        EndpointGroup::Pull
    } else {
        EndpointGroup::Push
    }
}

/// Invoked when no registered route matches; kept distinct from the
/// `Internal` fallback so 404s from the router itself still carry the
/// standard error body shape.
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, axum::Json(serde_json::json!({
        "error": "no such route",
        "code": "NOT_FOUND",
    })))
}
