//! The REST surface: a thin axum `Router` over `sync-core` and the
//! supporting services, with the normative middleware chain from
//! `middleware.rs` wired in outermost-to-innermost order.

mod handlers;
mod middleware;
pub mod state;

pub use middleware::TenantId;
pub use state::AppState;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

const MAX_JSON_BODY_BYTES: usize = 1024 * 1024;
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Builds the full router. `lib.rs` owns layer order; `middleware.rs` owns
/// what each layer does. Outermost first: request-ID, panic recovery,
/// tracing, CORS, content-type checks, body-size limit, then the
/// request-scoped chain (authn, session, tenant, epoch, rate-limit).
pub fn router(state: AppState) -> Router {
    let request_scoped = ServiceBuilder::new()
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::authn_mw))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::session_mw))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::tenant_mw))
        .layer(axum::middleware::from_fn(middleware::epoch_mw))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::rate_limit_mw));

    let kind_routes = Router::new()
        .route("/v1/sync/:kind/push", post(handlers::sync::push))
        .route("/v1/sync/:kind/pull", get(handlers::sync::pull))
        .route("/v1/:kind", get(handlers::crud::list).post(handlers::crud::create))
        .route(
            "/v1/:kind/:uid",
            get(handlers::crud::get_one)
                .put(handlers::crud::replace)
                .patch(handlers::crud::patch)
                .delete(handlers::crud::delete),
        )
        .route("/v1/:kind/:uid/archive", post(handlers::crud::archive))
        .route("/v1/:kind/:uid/process", post(handlers::crud::process))
        .route("/v1/wipe", post(handlers::wipe::wipe));

    let bootstrap_routes = Router::new()
        .route("/v1/server-info", get(handlers::bootstrap::server_info))
        .route("/v1/sync/sessions", post(handlers::bootstrap::begin_session))
        .route("/v1/sync/sessions/:id", delete(handlers::bootstrap::end_session))
        .route("/v1/auth/tenant", get(handlers::bootstrap::resolve_tenant));

    let app = Router::new()
        .route("/healthz", get(handlers::bootstrap::health))
        .merge(bootstrap_routes)
        .merge(kind_routes)
        .layer(request_scoped)
        .layer(DefaultBodyLimit::max(MAX_JSON_BODY_BYTES))
        .layer(axum::middleware::from_fn(middleware::content_type_mw))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static(REQUEST_ID_HEADER),
            MakeRequestUuid,
        ))
        .fallback(middleware::not_found)
        .with_state(state);

    app
}
