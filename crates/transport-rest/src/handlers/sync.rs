use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;

use sync_domain::envelope::{PullQuery, PushBatchRequest};
use sync_domain::{EntityKind, Error};
use sync_storage::User;

use crate::state::AppState;
use crate::TenantId;

fn parse_kind(kind: &str) -> Result<EntityKind, Error> {
    EntityKind::parse(kind).ok_or_else(|| Error::validation(format!("unknown entity kind {kind}")))
}

pub async fn push(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    axum::Extension(user): axum::Extension<User>,
    axum::Extension(_tenant): axum::Extension<TenantId>,
    Json(batch): Json<PushBatchRequest>,
) -> Result<impl IntoResponse, Error> {
    let kind = parse_kind(&kind)?;
    let acks = state.sync.push_batch(kind, user.id, batch.items).await?;
    Ok(Json(acks))
}

pub async fn pull(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<PullQuery>,
    axum::Extension(user): axum::Extension<User>,
    axum::Extension(_tenant): axum::Extension<TenantId>,
) -> Result<impl IntoResponse, Error> {
    let kind = parse_kind(&kind)?;
    let page = state
        .sync
        .pull(kind, user.id, query.cursor.as_deref(), query.limit)
        .await?;
    Ok(Json(page))
}
