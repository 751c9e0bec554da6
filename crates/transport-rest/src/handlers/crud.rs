use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use sync_domain::envelope::{PushItemRequest, SyncMeta};
use sync_domain::{now_ms, rfc3339_millis, EntityKind, Error};
use sync_storage::{EntityRow, User};

use crate::state::AppState;
use crate::TenantId;

fn parse_kind(kind: &str) -> Result<EntityKind, Error> {
    EntityKind::parse(kind).ok_or_else(|| Error::validation(format!("unknown entity kind {kind}")))
}

/// Merges the storage-layer fields that every CRUD response carries
/// alongside the client's own payload shape.
fn entity_to_json(row: &EntityRow) -> Value {
    let mut value: Value = serde_json::from_str(&row.payload_json).unwrap_or(Value::Null);
    if let Value::Object(ref mut map) = value {
        map.insert("uid".into(), Value::String(row.uid.to_string()));
        map.insert("version".into(), Value::from(row.version));
        map.insert("updatedAt".into(), Value::String(rfc3339_millis(row.updated_at_ms)));
        if let Some(deleted_at_ms) = row.deleted_at_ms {
            map.insert("deletedAt".into(), Value::String(rfc3339_millis(deleted_at_ms)));
        }
    }
    value
}

fn if_match_version(headers: &HeaderMap) -> Result<i64, Error> {
    let raw = headers
        .get(axum::http::header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::validation("missing If-Match header"))?;
    raw.trim_matches('"')
        .parse::<i64>()
        .map_err(|_| Error::validation("If-Match must quote an integer version"))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default, rename = "includeDeleted")]
    pub include_deleted: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<ListQuery>,
    axum::Extension(user): axum::Extension<User>,
    axum::Extension(_tenant): axum::Extension<TenantId>,
) -> Result<impl IntoResponse, Error> {
    let kind = parse_kind(&kind)?;
    let cursor = sync_cursor::decode_optional(&sync_cursor::Base64Codec, query.cursor.as_deref())?;
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    let rows = sync_storage::pull(state.storage.pool(), kind, user.id, cursor, limit).await?;
    let items: Vec<Value> = rows
        .iter()
        .filter(|row| query.include_deleted || !row.is_tombstone())
        .map(entity_to_json)
        .collect();
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
pub struct CrudRequest {
    #[serde(default)]
    pub uid: Option<Uuid>,
    #[serde(rename = "parentKind", default)]
    pub parent_kind: Option<String>,
    #[serde(rename = "parentUid", default)]
    pub parent_uid: Option<Uuid>,
    #[serde(rename = "chatUid", default)]
    pub chat_uid: Option<Uuid>,
    #[serde(flatten)]
    pub payload: Value,
}

/// Creation and full replace both funnel through the sync engine's push
/// path with a server-assigned timestamp, so referential-integrity checks
/// and LWW bookkeeping never diverge between the two surfaces.
pub async fn create(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    axum::Extension(user): axum::Extension<User>,
    axum::Extension(_tenant): axum::Extension<TenantId>,
    Json(body): Json<CrudRequest>,
) -> Result<impl IntoResponse, Error> {
    let kind = parse_kind(&kind)?;
    let uid = body.uid.unwrap_or_else(Uuid::new_v4);

    let item = PushItemRequest {
        uid,
        updated_ts: rfc3339_millis(now_ms()),
        sync: SyncMeta { version: 1, is_deleted: false },
        parent_kind: body.parent_kind,
        parent_uid: body.parent_uid,
        chat_uid: body.chat_uid,
        payload: body.payload,
    };

    let mut acks = state.sync.push_batch(kind, user.id, vec![item]).await?;
    let ack = acks.remove(0);
    if let Some(error) = ack.error {
        return Err(Error::validation(error.error));
    }

    let row = sync_storage::get(state.storage.pool(), kind, user.id, uid)
        .await?
        .ok_or_else(|| Error::internal("row vanished immediately after creation"))?;
    Ok((axum::http::StatusCode::CREATED, Json(entity_to_json(&row))))
}

#[derive(Debug, Deserialize)]
pub struct IncludeDeletedQuery {
    #[serde(default, rename = "includeDeleted")]
    pub include_deleted: bool,
}

pub async fn get_one(
    State(state): State<AppState>,
    Path((kind, uid)): Path<(String, Uuid)>,
    Query(query): Query<IncludeDeletedQuery>,
    axum::Extension(user): axum::Extension<User>,
    axum::Extension(_tenant): axum::Extension<TenantId>,
) -> Result<impl IntoResponse, Error> {
    let kind = parse_kind(&kind)?;
    let row = sync_storage::get(state.storage.pool(), kind, user.id, uid)
        .await?
        .ok_or_else(|| Error::not_found(kind.as_str()))?;

    if row.is_tombstone() && !query.include_deleted {
        return Err(Error::Gone { resource: kind.as_str().to_string() });
    }
    Ok(Json(entity_to_json(&row)))
}

pub async fn replace(
    State(state): State<AppState>,
    Path((kind, uid)): Path<(String, Uuid)>,
    headers: HeaderMap,
    axum::Extension(user): axum::Extension<User>,
    axum::Extension(_tenant): axum::Extension<TenantId>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, Error> {
    let kind = parse_kind(&kind)?;
    let expected_version = if_match_version(&headers)?;
    let payload_json = serde_json::to_string(&body).map_err(|e| Error::internal(e.to_string()))?;

    let outcome = sync_storage::update_if_version(
        state.storage.pool(),
        kind,
        user.id,
        uid,
        expected_version,
        now_ms(),
        &payload_json,
    )
    .await?
    .ok_or_else(|| Error::not_found(kind.as_str()))?;

    let row = sync_storage::get(state.storage.pool(), kind, user.id, uid)
        .await?
        .ok_or_else(|| Error::internal("row vanished after update"))?;
    let _ = outcome;
    Ok(Json(entity_to_json(&row)))
}

pub async fn patch(
    State(state): State<AppState>,
    Path((kind, uid)): Path<(String, Uuid)>,
    headers: HeaderMap,
    axum::Extension(user): axum::Extension<User>,
    axum::Extension(_tenant): axum::Extension<TenantId>,
    Json(partial): Json<Value>,
) -> Result<impl IntoResponse, Error> {
    let kind = parse_kind(&kind)?;
    let expected_version = if_match_version(&headers)?;

    let current = sync_storage::get(state.storage.pool(), kind, user.id, uid)
        .await?
        .ok_or_else(|| Error::not_found(kind.as_str()))?;
    let mut merged: Value = serde_json::from_str(&current.payload_json).unwrap_or(Value::Null);
    merge_json(&mut merged, partial);
    let payload_json = serde_json::to_string(&merged).map_err(|e| Error::internal(e.to_string()))?;

    sync_storage::update_if_version(
        state.storage.pool(),
        kind,
        user.id,
        uid,
        expected_version,
        now_ms(),
        &payload_json,
    )
    .await?
    .ok_or_else(|| Error::not_found(kind.as_str()))?;

    let row = sync_storage::get(state.storage.pool(), kind, user.id, uid)
        .await?
        .ok_or_else(|| Error::internal("row vanished after update"))?;
    Ok(Json(entity_to_json(&row)))
}

fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                merge_json(base_map.entry(k).or_insert(Value::Null), v);
            }
        }
        (base, patch) => *base = patch,
    }
}

pub async fn delete(
    State(state): State<AppState>,
    Path((kind, uid)): Path<(String, Uuid)>,
    axum::Extension(user): axum::Extension<User>,
    axum::Extension(_tenant): axum::Extension<TenantId>,
) -> Result<impl IntoResponse, Error> {
    let kind = parse_kind(&kind)?;
    let current = sync_storage::get(state.storage.pool(), kind, user.id, uid)
        .await?
        .ok_or_else(|| Error::not_found(kind.as_str()))?;

    if current.is_tombstone() {
        return Ok(Json(entity_to_json(&current)));
    }

    sync_storage::soft_delete_if_version(state.storage.pool(), kind, user.id, uid, current.version, now_ms())
        .await?
        .ok_or_else(|| Error::not_found(kind.as_str()))?;

    let row = sync_storage::get(state.storage.pool(), kind, user.id, uid)
        .await?
        .ok_or_else(|| Error::internal("row vanished after delete"))?;
    Ok(Json(entity_to_json(&row)))
}

pub async fn archive(
    State(state): State<AppState>,
    Path((kind, uid)): Path<(String, Uuid)>,
    axum::Extension(user): axum::Extension<User>,
    axum::Extension(tenant): axum::Extension<TenantId>,
) -> Result<impl IntoResponse, Error> {
    let entity_kind = parse_kind(&kind)?;
    if !entity_kind.process_actions().contains(&"archive") {
        return Err(Error::validation(format!("{kind} has no archive transition")));
    }
    apply_action(state, entity_kind, uid, user, tenant, "archive", None).await
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub action: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub async fn process(
    State(state): State<AppState>,
    Path((kind, uid)): Path<(String, Uuid)>,
    axum::Extension(user): axum::Extension<User>,
    axum::Extension(tenant): axum::Extension<TenantId>,
    Json(body): Json<ProcessRequest>,
) -> Result<impl IntoResponse, Error> {
    let entity_kind = parse_kind(&kind)?;
    if !entity_kind.process_actions().contains(&body.action.as_str()) {
        return Err(Error::validation(format!("{kind} does not support action {}", body.action)));
    }
    apply_action(state, entity_kind, uid, user, tenant, &body.action, body.metadata).await
}

/// Shared by `/archive` and `/process`: both are state-machine transitions
/// that land as an ordinary LWW push, so they show up in the sync cursor
/// stream the same way a client-originated push would.
async fn apply_action(
    state: AppState,
    kind: EntityKind,
    uid: Uuid,
    user: User,
    _tenant: TenantId,
    action: &str,
    metadata: Option<Value>,
) -> Result<impl IntoResponse, Error> {
    let current = sync_storage::get(state.storage.pool(), kind, user.id, uid)
        .await?
        .ok_or_else(|| Error::not_found(kind.as_str()))?;
    if current.is_tombstone() {
        return Err(Error::Gone { resource: kind.as_str().to_string() });
    }

    let mut payload: Value = serde_json::from_str(&current.payload_json).unwrap_or(Value::Null);
    if let Value::Object(ref mut map) = payload {
        map.insert("status".into(), Value::String(action.to_string()));
        if let Some(metadata) = metadata {
            map.insert("actionMetadata".into(), metadata);
        }
    }

    let outcome = sync_storage::update_if_version(
        state.storage.pool(),
        kind,
        user.id,
        uid,
        current.version,
        now_ms(),
        &serde_json::to_string(&payload).map_err(|e| Error::internal(e.to_string()))?,
    )
    .await?
    .ok_or_else(|| Error::not_found(kind.as_str()))?;
    let _ = outcome;

    let row = sync_storage::get(state.storage.pool(), kind, user.id, uid)
        .await?
        .ok_or_else(|| Error::internal("row vanished after action"))?;
    Ok(Json(entity_to_json(&row)))
}
