//! The wire shapes shared by both transports. The server never binds the
//! domain-specific fields of a payload into a typed schema: `payload_json`
//! stays opaque end to end, matching the "clients own the schema" note.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::EntityKind;

/// The `sync` sub-object every client payload carries.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncMeta {
    pub version: i64,
    #[serde(rename = "isDeleted")]
    pub is_deleted: bool,
}

/// One item in a push batch, as received over the wire. `payload_json` is
/// the full object verbatim, including the `sync` envelope and `uid`.
#[derive(Debug, Clone, Deserialize)]
pub struct PushItemRequest {
    pub uid: Uuid,
    #[serde(rename = "updatedTs")]
    pub updated_ts: String,
    pub sync: SyncMeta,
    #[serde(rename = "parentKind", default, skip_serializing_if = "Option::is_none")]
    pub parent_kind: Option<String>,
    #[serde(rename = "parentUid", default, skip_serializing_if = "Option::is_none")]
    pub parent_uid: Option<Uuid>,
    #[serde(rename = "chatUid", default, skip_serializing_if = "Option::is_none")]
    pub chat_uid: Option<Uuid>,
    #[serde(flatten)]
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushBatchRequest {
    pub items: Vec<PushItemRequest>,
}

/// Per-item acknowledgement. `error` is populated instead of failing the
/// whole batch — see the per-item vs top-level error split.
#[derive(Debug, Clone, Serialize)]
pub struct PushItemAck {
    pub uid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::ErrorBody>,
}

impl PushItemAck {
    pub fn ok(uid: Uuid, version: i64, updated_at_ms: i64) -> Self {
        PushItemAck {
            uid,
            version: Some(version),
            updated_at: Some(crate::rfc3339_millis(updated_at_ms)),
            error: None,
        }
    }

    pub fn err(uid: Uuid, error: &crate::Error) -> Self {
        PushItemAck {
            uid,
            version: None,
            updated_at: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteMarker {
    pub uid: Uuid,
    #[serde(rename = "deletedAt")]
    pub deleted_at: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PullResponse {
    pub upserts: Vec<Value>,
    pub deletes: Vec<DeleteMarker>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    #[serde(rename = "user_id")]
    pub user_id: Uuid,
    pub epoch: i64,
    #[serde(rename = "expires_at")]
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub rate_limits: RateLimitInfo,
    pub entity_kinds: Vec<&'static str>,
    pub cursor_flavor: &'static str,
    pub epoch_required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitInfo {
    pub push_rpm: u32,
    pub pull_rpm: u32,
    pub control_rpm: u32,
    pub wipe_per_hour: u32,
}

impl ServerInfo {
    pub fn default_for(limits: RateLimitInfo) -> Self {
        ServerInfo {
            rate_limits: limits,
            entity_kinds: EntityKind::ALL.iter().map(|k| k.as_str()).collect(),
            cursor_flavor: "opaque-base64-ms-uid",
            epoch_required: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WipeRequest {
    pub confirm: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WipeResponse {
    pub epoch: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantBinding {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantResolution {
    pub tenants: Vec<TenantOption>,
    #[serde(rename = "requiresSelection")]
    pub requires_selection: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantOption {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}
