//! The sync engine proper: per-kind push (LWW upsert plus parent
//! validation) and pull (cursor-paginated delta read). Both transports
//! call through this crate instead of touching storage directly, so REST
//! and RPC can never drift in semantics.

const DEFAULT_PULL_LIMIT: u32 = 100;
const MAX_PULL_LIMIT: u32 = 1000;
pub const DEFAULT_MAX_PUSH_BATCH: usize = 500;

use serde_json::Value;
use uuid::Uuid;

use sync_cursor::{Base64Codec, Cursor, CursorCodec};
use sync_domain::envelope::{DeleteMarker, PullResponse, PushItemAck, PushItemRequest};
use sync_domain::{try_parse_rfc3339_ms, EntityKind, Error};
use sync_storage::{EntityRow, Storage};

#[derive(Clone)]
pub struct SyncService {
    storage: Storage,
    codec: Base64Codec,
    max_push_batch: usize,
}

impl SyncService {
    pub fn new(storage: Storage) -> Self {
        SyncService {
            storage,
            codec: Base64Codec,
            max_push_batch: DEFAULT_MAX_PUSH_BATCH,
        }
    }

    pub fn with_max_push_batch(mut self, max: usize) -> Self {
        self.max_push_batch = max;
        self
    }

    /// Runs an entire push batch inside one transaction. Per-item failures
    /// (bad timestamp, invalid parent) are reported in that item's ack and
    /// do not affect the others; only whole-request concerns (storage
    /// outage) surface as a top-level error.
    #[tracing::instrument(skip(self, items), fields(kind = %kind, count = items.len()))]
    pub async fn push_batch(
        &self,
        kind: EntityKind,
        owner_id: Uuid,
        items: Vec<PushItemRequest>,
    ) -> Result<Vec<PushItemAck>, Error> {
        if items.len() > self.max_push_batch {
            return Err(Error::validation(format!(
                "batch of {} items exceeds max of {}",
                items.len(),
                self.max_push_batch
            )));
        }

        let mut tx = self.storage.begin().await?;
        let mut acks = Vec::with_capacity(items.len());

        for item in items {
            let uid = item.uid;
            match self.push_one(&mut tx, kind, owner_id, &item).await {
                Ok(outcome) => acks.push(PushItemAck::ok(uid, outcome.version, outcome.updated_at_ms)),
                Err(e) => acks.push(PushItemAck::err(uid, &e)),
            }
        }

        tx.commit().await.map_err(|e| Error::internal(e.to_string()))?;
        Ok(acks)
    }

    async fn push_one(
        &self,
        tx: &mut sync_storage::Tx<'_>,
        kind: EntityKind,
        owner_id: Uuid,
        item: &PushItemRequest,
    ) -> Result<sync_storage::PushOutcome, Error> {
        let updated_at_ms = try_parse_rfc3339_ms(&item.updated_ts)?;
        let deleted_at_ms = item.sync.is_deleted.then_some(updated_at_ms);
        let is_tombstone = deleted_at_ms.is_some();

        let (parent_kind, parent_uid) = match kind {
            EntityKind::Comment => {
                if !is_tombstone {
                    let parent_kind_str = item
                        .parent_kind
                        .as_deref()
                        .ok_or_else(|| Error::validation("comment requires parentKind"))?;
                    let parent_uid = item
                        .parent_uid
                        .ok_or_else(|| Error::validation("comment requires parentUid"))?;
                    let parent_kind = EntityKind::parse(parent_kind_str)
                        .filter(|k| k.is_valid_comment_parent())
                        .ok_or_else(|| Error::validation("invalid parent kind"))?;

                    if !sync_storage::parent_is_live(tx, parent_kind, owner_id, parent_uid).await? {
                        return Err(Error::validation("invalid parent"));
                    }
                    (item.parent_kind.clone(), item.parent_uid)
                } else {
                    (item.parent_kind.clone(), item.parent_uid)
                }
            }
            EntityKind::ChatMessage => {
                if !is_tombstone {
                    let chat_uid = item
                        .chat_uid
                        .ok_or_else(|| Error::validation("chat-message requires chatUid"))?;
                    if !sync_storage::parent_is_live(tx, EntityKind::Chat, owner_id, chat_uid).await? {
                        return Err(Error::validation("invalid parent"));
                    }
                }
                (None, None)
            }
            _ => (None, None),
        };

        let payload_json = serde_json::to_string(&item.payload).map_err(|e| Error::internal(e.to_string()))?;

        sync_storage::push_item(
            tx,
            kind,
            owner_id,
            item.uid,
            updated_at_ms,
            deleted_at_ms,
            &payload_json,
            parent_kind.as_deref(),
            parent_uid,
            item.chat_uid,
        )
        .await
    }

    /// Cursor-paginated delta read. `next_cursor` is present whenever the
    /// page was full, even if that happens to be exactly EOF — callers
    /// must tolerate one empty follow-up pull.
    #[tracing::instrument(skip(self))]
    pub async fn pull(
        &self,
        kind: EntityKind,
        owner_id: Uuid,
        cursor_token: Option<&str>,
        limit: Option<u32>,
    ) -> Result<PullResponse, Error> {
        let cursor = sync_cursor::decode_optional(&self.codec, cursor_token)?;
        let limit = limit.unwrap_or(DEFAULT_PULL_LIMIT).clamp(1, MAX_PULL_LIMIT);

        let rows = sync_storage::pull(self.storage.pool(), kind, owner_id, cursor, limit).await?;
        Ok(self.to_response(rows, limit))
    }

    fn to_response(&self, rows: Vec<EntityRow>, limit: u32) -> PullResponse {
        let full_page = rows.len() as u32 == limit;
        let next_cursor = rows
            .last()
            .filter(|_| full_page)
            .map(|last| self.codec.encode(Cursor::new(last.updated_at_ms, last.uid)));

        let mut upserts = Vec::new();
        let mut deletes = Vec::new();
        for row in rows {
            if let Some(deleted_at_ms) = row.deleted_at_ms {
                deletes.push(DeleteMarker {
                    uid: row.uid,
                    deleted_at: sync_domain::rfc3339_millis(deleted_at_ms),
                });
            } else {
                let value: Value = serde_json::from_str(&row.payload_json).unwrap_or(Value::Null);
                upserts.push(value);
            }
        }

        PullResponse {
            upserts,
            deletes,
            next_cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_domain::envelope::SyncMeta;
    use sync_storage::StorageConfig;

    fn note_item(uid: Uuid, ts: &str) -> PushItemRequest {
        PushItemRequest {
            uid,
            updated_ts: ts.to_string(),
            sync: SyncMeta { version: 1, is_deleted: false },
            parent_kind: None,
            parent_uid: None,
            chat_uid: None,
            payload: json!({ "title": "t" }),
        }
    }

    async fn service() -> SyncService {
        let storage = Storage::connect(&StorageConfig::in_memory()).await.unwrap();
        SyncService::new(storage)
    }

    #[tokio::test]
    async fn push_then_pull_round_trips() {
        let service = service().await;
        let owner = Uuid::new_v4();
        let uid = Uuid::new_v4();

        let acks = service
            .push_batch(EntityKind::Note, owner, vec![note_item(uid, "2025-11-03T10:00:00.000Z")])
            .await
            .unwrap();
        assert_eq!(acks[0].version, Some(1));

        let page = service.pull(EntityKind::Note, owner, None, None).await.unwrap();
        assert_eq!(page.upserts.len(), 1);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn invalid_parent_is_per_item_error_not_batch_failure() {
        let service = service().await;
        let owner = Uuid::new_v4();

        let missing_parent = Uuid::new_v4();
        let comment = PushItemRequest {
            uid: Uuid::new_v4(),
            updated_ts: "2025-11-03T10:00:00.000Z".to_string(),
            sync: SyncMeta { version: 1, is_deleted: false },
            parent_kind: Some("note".into()),
            parent_uid: Some(missing_parent),
            chat_uid: None,
            payload: json!({}),
        };
        let good_note = note_item(Uuid::new_v4(), "2025-11-03T10:00:00.000Z");

        let acks = service
            .push_batch(EntityKind::Comment, owner, vec![comment])
            .await
            .unwrap();
        assert!(acks[0].error.is_some());

        // Pushing an unrelated note in its own batch still succeeds.
        let note_acks = service.push_batch(EntityKind::Note, owner, vec![good_note]).await.unwrap();
        assert!(note_acks[0].error.is_none());
    }

    #[tokio::test]
    async fn tombstone_comment_bypasses_missing_parent_check() {
        let service = service().await;
        let owner = Uuid::new_v4();
        let missing_parent = Uuid::new_v4();

        let tombstone = PushItemRequest {
            uid: Uuid::new_v4(),
            updated_ts: "2025-11-03T10:00:00.000Z".to_string(),
            sync: SyncMeta { version: 1, is_deleted: true },
            parent_kind: Some("note".into()),
            parent_uid: Some(missing_parent),
            chat_uid: None,
            payload: json!({}),
        };

        let acks = service.push_batch(EntityKind::Comment, owner, vec![tombstone]).await.unwrap();
        assert!(acks[0].error.is_none());
    }

    #[tokio::test]
    async fn batch_over_max_size_is_rejected() {
        let service = service().await.with_max_push_batch(1);
        let owner = Uuid::new_v4();
        let items = vec![
            note_item(Uuid::new_v4(), "2025-11-03T10:00:00.000Z"),
            note_item(Uuid::new_v4(), "2025-11-03T10:00:01.000Z"),
        ];
        let err = service.push_batch(EntityKind::Note, owner, items).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn pagination_sets_next_cursor_only_on_full_page() {
        let service = service().await;
        let owner = Uuid::new_v4();

        let mut items = Vec::new();
        for i in 0..3 {
            items.push(note_item(Uuid::new_v4(), &sync_domain::rfc3339_millis(1_730_628_000_000 + i)));
        }
        service.push_batch(EntityKind::Note, owner, items).await.unwrap();

        let page = service.pull(EntityKind::Note, owner, None, Some(2)).await.unwrap();
        assert_eq!(page.upserts.len(), 2);
        assert!(page.next_cursor.is_some());

        let page2 = service
            .pull(EntityKind::Note, owner, page.next_cursor.as_deref(), Some(2))
            .await
            .unwrap();
        assert_eq!(page2.upserts.len(), 1);
        assert!(page2.next_cursor.is_none());
    }
}
