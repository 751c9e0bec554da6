use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use sync_cursor::Cursor;
use sync_domain::{EntityKind, Error};

use crate::Tx;

#[derive(Debug, Clone)]
pub struct EntityRow {
    pub uid: Uuid,
    pub owner_id: Uuid,
    pub updated_at_ms: i64,
    pub deleted_at_ms: Option<i64>,
    pub version: i64,
    pub payload_json: String,
    pub parent_kind: Option<String>,
    pub parent_uid: Option<Uuid>,
    pub chat_uid: Option<Uuid>,
}

impl EntityRow {
    pub fn is_tombstone(&self) -> bool {
        self.deleted_at_ms.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    pub version: i64,
    pub updated_at_ms: i64,
}

fn has_parent_cols(kind: EntityKind) -> bool {
    matches!(kind, EntityKind::Comment)
}

fn has_chat_col(kind: EntityKind) -> bool {
    matches!(kind, EntityKind::ChatMessage)
}

fn select_columns(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Comment => {
            "uid, owner_id, updated_at_ms, deleted_at_ms, version, payload_json, parent_kind, parent_uid"
        }
        EntityKind::ChatMessage => {
            "uid, owner_id, updated_at_ms, deleted_at_ms, version, payload_json, chat_uid"
        }
        _ => "uid, owner_id, updated_at_ms, deleted_at_ms, version, payload_json",
    }
}

fn row_to_entity(kind: EntityKind, row: SqliteRow) -> Result<EntityRow, Error> {
    let uid: String = row.try_get("uid").map_err(crate::map_sqlx_err)?;
    let owner_id: String = row.try_get("owner_id").map_err(crate::map_sqlx_err)?;

    let parent_kind: Option<String> = if has_parent_cols(kind) {
        row.try_get("parent_kind").map_err(crate::map_sqlx_err)?
    } else {
        None
    };
    let parent_uid: Option<String> = if has_parent_cols(kind) {
        row.try_get("parent_uid").map_err(crate::map_sqlx_err)?
    } else {
        None
    };
    let chat_uid: Option<String> = if has_chat_col(kind) {
        row.try_get("chat_uid").map_err(crate::map_sqlx_err)?
    } else {
        None
    };

    Ok(EntityRow {
        uid: Uuid::parse_str(&uid).map_err(|_| Error::internal("corrupt uid in storage"))?,
        owner_id: Uuid::parse_str(&owner_id).map_err(|_| Error::internal("corrupt owner_id in storage"))?,
        updated_at_ms: row.try_get("updated_at_ms").map_err(crate::map_sqlx_err)?,
        deleted_at_ms: row.try_get("deleted_at_ms").map_err(crate::map_sqlx_err)?,
        version: row.try_get("version").map_err(crate::map_sqlx_err)?,
        payload_json: row.try_get("payload_json").map_err(crate::map_sqlx_err)?,
        parent_kind,
        parent_uid: parent_uid
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|_| Error::internal("corrupt parent_uid in storage"))?,
        chat_uid: chat_uid
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|_| Error::internal("corrupt chat_uid in storage"))?,
    })
}

/// The LWW upsert described in the storage-layer contract: insert at
/// version 1 if absent; if present and strictly newer, update and bump
/// version; if present and not newer, return the existing row unchanged.
/// Runs against an already-open transaction so a batch of pushes commits
/// or rolls back as one unit.
#[allow(clippy::too_many_arguments)]
pub async fn push_item(
    tx: &mut Tx<'_>,
    kind: EntityKind,
    owner_id: Uuid,
    uid: Uuid,
    updated_at_ms: i64,
    deleted_at_ms: Option<i64>,
    payload_json: &str,
    parent_kind: Option<&str>,
    parent_uid: Option<Uuid>,
    chat_uid: Option<Uuid>,
) -> Result<PushOutcome, Error> {
    let table = kind.as_str();

    let existing_sql = format!("SELECT version, updated_at_ms FROM {table} WHERE owner_id = ? AND uid = ?");
    let existing: Option<(i64, i64)> = sqlx::query_as(&existing_sql)
        .bind(owner_id.to_string())
        .bind(uid.to_string())
        .fetch_optional(&mut **tx)
        .await
        .map_err(crate::map_sqlx_err)?;

    match existing {
        None => {
            insert_new(tx, kind, owner_id, uid, updated_at_ms, deleted_at_ms, payload_json, parent_kind, parent_uid, chat_uid).await?;
            Ok(PushOutcome {
                version: 1,
                updated_at_ms,
            })
        }
        Some((old_version, old_updated_at_ms)) => {
            if updated_at_ms > old_updated_at_ms {
                let new_version = old_version + 1;
                let update_sql = format!(
                    "UPDATE {table} SET updated_at_ms = ?, deleted_at_ms = ?, version = ?, payload_json = ? WHERE owner_id = ? AND uid = ?"
                );
                sqlx::query(&update_sql)
                    .bind(updated_at_ms)
                    .bind(deleted_at_ms)
                    .bind(new_version)
                    .bind(payload_json)
                    .bind(owner_id.to_string())
                    .bind(uid.to_string())
                    .execute(&mut **tx)
                    .await
                    .map_err(crate::map_sqlx_err)?;
                Ok(PushOutcome {
                    version: new_version,
                    updated_at_ms,
                })
            } else {
                // Stale or duplicate push: idempotent no-op.
                Ok(PushOutcome {
                    version: old_version,
                    updated_at_ms: old_updated_at_ms,
                })
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn insert_new(
    tx: &mut Tx<'_>,
    kind: EntityKind,
    owner_id: Uuid,
    uid: Uuid,
    updated_at_ms: i64,
    deleted_at_ms: Option<i64>,
    payload_json: &str,
    parent_kind: Option<&str>,
    parent_uid: Option<Uuid>,
    chat_uid: Option<Uuid>,
) -> Result<(), Error> {
    let table = kind.as_str();
    match kind {
        EntityKind::Comment => {
            let sql = format!(
                "INSERT INTO {table} (uid, owner_id, updated_at_ms, deleted_at_ms, version, payload_json, parent_kind, parent_uid) \
                 VALUES (?, ?, ?, ?, 1, ?, ?, ?)"
            );
            sqlx::query(&sql)
                .bind(uid.to_string())
                .bind(owner_id.to_string())
                .bind(updated_at_ms)
                .bind(deleted_at_ms)
                .bind(payload_json)
                .bind(parent_kind.unwrap_or_default())
                .bind(parent_uid.map(|u| u.to_string()).unwrap_or_default())
                .execute(&mut **tx)
                .await
                .map_err(crate::map_sqlx_err)?;
        }
        EntityKind::ChatMessage => {
            let sql = format!(
                "INSERT INTO {table} (uid, owner_id, updated_at_ms, deleted_at_ms, version, payload_json, chat_uid) \
                 VALUES (?, ?, ?, ?, 1, ?, ?)"
            );
            sqlx::query(&sql)
                .bind(uid.to_string())
                .bind(owner_id.to_string())
                .bind(updated_at_ms)
                .bind(deleted_at_ms)
                .bind(payload_json)
                .bind(chat_uid.map(|u| u.to_string()).unwrap_or_default())
                .execute(&mut **tx)
                .await
                .map_err(crate::map_sqlx_err)?;
        }
        _ => {
            let sql = format!(
                "INSERT INTO {table} (uid, owner_id, updated_at_ms, deleted_at_ms, version, payload_json) \
                 VALUES (?, ?, ?, ?, 1, ?)"
            );
            sqlx::query(&sql)
                .bind(uid.to_string())
                .bind(owner_id.to_string())
                .bind(updated_at_ms)
                .bind(deleted_at_ms)
                .bind(payload_json)
                .execute(&mut **tx)
                .await
                .map_err(crate::map_sqlx_err)?;
        }
    }
    Ok(())
}

/// Convenience wrapper that opens and commits its own transaction, for
/// single-item callers (tests, CRUD-style handlers that don't batch).
#[allow(clippy::too_many_arguments)]
pub async fn push_item_standalone(
    pool: &SqlitePool,
    kind: EntityKind,
    owner_id: Uuid,
    uid: Uuid,
    updated_at_ms: i64,
    deleted_at_ms: Option<i64>,
    payload_json: &str,
    parent_kind: Option<&str>,
    parent_uid: Option<Uuid>,
    chat_uid: Option<Uuid>,
) -> Result<PushOutcome, Error> {
    let mut tx = pool.begin().await.map_err(crate::map_sqlx_err)?;
    let outcome = push_item(
        &mut tx,
        kind,
        owner_id,
        uid,
        updated_at_ms,
        deleted_at_ms,
        payload_json,
        parent_kind,
        parent_uid,
        chat_uid,
    )
    .await?;
    tx.commit().await.map_err(crate::map_sqlx_err)?;
    Ok(outcome)
}

pub async fn get(pool: &SqlitePool, kind: EntityKind, owner_id: Uuid, uid: Uuid) -> Result<Option<EntityRow>, Error> {
    let sql = format!(
        "SELECT {} FROM {} WHERE owner_id = ? AND uid = ?",
        select_columns(kind),
        kind.as_str()
    );
    let row = sqlx::query(&sql)
        .bind(owner_id.to_string())
        .bind(uid.to_string())
        .fetch_optional(pool)
        .await
        .map_err(crate::map_sqlx_err)?;
    row.map(|r| row_to_entity(kind, r)).transpose()
}

/// Cursor-ordered delta scan: `(updated_at_ms, uid) > cursor`, ascending,
/// capped at `limit` rows. Tombstones are included.
pub async fn pull(
    pool: &SqlitePool,
    kind: EntityKind,
    owner_id: Uuid,
    cursor: Option<Cursor>,
    limit: u32,
) -> Result<Vec<EntityRow>, Error> {
    let columns = select_columns(kind);
    let table = kind.as_str();

    let rows = match cursor {
        None => {
            let sql = format!(
                "SELECT {columns} FROM {table} WHERE owner_id = ? ORDER BY updated_at_ms ASC, uid ASC LIMIT ?"
            );
            sqlx::query(&sql)
                .bind(owner_id.to_string())
                .bind(limit as i64)
                .fetch_all(pool)
                .await
        }
        Some(c) => {
            let sql = format!(
                "SELECT {columns} FROM {table} \
                 WHERE owner_id = ? AND (updated_at_ms > ? OR (updated_at_ms = ? AND uid > ?)) \
                 ORDER BY updated_at_ms ASC, uid ASC LIMIT ?"
            );
            sqlx::query(&sql)
                .bind(owner_id.to_string())
                .bind(c.updated_at_ms)
                .bind(c.updated_at_ms)
                .bind(c.uid.to_string())
                .bind(limit as i64)
                .fetch_all(pool)
                .await
        }
    }
    .map_err(crate::map_sqlx_err)?;

    rows.into_iter().map(|r| row_to_entity(kind, r)).collect()
}

/// Existence check for referential integrity: does a live (non-tombstone)
/// row `(parent_kind, parent_uid)` exist and belong to `owner_id`? Runs
/// inside the push transaction so a parent pushed earlier in the same
/// batch is visible.
pub async fn parent_is_live(tx: &mut Tx<'_>, parent_kind: EntityKind, owner_id: Uuid, parent_uid: Uuid) -> Result<bool, Error> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE owner_id = ? AND uid = ? AND deleted_at_ms IS NULL",
        parent_kind.as_str()
    );
    let row: Option<(i64,)> = sqlx::query_as(&sql)
        .bind(owner_id.to_string())
        .bind(parent_uid.to_string())
        .fetch_optional(&mut **tx)
        .await
        .map_err(crate::map_sqlx_err)?;
    Ok(row.is_some())
}

/// Optimistic-lock update for the CRUD surface: succeeds only if the row
/// exists and its current version equals `expected_version`. On success the
/// row is rewritten with `now_ms` and the version bumped by one, exactly
/// like a fresh LWW push would. Returns `None` if the row doesn't exist and
/// `Some(Err(PreconditionFailed))` via the caller's own check — this
/// function only distinguishes absent from present-but-stale via the
/// returned `Option`.
pub async fn update_if_version(
    pool: &SqlitePool,
    kind: EntityKind,
    owner_id: Uuid,
    uid: Uuid,
    expected_version: i64,
    now_ms: i64,
    payload_json: &str,
) -> Result<Option<PushOutcome>, Error> {
    let table = kind.as_str();
    let existing_sql = format!("SELECT version FROM {table} WHERE owner_id = ? AND uid = ?");
    let existing: Option<(i64,)> = sqlx::query_as(&existing_sql)
        .bind(owner_id.to_string())
        .bind(uid.to_string())
        .fetch_optional(pool)
        .await
        .map_err(crate::map_sqlx_err)?;

    let Some((current_version,)) = existing else {
        return Ok(None);
    };
    if current_version != expected_version {
        return Err(Error::PreconditionFailed {
            expected: expected_version,
            actual: current_version,
        });
    }

    let new_version = current_version + 1;
    let update_sql =
        format!("UPDATE {table} SET updated_at_ms = ?, version = ?, payload_json = ? WHERE owner_id = ? AND uid = ?");
    sqlx::query(&update_sql)
        .bind(now_ms)
        .bind(new_version)
        .bind(payload_json)
        .bind(owner_id.to_string())
        .bind(uid.to_string())
        .execute(pool)
        .await
        .map_err(crate::map_sqlx_err)?;

    Ok(Some(PushOutcome {
        version: new_version,
        updated_at_ms: now_ms,
    }))
}

/// Soft-deletes a live row, honoring the same version lock as
/// [`update_if_version`]. Returns `Ok(None)` if absent.
pub async fn soft_delete_if_version(
    pool: &SqlitePool,
    kind: EntityKind,
    owner_id: Uuid,
    uid: Uuid,
    expected_version: i64,
    now_ms: i64,
) -> Result<Option<PushOutcome>, Error> {
    let table = kind.as_str();
    let existing_sql = format!("SELECT version FROM {table} WHERE owner_id = ? AND uid = ?");
    let existing: Option<(i64,)> = sqlx::query_as(&existing_sql)
        .bind(owner_id.to_string())
        .bind(uid.to_string())
        .fetch_optional(pool)
        .await
        .map_err(crate::map_sqlx_err)?;

    let Some((current_version,)) = existing else {
        return Ok(None);
    };
    if current_version != expected_version {
        return Err(Error::PreconditionFailed {
            expected: expected_version,
            actual: current_version,
        });
    }

    let new_version = current_version + 1;
    let sql = format!("UPDATE {table} SET updated_at_ms = ?, deleted_at_ms = ?, version = ? WHERE owner_id = ? AND uid = ?");
    sqlx::query(&sql)
        .bind(now_ms)
        .bind(now_ms)
        .bind(new_version)
        .bind(owner_id.to_string())
        .bind(uid.to_string())
        .execute(pool)
        .await
        .map_err(crate::map_sqlx_err)?;

    Ok(Some(PushOutcome {
        version: new_version,
        updated_at_ms: now_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Storage, StorageConfig};

    async fn test_storage() -> Storage {
        Storage::connect(&StorageConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn insert_then_noop_then_update_then_stale() {
        let storage = test_storage().await;
        let owner = Uuid::new_v4();
        let _ = crate::users::find_or_create_by_subject(storage.pool(), "owner-for-fk").await; // table has no real FK enforcement needed here
        let uid = Uuid::new_v4();

        let first = push_item_standalone(storage.pool(), EntityKind::Note, owner, uid, 1000, None, "{\"a\":1}", None, None, None)
            .await
            .unwrap();
        assert_eq!(first, PushOutcome { version: 1, updated_at_ms: 1000 });

        // equal timestamp -> no-op
        let second = push_item_standalone(storage.pool(), EntityKind::Note, owner, uid, 1000, None, "{\"a\":2}", None, None, None)
            .await
            .unwrap();
        assert_eq!(second, PushOutcome { version: 1, updated_at_ms: 1000 });

        // newer -> update, version bumps
        let third = push_item_standalone(storage.pool(), EntityKind::Note, owner, uid, 2000, None, "{\"a\":3}", None, None, None)
            .await
            .unwrap();
        assert_eq!(third, PushOutcome { version: 2, updated_at_ms: 2000 });

        // older -> ignored
        let fourth = push_item_standalone(storage.pool(), EntityKind::Note, owner, uid, 1500, None, "{\"a\":4}", None, None, None)
            .await
            .unwrap();
        assert_eq!(fourth, PushOutcome { version: 2, updated_at_ms: 2000 });

        let row = get(storage.pool(), EntityKind::Note, owner, uid).await.unwrap().unwrap();
        assert_eq!(row.payload_json, "{\"a\":3}");
    }

    #[tokio::test]
    async fn pull_paginates_in_cursor_order() {
        let storage = test_storage().await;
        let owner = Uuid::new_v4();

        for i in 0..5 {
            let uid = Uuid::new_v4();
            push_item_standalone(storage.pool(), EntityKind::Task, owner, uid, 1000 + i, None, "{}", None, None, None)
                .await
                .unwrap();
        }

        let page = pull(storage.pool(), EntityKind::Task, owner, None, 3).await.unwrap();
        assert_eq!(page.len(), 3);
        assert!(page.windows(2).all(|w| w[0].updated_at_ms <= w[1].updated_at_ms));

        let last = page.last().unwrap();
        let cursor = Cursor::new(last.updated_at_ms, last.uid);
        let rest = pull(storage.pool(), EntityKind::Task, owner, Some(cursor), 10).await.unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn tombstones_are_retained_and_visible() {
        let storage = test_storage().await;
        let owner = Uuid::new_v4();
        let uid = Uuid::new_v4();

        push_item_standalone(storage.pool(), EntityKind::Note, owner, uid, 1000, None, "{}", None, None, None)
            .await
            .unwrap();
        push_item_standalone(storage.pool(), EntityKind::Note, owner, uid, 2000, Some(2000), "{}", None, None, None)
            .await
            .unwrap();

        let row = get(storage.pool(), EntityKind::Note, owner, uid).await.unwrap().unwrap();
        assert!(row.is_tombstone());

        let page = pull(storage.pool(), EntityKind::Note, owner, None, 100).await.unwrap();
        assert_eq!(page.len(), 1);
        assert!(page[0].is_tombstone());
    }

    #[tokio::test]
    async fn parent_liveness_check() {
        let storage = test_storage().await;
        let owner = Uuid::new_v4();
        let note_uid = Uuid::new_v4();

        let mut tx = storage.pool().begin().await.unwrap();
        assert!(!parent_is_live(&mut tx, EntityKind::Note, owner, note_uid).await.unwrap());
        tx.commit().await.unwrap();

        push_item_standalone(storage.pool(), EntityKind::Note, owner, note_uid, 1000, None, "{}", None, None, None)
            .await
            .unwrap();

        let mut tx = storage.pool().begin().await.unwrap();
        assert!(parent_is_live(&mut tx, EntityKind::Note, owner, note_uid).await.unwrap());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn version_locked_update_rejects_stale_etag() {
        let storage = test_storage().await;
        let owner = Uuid::new_v4();
        let uid = Uuid::new_v4();
        push_item_standalone(storage.pool(), EntityKind::Note, owner, uid, 1000, None, "{\"a\":1}", None, None, None)
            .await
            .unwrap();

        let outcome = update_if_version(storage.pool(), EntityKind::Note, owner, uid, 1, 2000, "{\"a\":2}")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.version, 2);

        let err = update_if_version(storage.pool(), EntityKind::Note, owner, uid, 1, 3000, "{\"a\":3}")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed { expected: 1, actual: 2 }));
    }

    #[tokio::test]
    async fn soft_delete_bumps_version_and_sets_tombstone() {
        let storage = test_storage().await;
        let owner = Uuid::new_v4();
        let uid = Uuid::new_v4();
        push_item_standalone(storage.pool(), EntityKind::Task, owner, uid, 1000, None, "{}", None, None, None)
            .await
            .unwrap();

        soft_delete_if_version(storage.pool(), EntityKind::Task, owner, uid, 1, 2000)
            .await
            .unwrap()
            .unwrap();

        let row = get(storage.pool(), EntityKind::Task, owner, uid).await.unwrap().unwrap();
        assert!(row.is_tombstone());
        assert_eq!(row.version, 2);
    }
}
