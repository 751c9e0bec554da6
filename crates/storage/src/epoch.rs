use sqlx::sqlite::SqlitePool;
use sync_domain::{EntityKind, Error};
use uuid::Uuid;

/// Deletes every row owned by `user_id` across all entity-kind tables and
/// bumps the user's epoch, as one transaction. Session eviction for the
/// user is the caller's responsibility (the session store is not a
/// database concern).
#[tracing::instrument(skip(pool))]
pub async fn wipe_user(pool: &SqlitePool, user_id: Uuid) -> Result<i64, Error> {
    let mut tx = pool.begin().await.map_err(crate::map_sqlx_err)?;

    for kind in EntityKind::ALL {
        let sql = format!("DELETE FROM {} WHERE owner_id = ?", kind.as_str());
        sqlx::query(&sql)
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(crate::map_sqlx_err)?;
    }

    sqlx::query("UPDATE users SET epoch = epoch + 1 WHERE id = ?")
        .bind(user_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(crate::map_sqlx_err)?;

    let new_epoch: i64 = sqlx::query_scalar("SELECT epoch FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(crate::map_sqlx_err)?;

    tx.commit().await.map_err(crate::map_sqlx_err)?;

    tracing::warn!(%user_id, new_epoch, "user data wiped");
    Ok(new_epoch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Storage, StorageConfig};

    #[tokio::test]
    async fn wipe_clears_rows_and_bumps_epoch() {
        let storage = Storage::connect(&StorageConfig::in_memory()).await.unwrap();
        let user = crate::users::find_or_create_by_subject(storage.pool(), "alice")
            .await
            .unwrap();

        crate::entities::push_item_standalone(
            storage.pool(),
            EntityKind::Note,
            user.id,
            Uuid::new_v4(),
            1000,
            None,
            "{}",
            None,
            None,
            None,
        )
        .await
        .unwrap();

        let new_epoch = wipe_user(storage.pool(), user.id).await.unwrap();
        assert_eq!(new_epoch, 2);

        let rows = crate::entities::pull(storage.pool(), EntityKind::Note, user.id, None, 100)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
