use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use sync_domain::{now_ms, Error};

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub subject: String,
    pub created_at_ms: i64,
    pub epoch: i64,
}

/// Looks up a user by external-identity subject, provisioning a new row on
/// first contact. Called once per authenticated request, outside any
/// entity-mutation transaction.
pub async fn find_or_create_by_subject(pool: &SqlitePool, subject: &str) -> Result<User, Error> {
    if let Some(user) = find_by_subject(pool, subject).await? {
        return Ok(user);
    }

    let id = Uuid::new_v4();
    let created_at_ms = now_ms();

    let inserted = sqlx::query(
        "INSERT INTO users (id, subject, created_at_ms, epoch) VALUES (?, ?, ?, 1) \
         ON CONFLICT(subject) DO NOTHING",
    )
    .bind(id.to_string())
    .bind(subject)
    .bind(created_at_ms)
    .execute(pool)
    .await
    .map_err(crate::map_sqlx_err)?;

    if inserted.rows_affected() == 0 {
        // Lost the race with a concurrent first-contact insert.
        return find_by_subject(pool, subject)
            .await?
            .ok_or_else(|| Error::internal("user vanished after insert race"));
    }

    Ok(User {
        id,
        subject: subject.to_string(),
        created_at_ms,
        epoch: 1,
    })
}

pub async fn find_by_subject(pool: &SqlitePool, subject: &str) -> Result<Option<User>, Error> {
    let row = sqlx::query("SELECT id, subject, created_at_ms, epoch FROM users WHERE subject = ?")
        .bind(subject)
        .fetch_optional(pool)
        .await
        .map_err(crate::map_sqlx_err)?;

    row.map(row_to_user).transpose()
}

pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<User>, Error> {
    let row = sqlx::query("SELECT id, subject, created_at_ms, epoch FROM users WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(crate::map_sqlx_err)?;

    row.map(row_to_user).transpose()
}

fn row_to_user(row: SqliteRow) -> Result<User, Error> {
    let id: String = row.try_get("id").map_err(crate::map_sqlx_err)?;
    let id = Uuid::parse_str(&id).map_err(|_| Error::internal("corrupt user id in storage"))?;
    Ok(User {
        id,
        subject: row.try_get("subject").map_err(crate::map_sqlx_err)?,
        created_at_ms: row.try_get("created_at_ms").map_err(crate::map_sqlx_err)?,
        epoch: row.try_get("epoch").map_err(crate::map_sqlx_err)?,
    })
}
