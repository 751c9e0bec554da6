//! Relational persistence: per-kind entity tables, the user table, the LWW
//! upsert, and cursor-ordered scans. `payload_json` is stored and returned
//! as opaque text; this crate never interprets it.

mod entities;
mod epoch;
mod pool;
mod users;

pub use entities::{
    get, parent_is_live, pull, push_item, push_item_standalone, soft_delete_if_version, update_if_version, EntityRow,
    PushOutcome,
};
pub use epoch::wipe_user;
pub use pool::{Storage, StorageConfig};
pub use users::{find_by_id, find_by_subject, find_or_create_by_subject, User};

use sqlx::sqlite::Sqlite;
use sync_domain::Error;

pub type Tx<'c> = sqlx::Transaction<'c, Sqlite>;

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> Error {
    tracing::warn!(error = %err, "storage operation failed");
    Error::internal(err.to_string())
}
