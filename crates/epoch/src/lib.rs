//! Coordinates the destructive wipe path and the epoch-mismatch check that
//! runs ahead of every mutating request.

use sync_domain::Error;
use sync_session::SessionStore;
use sync_storage::Storage;
use uuid::Uuid;

#[derive(Clone)]
pub struct EpochCoordinator {
    storage: Storage,
    sessions: SessionStore,
}

impl EpochCoordinator {
    pub fn new(storage: Storage, sessions: SessionStore) -> Self {
        EpochCoordinator { storage, sessions }
    }

    /// Deletes all of a user's rows, bumps their epoch, and drops every
    /// session for that user, in that order. Returns the new epoch.
    #[tracing::instrument(skip(self))]
    pub async fn wipe(&self, user_id: Uuid) -> Result<i64, Error> {
        let new_epoch = sync_storage::wipe_user(self.storage.pool(), user_id).await?;
        self.sessions.delete_for_user(user_id);
        Ok(new_epoch)
    }

    /// Compares a client-declared epoch against the server's current
    /// epoch for that user. See the mismatch-detection rules: equal
    /// proceeds; client behind gets `EpochMismatch`; client ahead is a
    /// validation failure since the server never issued that epoch.
    pub fn check(&self, declared_epoch: i64, server_epoch: i64) -> Result<(), Error> {
        check_epoch(declared_epoch, server_epoch)
    }
}

/// Free-standing form of the mismatch check, usable from middleware that
/// only has the two integers on hand (no coordinator instance needed).
pub fn check_epoch(declared_epoch: i64, server_epoch: i64) -> Result<(), Error> {
    use std::cmp::Ordering;
    match declared_epoch.cmp(&server_epoch) {
        Ordering::Equal => Ok(()),
        Ordering::Less => Err(Error::EpochMismatch { server_epoch }),
        Ordering::Greater => Err(Error::validation(format!(
            "declared epoch {declared_epoch} exceeds server epoch {server_epoch}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_storage::StorageConfig;

    async fn setup() -> (EpochCoordinator, Uuid) {
        let storage = Storage::connect(&StorageConfig::in_memory()).await.unwrap();
        let user = sync_storage::find_or_create_by_subject(storage.pool(), "alice").await.unwrap();
        let sessions = SessionStore::new();
        (EpochCoordinator::new(storage, sessions), user.id)
    }

    #[tokio::test]
    async fn equal_epoch_proceeds() {
        let (coordinator, _user) = setup().await;
        assert!(coordinator.check(3, 3).is_ok());
    }

    #[tokio::test]
    async fn client_behind_gets_mismatch_with_server_epoch() {
        let (coordinator, _user) = setup().await;
        let err = coordinator.check(1, 2).unwrap_err();
        assert!(matches!(err, Error::EpochMismatch { server_epoch: 2 }));
    }

    #[tokio::test]
    async fn client_ahead_is_validation_error() {
        let (coordinator, _user) = setup().await;
        let err = coordinator.check(5, 2).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn wipe_drops_sessions_and_bumps_epoch() {
        let (coordinator, user_id) = setup().await;
        let session = coordinator.sessions.create(user_id, 1);

        let new_epoch = coordinator.wipe(user_id).await.unwrap();
        assert_eq!(new_epoch, 2);
        assert!(coordinator.sessions.get(session.id).is_none());
    }
}
