//! In-memory sync-session handles, shared by both transports.
//!
//! ## Mental model
//! A session pins a client to the user's epoch at the moment sync began.
//! It is a concurrency-safe map, not an actor: unlike the broker's
//! channel-based services, the spec calls for a plain `RwLock<HashMap<_>>`
//! here, since reads (`get`) vastly outnumber writes (`create`/`delete`)
//! and there is no cross-service coordination to serialize through a
//! single task.
//!
//! ## Lifecycle
//! Created via [`SessionStore::create`]; removed by explicit
//! [`SessionStore::delete`], by [`SessionStore::delete_for_user`] (wipe),
//! or by the background sweep once `expires_at` has passed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sync_domain::now_ms;
use uuid::Uuid;

const SESSION_TTL_MS: i64 = 30 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub epoch_at_creation: i64,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

impl Session {
    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn create(&self, user_id: Uuid, epoch: i64) -> Session {
        let now = now_ms();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            epoch_at_creation: epoch,
            created_at_ms: now,
            expires_at_ms: now + SESSION_TTL_MS,
        };
        self.inner.write().insert(session.id, session.clone());
        session
    }

    /// Returns the session iff it exists and has not expired. An expired
    /// entry found here is evicted on the spot rather than waiting for the
    /// sweep.
    pub fn get(&self, session_id: Uuid) -> Option<Session> {
        let now = now_ms();
        {
            let guard = self.inner.read();
            match guard.get(&session_id) {
                Some(s) if !s.is_expired(now) => return Some(s.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.inner.write().remove(&session_id);
        None
    }

    pub fn delete(&self, session_id: Uuid) {
        self.inner.write().remove(&session_id);
    }

    /// Drops every session belonging to `user_id`. Called on wipe so no
    /// stale replica can keep syncing against a pre-wipe epoch.
    pub fn delete_for_user(&self, user_id: Uuid) {
        self.inner.write().retain(|_, s| s.user_id != user_id);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep_once(&self) {
        let now = now_ms();
        let mut guard = self.inner.write();
        let before = guard.len();
        guard.retain(|_, s| !s.is_expired(now));
        let evicted = before - guard.len();
        if evicted > 0 {
            tracing::debug!(evicted, "swept expired sync sessions");
        }
    }

    /// Spawns the background eviction loop. Returns the task handle so the
    /// caller can abort it on shutdown.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.sweep_once();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get_round_trips() {
        let store = SessionStore::new();
        let user_id = Uuid::new_v4();
        let session = store.create(user_id, 1);
        let fetched = store.get(session.id).unwrap();
        assert_eq!(fetched.user_id, user_id);
        assert_eq!(fetched.epoch_at_creation, 1);
    }

    #[test]
    fn delete_removes_session() {
        let store = SessionStore::new();
        let session = store.create(Uuid::new_v4(), 1);
        store.delete(session.id);
        assert!(store.get(session.id).is_none());
    }

    #[test]
    fn delete_for_user_clears_only_that_user() {
        let store = SessionStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let s1 = store.create(alice, 1);
        let s2 = store.create(bob, 1);

        store.delete_for_user(alice);

        assert!(store.get(s1.id).is_none());
        assert!(store.get(s2.id).is_some());
    }

    #[test]
    fn expired_session_is_treated_as_absent() {
        let store = SessionStore::new();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            epoch_at_creation: 1,
            created_at_ms: now_ms() - SESSION_TTL_MS - 1,
            expires_at_ms: now_ms() - 1,
        };
        store.inner.write().insert(session.id, session.clone());

        assert!(store.get(session.id).is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn sweeper_evicts_expired_entries() {
        let store = SessionStore::new();
        let expired = Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            epoch_at_creation: 1,
            created_at_ms: now_ms() - SESSION_TTL_MS - 1,
            expires_at_ms: now_ms() - 1,
        };
        store.inner.write().insert(expired.id, expired);

        store.sweep_once();
        assert!(store.is_empty());
    }
}
