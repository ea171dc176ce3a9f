use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::assistant::gateway::{AssistantApi, Reply};
use crate::error::AssistantError;

/// A user's current remote conversation session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub user_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

type Slot = Arc<Mutex<Option<SessionHandle>>>;

/// Maps local users to remote assistant sessions.
///
/// Each user has its own slot guarded by an async mutex, so creation and
/// use of one user's session are serialized while different users proceed
/// in parallel. At most one remote session per user exists from this
/// process's point of view.
///
/// Slots left empty by an invalidation or a failed creation are removed
/// once nobody else holds or waits on them.
pub struct ConversationSessionManager {
    api: Arc<dyn AssistantApi>,
    slots: DashMap<String, Slot>,
}

/// Exclusive hold on one user's session slot.
pub struct SessionLease {
    user_id: String,
    slot: OwnedMutexGuard<Option<SessionHandle>>,
    api: Arc<dyn AssistantApi>,
}

impl ConversationSessionManager {
    pub fn new(api: Arc<dyn AssistantApi>) -> Self {
        Self {
            api,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, user_id: &str) -> Slot {
        self.slots.entry(user_id.to_string()).or_default().clone()
    }

    /// Wait for exclusive access to `user_id`'s session.
    pub async fn lease(&self, user_id: &str) -> SessionLease {
        SessionLease {
            user_id: user_id.to_string(),
            slot: self.slot(user_id).lock_owned().await,
            api: self.api.clone(),
        }
    }

    /// Remove `user_id`'s slot if it is empty and no other caller has a clone.
    ///
    /// `remove_if` runs under the shard lock that `slot()` also takes, so a
    /// caller cannot pick up the slot between the check and the removal.
    fn prune(&self, user_id: &str) {
        let removed = self.slots.remove_if(user_id, |_, slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().map(|guard| guard.is_none()).unwrap_or(false)
        });
        if removed.is_some() {
            tracing::debug!(user_id, "Released empty session slot");
        }
    }

    /// Number of users with a tracked slot.
    pub fn tracked_users(&self) -> usize {
        self.slots.len()
    }

    pub async fn get_or_create_session(&self, user_id: &str) -> Result<SessionHandle, AssistantError> {
        let result = self.lease(user_id).await.get_or_create().await;
        if result.is_err() {
            self.prune(user_id);
        }
        result
    }

    /// Drop the user's session. Returns the session that was removed, if any.
    pub async fn invalidate(&self, user_id: &str) -> Option<SessionHandle> {
        let removed = self.lease(user_id).await.invalidate().await;
        self.prune(user_id);
        removed
    }

    /// Register an already existing remote session for `user_id`.
    pub async fn seed(&self, user_id: &str, session_id: &str) -> SessionHandle {
        let mut lease = self.lease(user_id).await;
        let handle = SessionHandle {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            created_at: Utc::now(),
        };
        *lease.slot = Some(handle.clone());
        tracing::info!(user_id, session_id, "Seeded assistant session");
        handle
    }

    pub async fn current(&self, user_id: &str) -> Option<SessionHandle> {
        let slot = self.slots.get(user_id).map(|entry| entry.value().clone())?;
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Send `message` on behalf of `user_id`, creating a session if needed.
    ///
    /// If the remote side no longer knows the session, it is replaced and the
    /// message is sent once more.
    pub async fn converse(&self, user_id: &str, message: &str) -> Result<Reply, AssistantError> {
        let result = self.converse_locked(self.lease(user_id).await, message).await;
        if result.is_err() {
            self.prune(user_id);
        }
        result
    }

    async fn converse_locked(&self, mut lease: SessionLease, message: &str) -> Result<Reply, AssistantError> {
        let session = lease.get_or_create().await?;

        match self.api.send(&session, message).await {
            Err(AssistantError::InvalidSession(stale)) => {
                tracing::warn!(user_id = %lease.user_id, session_id = %stale, "Assistant rejected session, recreating");
                lease.invalidate().await;
                let session = lease.get_or_create().await?;
                self.api.send(&session, message).await
            }
            other => other,
        }
    }
}

impl SessionLease {
    pub fn current(&self) -> Option<&SessionHandle> {
        self.slot.as_ref()
    }

    pub async fn get_or_create(&mut self) -> Result<SessionHandle, AssistantError> {
        if let Some(existing) = self.slot.as_ref() {
            return Ok(existing.clone());
        }

        let session_id = self.api.create_session().await.map_err(|e| match e {
            e @ AssistantError::SessionCreationFailed(_) => e,
            other => AssistantError::SessionCreationFailed(other.to_string()),
        })?;

        let handle = SessionHandle {
            user_id: self.user_id.clone(),
            session_id,
            created_at: Utc::now(),
        };
        tracing::info!(user_id = %self.user_id, session_id = %handle.session_id, "Assistant session created");
        *self.slot = Some(handle.clone());
        Ok(handle)
    }

    /// Clear the local mapping, then try to delete the remote session.
    pub async fn invalidate(&mut self) -> Option<SessionHandle> {
        let previous = self.slot.take()?;

        if let Err(e) = self.api.delete_session(&previous.session_id).await {
            tracing::warn!(
                user_id = %self.user_id,
                session_id = %previous.session_id,
                "Remote session delete failed: {}", e
            );
        }
        tracing::info!(user_id = %self.user_id, session_id = %previous.session_id, "Assistant session invalidated");
        Some(previous)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    /// In-process stand-in for the remote assistant.
    #[derive(Default)]
    pub struct FakeAssistant {
        pub creates: AtomicUsize,
        pub deletes: AtomicUsize,
        pub sends: AtomicUsize,
        pub fail_create: AtomicBool,
        pub fail_delete: AtomicBool,
        /// Session ids the remote side has forgotten.
        pub expired: StdMutex<Vec<String>>,
    }

    impl FakeAssistant {
        pub fn creates(&self) -> usize {
            self.creates.load(Ordering::SeqCst)
        }

        pub fn expire(&self, session_id: &str) {
            self.expired.lock().unwrap().push(session_id.to_string());
        }
    }

    #[async_trait]
    impl AssistantApi for FakeAssistant {
        async fn create_session(&self) -> Result<String, AssistantError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(AssistantError::RemoteUnavailable("connection refused".to_string()));
            }
            // Widen the window for racing callers.
            tokio::time::sleep(Duration::from_millis(20)).await;
            let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("session-{}", n))
        }

        async fn delete_session(&self, _session_id: &str) -> Result<(), AssistantError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(AssistantError::RemoteUnavailable("timeout".to_string()));
            }
            Ok(())
        }

        async fn send(&self, session: &SessionHandle, message: &str) -> Result<Reply, AssistantError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.expired.lock().unwrap().contains(&session.session_id) {
                return Err(AssistantError::InvalidSession(session.session_id.clone()));
            }
            Ok(Reply {
                text: format!("{} via {}", message, session.session_id),
                items: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::test_support::FakeAssistant;
    use super::*;

    fn manager() -> (Arc<ConversationSessionManager>, Arc<FakeAssistant>) {
        let fake = Arc::new(FakeAssistant::default());
        (Arc::new(ConversationSessionManager::new(fake.clone())), fake)
    }

    #[tokio::test]
    async fn test_session_reused_between_calls() {
        let (sessions, fake) = manager();

        let first = sessions.get_or_create_session("alice").await.unwrap();
        let second = sessions.get_or_create_session("alice").await.unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(fake.creates(), 1);
    }

    #[tokio::test]
    async fn test_users_get_separate_sessions() {
        let (sessions, fake) = manager();

        let alice = sessions.get_or_create_session("alice").await.unwrap();
        let bob = sessions.get_or_create_session("bob").await.unwrap();

        assert_ne!(alice.session_id, bob.session_id);
        assert_eq!(fake.creates(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_session() {
        let (sessions, fake) = manager();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let sessions = sessions.clone();
                tokio::spawn(async move { sessions.get_or_create_session("alice").await.unwrap() })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().session_id);
        }

        assert_eq!(fake.creates(), 1);
        assert!(ids.iter().all(|id| id == &ids[0]));
    }

    #[tokio::test]
    async fn test_invalidate_then_recreate() {
        let (sessions, fake) = manager();
        let before = sessions.get_or_create_session("alice").await.unwrap();

        let removed = sessions.invalidate("alice").await.unwrap();
        assert_eq!(removed.session_id, before.session_id);
        assert!(sessions.current("alice").await.is_none());

        let after = sessions.get_or_create_session("alice").await.unwrap();
        assert_ne!(after.session_id, before.session_id);
        assert_eq!(fake.creates(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_survives_remote_delete_failure() {
        let (sessions, fake) = manager();
        fake.fail_delete.store(true, Ordering::SeqCst);
        sessions.get_or_create_session("alice").await.unwrap();

        assert!(sessions.invalidate("alice").await.is_some());
        assert!(sessions.current("alice").await.is_none());
        assert_eq!(fake.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_without_session_is_noop() {
        let (sessions, fake) = manager();

        assert!(sessions.invalidate("nobody").await.is_none());
        assert_eq!(fake.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_creation_failure_leaves_no_mapping() {
        let (sessions, fake) = manager();
        fake.fail_create.store(true, Ordering::SeqCst);

        let err = sessions.get_or_create_session("alice").await.unwrap_err();
        assert!(matches!(err, AssistantError::SessionCreationFailed(_)));
        assert!(sessions.current("alice").await.is_none());

        fake.fail_create.store(false, Ordering::SeqCst);
        assert!(sessions.get_or_create_session("alice").await.is_ok());
    }

    #[tokio::test]
    async fn test_seeded_session_is_used() {
        let (sessions, fake) = manager();
        sessions.seed("anonymous:test", "preconfigured").await;

        let reply = sessions.converse("anonymous:test", "hello").await.unwrap();

        assert_eq!(reply.text, "hello via preconfigured");
        assert_eq!(fake.creates(), 0);
    }

    #[tokio::test]
    async fn test_converse_recreates_rejected_session_once() {
        let (sessions, fake) = manager();
        let stale = sessions.get_or_create_session("alice").await.unwrap();
        fake.expire(&stale.session_id);

        let reply = sessions.converse("alice", "hi").await.unwrap();

        assert_eq!(reply.text, "hi via session-2");
        assert_eq!(fake.creates(), 2);
        assert_eq!(fake.sends.load(Ordering::SeqCst), 2);
        assert_eq!(sessions.current("alice").await.unwrap().session_id, "session-2");
    }

    #[tokio::test]
    async fn test_lease_blocks_other_callers_for_same_user() {
        let (sessions, _fake) = manager();
        let lease = sessions.lease("alice").await;

        let contender = {
            let sessions = sessions.clone();
            tokio::spawn(async move { sessions.get_or_create_session("alice").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!contender.is_finished());
        assert!(lease.current().is_none());

        drop(lease);
        assert!(contender.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_invalidate_releases_slot() {
        let (sessions, _fake) = manager();
        sessions.get_or_create_session("alice").await.unwrap();
        sessions.get_or_create_session("bob").await.unwrap();
        assert_eq!(sessions.tracked_users(), 2);

        sessions.invalidate("alice").await;
        sessions.invalidate("nobody").await;

        assert_eq!(sessions.tracked_users(), 1);
        assert_eq!(sessions.current("bob").await.unwrap().session_id, "session-2");
    }

    #[tokio::test]
    async fn test_failed_creation_releases_slot() {
        let (sessions, fake) = manager();
        fake.fail_create.store(true, Ordering::SeqCst);

        assert!(sessions.converse("alice", "hi").await.is_err());
        assert!(sessions.get_or_create_session("alice").await.is_err());

        assert_eq!(sessions.tracked_users(), 0);
    }

    #[tokio::test]
    async fn test_slot_kept_while_another_caller_waits() {
        let (sessions, fake) = manager();
        sessions.get_or_create_session("alice").await.unwrap();
        let lease = sessions.lease("alice").await;

        let restart = {
            let sessions = sessions.clone();
            tokio::spawn(async move { sessions.invalidate("alice").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let waiter = {
            let sessions = sessions.clone();
            tokio::spawn(async move { sessions.converse("alice", "still here").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(lease);

        // The restart finishes while the waiter is queued on the slot, so the
        // slot must survive and the waiter opens a fresh session in it.
        assert_eq!(restart.await.unwrap().unwrap().session_id, "session-1");
        let reply = waiter.await.unwrap().unwrap();

        assert_eq!(reply.text, "still here via session-2");
        assert_eq!(sessions.tracked_users(), 1);
        assert_eq!(sessions.current("alice").await.unwrap().session_id, "session-2");
        assert_eq!(fake.creates(), 2);
    }
}
