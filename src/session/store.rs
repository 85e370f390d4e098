//! Per-user dialog sessions.
//!
//! One table maps each user to their current state and flow scratch. A user
//! with no entry is `Idle`. The table sits behind a single `std::sync::Mutex`
//! that is only held for map access, never across an `.await`.
//!
//! Event handling for one user is serialized separately through
//! [`SessionStore::lock_user`], so two updates from the same user can never
//! interleave their reads and writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::debug;

use crate::channels::UserId;
use crate::dialog::state::{DialogState, FlowData};
use crate::error::NotFoundError;

/// Current state plus scratch for one user.
#[derive(Debug, Clone)]
pub struct Session {
    pub state: DialogState,
    pub data: Option<FlowData>,
    pub touched_at: Instant,
}

impl Session {
    fn idle() -> Self {
        Self {
            state: DialogState::Idle,
            data: None,
            touched_at: Instant::now(),
        }
    }

    fn is_empty(&self) -> bool {
        self.state.is_idle() && self.data.is_none()
    }
}

/// Table of live sessions and per-user handling locks.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<UserId, Session>>,
    locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<UserId, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, `Idle` when the user has no session.
    pub fn state(&self, user: UserId) -> DialogState {
        self.sessions()
            .get(&user)
            .map(|s| s.state)
            .unwrap_or(DialogState::Idle)
    }

    pub fn set_state(&self, user: UserId, state: DialogState) {
        let mut sessions = self.sessions();
        let session = sessions.entry(user).or_insert_with(Session::idle);
        session.state = state;
        session.touched_at = Instant::now();
        if session.is_empty() {
            sessions.remove(&user);
        }
    }

    /// Scratch of the active flow.
    pub fn data(&self, user: UserId) -> Result<FlowData, NotFoundError> {
        let sessions = self.sessions();
        let session = sessions.get(&user);
        session.and_then(|s| s.data.clone()).ok_or_else(|| NotFoundError::Session {
            user: user.0,
            state: session
                .map(|s| s.state)
                .unwrap_or(DialogState::Idle)
                .to_string(),
        })
    }

    pub fn set_data(&self, user: UserId, data: FlowData) {
        let mut sessions = self.sessions();
        let session = sessions.entry(user).or_insert_with(Session::idle);
        session.data = Some(data);
        session.touched_at = Instant::now();
    }

    /// Replace state and scratch together.
    pub fn advance(&self, user: UserId, state: DialogState, data: FlowData) {
        self.sessions().insert(
            user,
            Session {
                state,
                data: Some(data),
                touched_at: Instant::now(),
            },
        );
    }

    /// Snapshot of state and scratch taken under one lock.
    pub fn snapshot(&self, user: UserId) -> (DialogState, Option<FlowData>) {
        self.sessions()
            .get(&user)
            .map(|s| (s.state, s.data.clone()))
            .unwrap_or((DialogState::Idle, None))
    }

    /// Clear state and scratch. Returns whether anything was cleared.
    pub fn reset(&self, user: UserId) -> bool {
        self.sessions().remove(&user).is_some()
    }

    /// Serialize event handling for `user`. The guard is owned so it can be
    /// held across awaits without borrowing the store.
    pub async fn lock_user(&self, user: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(user).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop sessions untouched for longer than `ttl` and handling locks that
    /// nobody holds or waits on. Returns the number of sessions dropped.
    pub fn prune_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let pruned = {
            let mut sessions = self.sessions();
            let before = sessions.len();
            sessions.retain(|_, s| now.saturating_duration_since(s.touched_at) <= ttl);
            before - sessions.len()
        };

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        if pruned > 0 {
            debug!(pruned, "Pruned idle dialog sessions");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    pub fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::state::{NewsLookupData, NewsLookupStep, SetPositionData, SetPositionStep};

    fn news_state() -> (DialogState, FlowData) {
        (
            DialogState::NewsLookup(NewsLookupStep::Days),
            FlowData::NewsLookup(NewsLookupData {
                symbol: Some("BBCA".into()),
            }),
        )
    }

    #[test]
    fn unknown_user_is_idle() {
        let store = SessionStore::new();
        assert_eq!(store.state(UserId(42)), DialogState::Idle);
        assert!(matches!(
            store.data(UserId(42)),
            Err(NotFoundError::Session { user: 42, .. })
        ));
    }

    #[test]
    fn advance_then_reset_clears_both() {
        let store = SessionStore::new();
        let (state, data) = news_state();
        store.advance(UserId(1), state, data.clone());
        assert_eq!(store.state(UserId(1)), state);
        assert_eq!(store.data(UserId(1)).unwrap(), data);

        assert!(store.reset(UserId(1)));
        assert_eq!(store.state(UserId(1)), DialogState::Idle);
        assert!(store.data(UserId(1)).is_err());
    }

    #[test]
    fn reset_is_idempotent() {
        let store = SessionStore::new();
        let (state, data) = news_state();
        store.advance(UserId(1), state, data);
        assert!(store.reset(UserId(1)));
        assert!(!store.reset(UserId(1)));
        assert_eq!(store.state(UserId(1)), DialogState::Idle);
        assert!(store.is_empty());
    }

    #[test]
    fn set_state_and_data_separately() {
        let store = SessionStore::new();
        store.set_state(UserId(3), DialogState::SetPosition(SetPositionStep::Symbol));
        assert!(store.data(UserId(3)).is_err());
        store.set_data(UserId(3), FlowData::SetPosition(SetPositionData::default()));
        assert!(store.data(UserId(3)).is_ok());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn setting_idle_without_data_drops_the_entry() {
        let store = SessionStore::new();
        store.set_state(UserId(3), DialogState::SetPosition(SetPositionStep::Symbol));
        store.set_state(UserId(3), DialogState::Idle);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_only_stale_sessions() {
        let store = SessionStore::new();
        let (state, data) = news_state();
        store.advance(UserId(1), state, data.clone());
        tokio::time::advance(Duration::from_secs(50)).await;
        store.advance(UserId(2), state, data);
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(store.prune_idle(Duration::from_secs(60)), 1);
        assert_eq!(store.state(UserId(1)), DialogState::Idle);
        assert_eq!(store.state(UserId(2)), state);
    }

    #[tokio::test]
    async fn user_lock_serializes_and_is_pruned_when_free() {
        let store = Arc::new(SessionStore::new());
        let guard = store.lock_user(UserId(9)).await;

        let contender = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let _guard = store.lock_user(UserId(9)).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());
        store.prune_idle(Duration::from_secs(60));
        assert_eq!(store.tracked_locks(), 1);

        drop(guard);
        contender.await.unwrap();
        store.prune_idle(Duration::from_secs(60));
        assert_eq!(store.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn different_users_do_not_block_each_other() {
        let store = SessionStore::new();
        let _a = store.lock_user(UserId(1)).await;
        let _b = store.lock_user(UserId(2)).await;
        assert_eq!(store.tracked_locks(), 2);
    }
}
