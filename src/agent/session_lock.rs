//! Per-session mutual exclusion inside a runner.
//!
//! The thread queue is the primary serialization point, but a runner can be
//! driven directly (or by two threads referring to the same session), so each
//! runner also refuses to run two invocations of one resume token at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::ResumeToken;

/// Held for as long as an invocation owns its session
pub struct SessionGuard {
    token: ResumeToken,
    _guard: OwnedMutexGuard<()>,
}

impl SessionGuard {
    pub fn token(&self) -> &ResumeToken {
        &self.token
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("token", &self.token)
            .finish()
    }
}

/// Map of resume token to async lock, shared by clones
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<Mutex<HashMap<ResumeToken, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, token: &ResumeToken) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Drop entries nobody holds or waits on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(token.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive ownership of `token`.
    ///
    /// Returns `None` if `cancel` fires before the lock is obtained.
    pub async fn acquire(
        &self,
        token: &ResumeToken,
        cancel: &CancellationToken,
    ) -> Option<SessionGuard> {
        let lock = self.lock_for(token);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = lock.lock_owned() => Some(SessionGuard {
                token: token.clone(),
                _guard: guard,
            }),
        }
    }

    /// Whether an invocation currently owns `token`
    pub fn is_locked(&self, token: &ResumeToken) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(token)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}
