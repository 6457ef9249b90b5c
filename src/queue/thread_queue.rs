use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::SessionKey;

/// Work admitted under a session key; runs once its slot is free
pub type RunJob = Box<dyn FnOnce(RunContext) -> BoxFuture<'static, ()> + Send>;

/// Handed to a job when it starts
#[derive(Debug, Clone)]
pub struct RunContext {
    pub key: SessionKey,
    pub run_id: Uuid,
    /// Tripped by [`ThreadQueue::cancel`]
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The key was idle; the job is running
    Started { run_id: Uuid },
    /// The key is busy; `position` is 1 for the next job to run
    Queued { run_id: Uuid, position: usize },
}

impl Admission {
    pub fn run_id(&self) -> Uuid {
        match self {
            Admission::Started { run_id } | Admission::Queued { run_id, .. } => *run_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The running job's token was tripped
    Requested,
    /// A cancel was already requested for the running job
    AlreadyCancelling,
    /// Nothing runs under this key
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Cancelling,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("{key} already has {max} pending request(s)")]
    Full { key: SessionKey, max: usize },
}

/// Snapshot of one running job
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRun {
    pub key: SessionKey,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub cancelling: bool,
    pub pending: usize,
}

struct Active {
    run_id: Uuid,
    cancel: CancellationToken,
    cancelling: bool,
    started_at: DateTime<Utc>,
}

impl Active {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            cancel: CancellationToken::new(),
            cancelling: false,
            started_at: Utc::now(),
        }
    }
}

struct Pending {
    run_id: Uuid,
    job: RunJob,
}

/// A key with no active job has no slot
struct Slot {
    active: Active,
    pending: VecDeque<Pending>,
}

struct Inner {
    slots: Mutex<HashMap<SessionKey, Slot>>,
    max_pending: Option<usize>,
}

/// Per-session serialization of runs.
///
/// At most one job runs per [`SessionKey`]; later submissions for the same
/// key wait in FIFO order and start as soon as the running one ends. Jobs
/// under different keys run concurrently. Cheap to clone.
#[derive(Clone)]
pub struct ThreadQueue {
    inner: Arc<Inner>,
}

impl Default for ThreadQueue {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ThreadQueue {
    /// `max_pending` bounds the waiting jobs per key
    pub fn new(max_pending: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                max_pending,
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<SessionKey, Slot>> {
        // Poisoning only means another thread panicked mid-update; the map stays usable
        self.inner.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `job` now if `key` is idle, otherwise queue it behind the key's
    /// current work.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, key: SessionKey, job: RunJob) -> Result<Admission, QueueError> {
        let run_id = Uuid::new_v4();
        let cancel = {
            let mut slots = self.slots();
            if let Some(slot) = slots.get_mut(&key) {
                if let Some(max) = self.inner.max_pending {
                    if slot.pending.len() >= max {
                        tracing::debug!(key = %key, "queue full");
                        return Err(QueueError::Full { key, max });
                    }
                }
                slot.pending.push_back(Pending { run_id, job });
                let position = slot.pending.len();
                tracing::debug!(key = %key, %run_id, position, "queued");
                return Ok(Admission::Queued { run_id, position });
            }
            let active = Active::new(run_id);
            let cancel = active.cancel.clone();
            slots.insert(
                key.clone(),
                Slot {
                    active,
                    pending: VecDeque::new(),
                },
            );
            cancel
        };
        self.start(key, run_id, cancel, job);
        Ok(Admission::Started { run_id })
    }

    fn start(&self, key: SessionKey, run_id: Uuid, cancel: CancellationToken, job: RunJob) {
        tracing::debug!(key = %key, %run_id, "starting");
        let guard = SlotGuard {
            queue: self.clone(),
            key: key.clone(),
            run_id,
        };
        let context = RunContext {
            key,
            run_id,
            cancel,
        };
        tokio::spawn(async move {
            // Released on every exit, including a panicking job
            let _guard = guard;
            job(context).await;
        });
    }

    fn release(&self, key: &SessionKey, run_id: Uuid) {
        let next = {
            let mut slots = self.slots();
            let Some(slot) = slots.get_mut(key) else {
                tracing::warn!(key = %key, %run_id, "released a key that is not running");
                return;
            };
            if slot.active.run_id != run_id {
                tracing::warn!(key = %key, %run_id, "released a run that is not active");
                return;
            }
            match slot.pending.pop_front() {
                Some(next) => {
                    slot.active = Active::new(next.run_id);
                    Some((next, slot.active.cancel.clone()))
                }
                None => {
                    slots.remove(key);
                    None
                }
            }
        };
        tracing::debug!(key = %key, %run_id, "released");

        let Some((next, cancel)) = next else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(key = %key, "runtime is gone; dropping queued run {}", next.run_id);
            self.slots().remove(key);
            return;
        }
        self.start(key.clone(), next.run_id, cancel, next.job);
    }

    /// Request cancellation of the job running under `key`.
    ///
    /// Queued jobs are not affected and start once the cancelled one ends.
    pub fn cancel(&self, key: &SessionKey) -> CancelOutcome {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(key) else {
            return CancelOutcome::NotRunning;
        };
        if slot.active.cancelling {
            return CancelOutcome::AlreadyCancelling;
        }
        slot.active.cancelling = true;
        slot.active.cancel.cancel();
        tracing::info!(key = %key, run_id = %slot.active.run_id, "cancel requested");
        CancelOutcome::Requested
    }

    pub fn state(&self, key: &SessionKey) -> SessionState {
        match self.slots().get(key) {
            None => SessionState::Idle,
            Some(slot) if slot.active.cancelling => SessionState::Cancelling,
            Some(_) => SessionState::Running,
        }
    }

    /// Number of jobs waiting behind the running one
    pub fn pending(&self, key: &SessionKey) -> usize {
        self.slots().get(key).map(|s| s.pending.len()).unwrap_or(0)
    }

    /// Running jobs, oldest first
    pub fn active(&self) -> Vec<ActiveRun> {
        let mut runs = self
            .slots()
            .iter()
            .map(|(key, slot)| ActiveRun {
                key: key.clone(),
                run_id: slot.active.run_id,
                started_at: slot.active.started_at,
                cancelling: slot.active.cancelling,
                pending: slot.pending.len(),
            })
            .collect::<Vec<_>>();
        runs.sort_by_key(|run| run.started_at);
        runs
    }

    pub fn is_idle(&self) -> bool {
        self.slots().is_empty()
    }
}

/// Frees the key's slot when the job's task ends
struct SlotGuard {
    queue: ThreadQueue,
    key: SessionKey,
    run_id: Uuid,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::warn!(key = %self.key, run_id = %self.run_id, "run panicked");
        }
        self.queue.release(&self.key, self.run_id);
    }
}
