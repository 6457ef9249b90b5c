//! Single producer side of a run's event stream.
//!
//! Engines are sloppy: they repeat session announcements, report results for
//! tools they never announced, or keep talking after their final message.
//! [`RunEmitter`] sits between a runner's translator and the channel and
//! keeps the outgoing stream well formed: `Started?, Action*, Completed`.

use std::collections::HashMap;

use serde_json::Map;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::runner::EventStream;
use super::session_lock::{SessionGuard, SessionLocks};
use crate::{
    Action, ActionEvent, ActionKind, ActionPhase, CompletedEvent, EngineId, ResumeToken,
    StartedEvent, TakopiEvent,
};

pub struct RunEmitter {
    engine: EngineId,
    tx: mpsc::Sender<TakopiEvent>,
    locks: SessionLocks,
    cancel: CancellationToken,
    /// Session the caller asked to resume
    expected: Option<ResumeToken>,
    /// Session the engine reported
    found: Option<ResumeToken>,
    guard: Option<SessionGuard>,
    pending: HashMap<String, Action>,
    note_seq: u64,
    completed: bool,
}

impl RunEmitter {
    pub fn new(
        engine: EngineId,
        tx: mpsc::Sender<TakopiEvent>,
        locks: SessionLocks,
        cancel: CancellationToken,
        resume: Option<ResumeToken>,
    ) -> Self {
        Self {
            engine,
            tx,
            locks,
            cancel,
            expected: resume,
            found: None,
            guard: None,
            pending: HashMap::new(),
            note_seq: 0,
            completed: false,
        }
    }

    /// Create an emitter together with the stream it feeds
    pub fn channel(
        engine: EngineId,
        capacity: usize,
        locks: SessionLocks,
        cancel: CancellationToken,
        resume: Option<ResumeToken>,
    ) -> (Self, EventStream) {
        let (tx, stream) = EventStream::channel(capacity);
        (Self::new(engine, tx, locks, cancel, resume), stream)
    }

    pub fn engine(&self) -> &EngineId {
        &self.engine
    }

    /// Best known session: the one reported by the engine, else the one resumed
    pub fn session(&self) -> Option<&ResumeToken> {
        self.found.as_ref().or(self.expected.as_ref())
    }

    pub fn has_started(&self) -> bool {
        self.found.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn pending_actions(&self) -> usize {
        self.pending.len()
    }

    /// Take the lock of the resumed session before the process starts.
    ///
    /// Returns `false` if the run was cancelled while waiting.
    pub async fn lock_resumed_session(&mut self) -> bool {
        let Some(token) = self.expected.clone() else {
            return true;
        };
        match self.locks.acquire(&token, &self.cancel).await {
            Some(guard) => {
                self.guard = Some(guard);
                true
            }
            None => false,
        }
    }

    pub async fn emit(&mut self, event: TakopiEvent) {
        if self.completed {
            tracing::debug!(engine = %self.engine, "dropping event after completion: {:?}", event);
            return;
        }
        match event {
            TakopiEvent::Started(started) => self.on_started(started).await,
            TakopiEvent::Action(action) => self.on_action(action).await,
            TakopiEvent::Completed(completed) => self.on_completed(completed).await,
        }
    }

    pub async fn emit_all(&mut self, events: impl IntoIterator<Item = TakopiEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }

    async fn on_started(&mut self, started: StartedEvent) {
        if started.resume.engine != self.engine {
            let detail = detail_with("engine", started.resume.engine.to_string());
            self.note(
                format!("{} reported a session for another engine; ignoring", self.engine),
                detail,
            )
            .await;
            return;
        }

        if let Some(found) = &self.found {
            if *found != started.resume {
                let detail = detail_with("session", started.resume.value.clone());
                self.note(
                    format!("{} reported a second session id; ignoring", self.engine),
                    detail,
                )
                .await;
            }
            return;
        }

        if let Some(expected) = &self.expected {
            if *expected != started.resume {
                let mut detail = detail_with("expected", expected.value.clone());
                detail.insert("reported".into(), started.resume.value.clone().into());
                self.note(
                    format!("{} reported a different session id than expected", self.engine),
                    detail,
                )
                .await;
            }
        }

        if self.guard.is_none() {
            // New session: serialize against anyone resuming it from now on
            match self.locks.acquire(&started.resume, &self.cancel).await {
                Some(guard) => self.guard = Some(guard),
                None => return,
            }
        }

        tracing::debug!(engine = %self.engine, session = %started.resume.value, "session started");
        self.found = Some(started.resume.clone());
        self.send(TakopiEvent::Started(started)).await;
    }

    async fn on_action(&mut self, event: ActionEvent) {
        match event.phase {
            ActionPhase::Started | ActionPhase::Updated => {
                self.pending
                    .insert(event.action.id.clone(), event.action.clone());
            }
            ActionPhase::Completed => {
                let known = self.pending.remove(&event.action.id).is_some();
                if !known && event.action.kind != ActionKind::Warning {
                    tracing::debug!(
                        engine = %self.engine,
                        action = %event.action.id,
                        "completion for unannounced action"
                    );
                    let synthesized =
                        ActionEvent::started(self.engine.clone(), event.action.clone());
                    self.send(TakopiEvent::Action(synthesized)).await;
                }
            }
        }
        self.send(TakopiEvent::Action(event)).await;
    }

    async fn on_completed(&mut self, mut completed: CompletedEvent) {
        if completed.resume.is_none() {
            completed.resume = self.session().cloned();
        }
        if !self.pending.is_empty() {
            tracing::debug!(
                engine = %self.engine,
                "discarding {} pending action(s) at completion",
                self.pending.len()
            );
            self.pending.clear();
        }
        self.completed = true;
        tracing::info!(
            engine = %self.engine,
            ok = completed.ok,
            resume = ?completed.resume.as_ref().map(|t| t.value.as_str()),
            "run completed"
        );
        self.send(TakopiEvent::Completed(completed)).await;
    }

    /// Emit a standalone warning entry
    pub async fn note(
        &mut self,
        message: impl Into<String>,
        detail: Map<String, serde_json::Value>,
    ) {
        self.note_seq += 1;
        let id = format!("{}.note.{}", self.engine, self.note_seq);
        let event = ActionEvent::note(self.engine.clone(), id, message, false, detail);
        self.send(TakopiEvent::Action(event)).await;
    }

    /// Close the run with a failure unless it already completed
    pub async fn finish(&mut self, error: &str, answer: impl Into<String>) {
        if self.completed {
            return;
        }
        let resume = self.session().cloned();
        let completed = CompletedEvent::failure(self.engine.clone(), error, answer, resume);
        self.on_completed(completed).await;
    }

    async fn send(&self, event: TakopiEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!(engine = %self.engine, "event consumer went away");
        }
    }
}

fn detail_with(key: &str, value: impl Into<serde_json::Value>) -> Map<String, serde_json::Value> {
    let mut detail = Map::new();
    detail.insert(key.to_string(), value.into());
    detail
}
