//! Request orchestration.
//!
//! The [`Orchestrator`] turns an inbound chat message into a run: it picks
//! the engine, finds the session to resume, serializes the run on the
//! [`ThreadQueue`] under its [`SessionKey`] and forwards the run's events to
//! a [`ChatSink`] in order.

mod sink;

pub use sink::{ChatSink, DeliveryMode, Finalized};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::agent::{EngineRegistry, ResolveError, RunRequest, Runner};
use crate::config::Config;
use crate::queue::{Admission, CancelOutcome, QueueError, RunContext, ThreadQueue};
use crate::{EngineId, ResumeToken, SessionKey, SessionRef, TakopiEvent, ThreadId};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A message from the chat adapter
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub thread: ThreadId,
    pub text: String,
    /// Text of the message this one replies to
    pub reply_to: Option<String>,
    /// Engine chosen by the adapter, e.g. from a per-chat setting
    pub engine: Option<EngineId>,
}

impl InboundMessage {
    pub fn new(thread: impl Into<ThreadId>, text: impl Into<String>) -> Self {
        Self {
            thread: thread.into(),
            text: text.into(),
            reply_to: None,
            engine: None,
        }
    }

    pub fn reply_to(mut self, text: impl Into<String>) -> Self {
        self.reply_to = Some(text.into());
        self
    }

    pub fn with_engine(mut self, engine: impl Into<EngineId>) -> Self {
        self.engine = Some(engine.into());
        self
    }
}

/// Everything needed to run one request
#[derive(Clone)]
pub struct ResolvedRun {
    pub runner: Arc<dyn Runner>,
    pub prompt: String,
    pub resume: Option<ResumeToken>,
    pub key: SessionKey,
}

impl ResolvedRun {
    pub fn engine(&self) -> &EngineId {
        self.runner.engine()
    }
}

impl std::fmt::Debug for ResolvedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedRun")
            .field("engine", self.engine())
            .field("prompt", &self.prompt)
            .field("resume", &self.resume)
            .field("key", &self.key)
            .finish()
    }
}

/// Accepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub key: SessionKey,
    pub engine: EngineId,
    pub admission: Admission,
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    /// Cancel a run that produced no event for this long
    pub idle_timeout: Option<Duration>,
    pub delivery: DeliveryMode,
    /// Bound on requests waiting per session
    pub max_pending: Option<usize>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            idle_timeout: config.queue.idle_timeout(),
            delivery: DeliveryMode::from_notify(config.delivery.notify),
            max_pending: config.queue.max_pending,
        }
    }
}

/// Keys of fresh sessions, indexed by the token the engine reported for them
type Aliases = Arc<Mutex<HashMap<SessionKey, SessionKey>>>;

pub struct Orchestrator {
    registry: Arc<EngineRegistry>,
    queue: ThreadQueue,
    settings: OrchestratorSettings,
    aliases: Aliases,
}

impl Orchestrator {
    pub fn new(registry: Arc<EngineRegistry>, settings: OrchestratorSettings) -> Self {
        Self {
            queue: ThreadQueue::new(settings.max_pending),
            registry,
            settings,
            aliases: Arc::default(),
        }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &ThreadQueue {
        &self.queue
    }

    /// Pick engine, resume token and prompt for `message`.
    ///
    /// A resume line in the message wins over one in the replied-to message.
    /// The token's engine wins over an explicit engine choice, which wins
    /// over the default; an explicit choice that contradicts the token is an
    /// error.
    pub fn resolve(&self, message: &InboundMessage) -> Result<ResolvedRun, ResolveError> {
        let (directive, text) = split_directive(&message.text, &self.registry);
        let explicit = directive.or_else(|| message.engine.clone());

        let resume = match self.registry.find_resume(text)? {
            Some(token) => Some(token),
            None => match &message.reply_to {
                Some(reply) => self.registry.find_resume(reply)?,
                None => None,
            },
        };

        let engine = match (&resume, &explicit) {
            (Some(token), Some(requested)) if token.engine != *requested => {
                return Err(ResolveError::EngineMismatch {
                    requested: requested.to_string(),
                    token: token.engine.to_string(),
                });
            }
            (Some(token), _) => token.engine.clone(),
            (None, Some(requested)) => requested.clone(),
            (None, None) => self.registry.default_engine().clone(),
        };
        let runner = self.registry.resolve(engine.as_str())?;

        let prompt = strip_resume_lines(text, &self.registry);
        if prompt.is_empty() {
            return Err(ResolveError::EmptyPrompt);
        }

        Ok(ResolvedRun {
            runner,
            prompt,
            key: SessionKey::new(message.thread.clone(), resume.clone()),
            resume,
        })
    }

    /// Resolve `message` and queue its run under its session key
    pub async fn submit(
        &self,
        message: InboundMessage,
        sink: Arc<dyn ChatSink>,
    ) -> Result<Submitted, OrchestratorError> {
        let run = self.resolve(&message)?;
        let key = run.key.clone();
        let engine = run.engine().clone();

        // Held back until the queued notice is out, so `queued` always precedes `started`
        let (announced, admitted) = oneshot::channel();
        let forward = Forward {
            run,
            admitted,
            sink: sink.clone(),
            registry: self.registry.clone(),
            queue: self.queue.clone(),
            aliases: self.aliases.clone(),
            idle_timeout: self.settings.idle_timeout,
            delivery: self.settings.delivery,
        };
        let job = Box::new(move |ctx: RunContext| forward.run(ctx).boxed());
        let admission = self.queue.submit(key.clone(), job)?;

        match admission {
            Admission::Started { run_id } => {
                tracing::info!(key = %key, engine = %engine, %run_id, "run admitted");
            }
            Admission::Queued { run_id, position } => {
                tracing::info!(key = %key, engine = %engine, %run_id, position, "run queued");
                sink.queued(&key, position).await;
            }
        }
        let _ = announced.send(());
        Ok(Submitted {
            key,
            engine,
            admission,
        })
    }

    /// Cancel the run a user points at by replying to one of its messages.
    ///
    /// Without a resume line in `reply_to` this targets the thread's fresh
    /// session.
    pub fn cancel(&self, thread: &ThreadId, reply_to: Option<&str>) -> CancelOutcome {
        let resume = reply_to.and_then(|text| match self.registry.find_resume(text) {
            Ok(token) => token,
            Err(e) => {
                tracing::debug!("cancel target unclear: {}", e);
                None
            }
        });
        self.cancel_key(&SessionKey::new(thread.clone(), resume))
    }

    /// Cancel the run behind `key`.
    ///
    /// A fresh run that reported the token in `key` owns that session, so it
    /// is targeted before any follow-up already queued under the token.
    pub fn cancel_key(&self, key: &SessionKey) -> CancelOutcome {
        let owner = lock_aliases(&self.aliases).get(key).cloned();
        if let Some(owner) = owner {
            match self.queue.cancel(&owner) {
                CancelOutcome::NotRunning => {}
                outcome => return outcome,
            }
        }
        self.queue.cancel(key)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish()
    }
}

fn lock_aliases(
    aliases: &Aliases,
) -> std::sync::MutexGuard<'_, HashMap<SessionKey, SessionKey>> {
    aliases.lock().unwrap_or_else(|e| e.into_inner())
}

/// Split a leading `/engine` directive (optionally `/engine@bot`) off `text`
fn split_directive<'a>(text: &'a str, registry: &EngineRegistry) -> (Option<EngineId>, &'a str) {
    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return (None, text);
    };
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let command = &rest[..end];
    let name = command.split('@').next().unwrap_or(command);
    if registry.contains(name) {
        (Some(EngineId::new(name)), rest[end..].trim_start())
    } else {
        (None, text)
    }
}

fn strip_resume_lines(text: &str, registry: &EngineRegistry) -> String {
    text.lines()
        .filter(|line| !registry.is_resume_line(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// One run's forwarding loop, executed by the queue
struct Forward {
    run: ResolvedRun,
    /// Fires once the submitter has told the sink about the admission
    admitted: oneshot::Receiver<()>,
    sink: Arc<dyn ChatSink>,
    registry: Arc<EngineRegistry>,
    queue: ThreadQueue,
    aliases: Aliases,
    idle_timeout: Option<Duration>,
    delivery: DeliveryMode,
}

impl Forward {
    async fn run(mut self, ctx: RunContext) {
        // A dropped sender only means the submitter went away
        let _ = (&mut self.admitted).await;
        let key = ctx.key.clone();
        let request = RunRequest::new(self.run.prompt.clone(), self.run.resume.clone())
            .with_cancel(ctx.cancel.clone());
        let mut stream = self.run.runner.run(request);
        let mut alias = None;
        let mut completed = None;

        loop {
            let next = match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.next_event()).await {
                    Ok(next) => next,
                    Err(_) => {
                        if !ctx.cancel.is_cancelled() {
                            tracing::warn!(key = %key, "no events for {:?}; cancelling", limit);
                            self.queue.cancel(&key);
                        }
                        continue;
                    }
                },
                None => stream.next_event().await,
            };
            let Some(event) = next else {
                break;
            };
            match event {
                TakopiEvent::Started(started) => {
                    if key.session == SessionRef::New {
                        let token = Some(started.resume.clone());
                        let resumed = SessionKey::new(key.thread.clone(), token);
                        lock_aliases(&self.aliases).insert(resumed.clone(), key.clone());
                        alias = Some(resumed);
                    }
                    self.sink.started(&key, &started).await;
                }
                TakopiEvent::Action(action) => self.sink.action(&key, &action).await,
                TakopiEvent::Completed(done) => {
                    completed = Some(done);
                    break;
                }
            }
        }

        if let Some(alias) = alias {
            lock_aliases(&self.aliases).remove(&alias);
        }

        match completed {
            Some(completed) => {
                let resume_line = completed.resume.as_ref().and_then(|token| {
                    self.registry
                        .format_resume(token)
                        .map_err(|e| tracing::warn!(key = %key, "cannot format resume line: {}", e))
                        .ok()
                });
                let result = Finalized {
                    completed,
                    resume_line,
                    delivery: self.delivery,
                };
                self.sink.finished(&key, result).await;
            }
            None => {
                tracing::warn!(key = %key, "event stream ended without completion");
                self.sink.incomplete(&key).await;
            }
        }
    }
}
