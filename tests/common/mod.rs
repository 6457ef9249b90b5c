//! Shared test utilities: scripted runners, a recording chat sink and fake
//! engine binaries

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use takopi::agent::{EngineRegistry, EventStream, ResumeFormat, RunRequest, Runner};
use takopi::config::EngineConfig;
use takopi::orchestrator::{ChatSink, Finalized, Orchestrator, OrchestratorSettings};
use takopi::{
    ActionEvent, CANCELLED, CompletedEvent, EngineId, ResumeToken, SessionKey, StartedEvent,
    TakopiEvent,
};

/// Upper bound for any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(5);

/// One step of a scripted run
#[derive(Debug, Clone)]
pub enum Step {
    Emit(TakopiEvent),
    Sleep(Duration),
    /// Block until the run is cancelled, then complete with `cancelled`
    UntilCancelled,
}

pub fn started(engine: &str, session: &str) -> Step {
    let engine = EngineId::new(engine);
    Step::Emit(
        StartedEvent {
            resume: ResumeToken::new(engine.clone(), session),
            engine,
            title: "scripted".to_string(),
            meta: None,
        }
        .into(),
    )
}

pub fn answer(engine: &str, session: &str, text: &str) -> Step {
    let engine = EngineId::new(engine);
    let resume = ResumeToken::new(engine.clone(), session);
    Step::Emit(CompletedEvent::success(engine, text, Some(resume)).into())
}

/// Runner that plays back a fixed script and records what it was asked to do
pub struct ScriptedRunner {
    engine: EngineId,
    format: ResumeFormat,
    steps: Vec<Step>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RunRequest>>>,
}

impl ScriptedRunner {
    pub fn new(engine: &str, flag: &str, steps: Vec<Step>) -> Self {
        Self {
            engine: EngineId::new(engine),
            format: ResumeFormat::new(engine, flag, &[]),
            steps,
            active: Arc::default(),
            max_active: Arc::default(),
            requests: Arc::default(),
        }
    }

    pub fn codex(steps: Vec<Step>) -> Self {
        Self::new("codex", "resume", steps)
    }

    /// Highest number of runs that were live at the same time
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }

    pub fn resumes(&self) -> Vec<Option<ResumeToken>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.resume.clone())
            .collect()
    }
}

impl Runner for ScriptedRunner {
    fn engine(&self) -> &EngineId {
        &self.engine
    }

    fn title(&self) -> &str {
        "scripted"
    }

    fn resume_format(&self) -> &ResumeFormat {
        &self.format
    }

    fn run(&self, request: RunRequest) -> EventStream {
        self.requests.lock().unwrap().push(request.clone());
        let (tx, stream) = EventStream::channel(16);
        let steps = self.steps.clone();
        let engine = self.engine.clone();
        let active = self.active.clone();
        let max_active = self.max_active.clone();

        tokio::spawn(async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            max_active.fetch_max(now, Ordering::SeqCst);
            let mut live = true;
            let mut session = request.resume.clone();

            for step in steps {
                let event = match step {
                    Step::Sleep(duration) => {
                        tokio::time::sleep(duration).await;
                        continue;
                    }
                    Step::Emit(event) => event,
                    Step::UntilCancelled => {
                        request.cancel.cancelled().await;
                        let session = session.clone();
                        CompletedEvent::failure(engine.clone(), CANCELLED, "", session).into()
                    }
                };
                if let TakopiEvent::Started(s) = &event {
                    session = Some(s.resume.clone());
                }
                // Leave the active set before the consumer can see the end of the run
                if event.is_terminal() && live {
                    active.fetch_sub(1, Ordering::SeqCst);
                    live = false;
                }
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            if live {
                active.fetch_sub(1, Ordering::SeqCst);
            }
        });
        stream
    }

    fn is_available(&self) -> bool {
        true
    }
}

pub fn orchestrator_with(runners: Vec<Arc<ScriptedRunner>>) -> Orchestrator {
    orchestrator_with_settings(runners, OrchestratorSettings::default())
}

pub fn orchestrator_with_settings(
    runners: Vec<Arc<ScriptedRunner>>,
    settings: OrchestratorSettings,
) -> Orchestrator {
    let default = runners[0].engine().clone();
    let mut registry = EngineRegistry::new(default);
    for runner in runners {
        registry.register(runner);
    }
    Orchestrator::new(Arc::new(registry), settings)
}

/// What a [`RecordingSink`] saw
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Queued(usize),
    Started(String),
    Action(String),
    Finished(Finalized),
    Incomplete,
}

/// Chat sink that keeps every callback in order
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<(SessionKey, Record)>>,
    /// Simulates a slow chat API on the queued notice
    queued_delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_queued_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            queued_delay: Some(delay),
            ..Self::default()
        })
    }

    fn push(&self, key: &SessionKey, record: Record) {
        self.records.lock().unwrap().push((key.clone(), record));
    }

    pub fn records(&self) -> Vec<(SessionKey, Record)> {
        self.records.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<Finalized> {
        self.records()
            .into_iter()
            .filter_map(|(_, r)| match r {
                Record::Finished(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    /// Count of runs that reached a final callback (finished or incomplete)
    pub fn ended(&self) -> usize {
        self.records()
            .iter()
            .filter(|(_, r)| matches!(r, Record::Finished(_) | Record::Incomplete))
            .count()
    }

    /// Wait until `n` runs ended
    pub async fn wait_ended(&self, n: usize) {
        wait_until(|| self.ended() >= n).await;
    }

    pub async fn wait_started(&self, n: usize) {
        wait_until(|| {
            self.records()
                .iter()
                .filter(|(_, r)| matches!(r, Record::Started(_)))
                .count()
                >= n
        })
        .await;
    }
}

#[async_trait]
impl ChatSink for RecordingSink {
    async fn queued(&self, key: &SessionKey, position: usize) {
        if let Some(delay) = self.queued_delay {
            tokio::time::sleep(delay).await;
        }
        self.push(key, Record::Queued(position));
    }

    async fn started(&self, key: &SessionKey, event: &StartedEvent) {
        self.push(key, Record::Started(event.resume.value.clone()));
    }

    async fn action(&self, key: &SessionKey, event: &ActionEvent) {
        self.push(key, Record::Action(event.action.id.clone()));
    }

    async fn finished(&self, key: &SessionKey, result: Finalized) {
        self.push(key, Record::Finished(result));
    }

    async fn incomplete(&self, key: &SessionKey) {
        self.push(key, Record::Incomplete);
    }
}

/// Poll `condition` until it holds; panics after [`WAIT`]
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Write an executable `/bin/sh` script standing in for an engine CLI
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");
    let mut perms = std::fs::metadata(&path)
        .expect("Failed to stat script")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("Failed to chmod script");
    path
}

/// Engine config pointing at a fake binary
pub fn engine_config(path: &Path) -> EngineConfig {
    EngineConfig {
        path: Some(path.display().to_string()),
        ..EngineConfig::default()
    }
}
