//! Run command implementation (console chat sink)

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;

use takopi::agent::EngineRegistry;
use takopi::config::Config;
use takopi::orchestrator::{ChatSink, Finalized, InboundMessage, Orchestrator, OrchestratorSettings};
use takopi::{ActionEvent, ActionKind, ActionPhase, SessionKey, StartedEvent};

/// Prints run progress to stdout and reports the outcome once
struct ConsoleSink {
    done: Mutex<Option<oneshot::Sender<bool>>>,
}

impl ConsoleSink {
    fn new() -> (Arc<Self>, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let sink = Arc::new(Self {
            done: Mutex::new(Some(tx)),
        });
        (sink, rx)
    }

    fn report(&self, ok: bool) {
        let sender = self.done.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(sender) = sender {
            let _ = sender.send(ok);
        }
    }
}

#[async_trait]
impl ChatSink for ConsoleSink {
    async fn queued(&self, key: &SessionKey, position: usize) {
        println!("queued behind {} run(s) on {}", position, key);
    }

    async fn started(&self, _key: &SessionKey, event: &StartedEvent) {
        println!("{} started (session {})", event.title, event.resume.value);
    }

    async fn action(&self, _key: &SessionKey, event: &ActionEvent) {
        let action = &event.action;
        if action.kind == ActionKind::Warning {
            println!("  ! {}", event.message.as_deref().unwrap_or(&action.title));
            return;
        }
        let marker = match (event.phase, event.ok) {
            (ActionPhase::Started, _) => "..",
            (ActionPhase::Updated, _) => "~ ",
            (ActionPhase::Completed, Some(false)) => "x ",
            (ActionPhase::Completed, _) => "ok",
        };
        println!("  {} {}: {}", marker, action.kind, action.title);
    }

    async fn finished(&self, _key: &SessionKey, result: Finalized) {
        println!("\n{}", result.message());
        self.report(result.completed.ok);
    }

    async fn incomplete(&self, key: &SessionKey) {
        eprintln!("run on {} ended without a result", key);
        self.report(false);
    }
}

/// Run one prompt through the orchestrator. Returns whether the run succeeded.
pub async fn run_command(
    config: &Config,
    engine: Option<String>,
    resume: Option<String>,
    thread: String,
    prompt: String,
) -> Result<bool> {
    let registry = Arc::new(EngineRegistry::from_config(config)?);
    let orchestrator = Orchestrator::new(registry, OrchestratorSettings::from_config(config));

    let mut message = InboundMessage::new(thread.as_str(), prompt);
    if let Some(engine) = engine {
        message = message.with_engine(engine.as_str());
    }
    if let Some(resume) = resume {
        message = message.reply_to(resume);
    }

    let (sink, mut done) = ConsoleSink::new();
    let submitted = orchestrator.submit(message, sink).await?;
    tracing::debug!(key = %submitted.key, engine = %submitted.engine, "submitted");

    tokio::select! {
        ok = &mut done => return Ok(ok.unwrap_or(false)),
        _ = tokio::signal::ctrl_c() => {
            eprintln!("cancelling...");
            orchestrator.cancel_key(&submitted.key);
        }
    }
    Ok(done.await.unwrap_or(false))
}
