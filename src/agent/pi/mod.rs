//! Pi coding agent runner
//!
//! Runs `pi --print --mode json --session <file> <prompt>`. Pi identifies a
//! session by its JSONL file, so the runner picks the file of a new session
//! itself and that path is the resume token.

mod translate;

pub use translate::PiTranslator;

use std::path::PathBuf;

use chrono::Utc;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::emitter::RunEmitter;
use super::process::{self, Invocation};
use super::resume::ResumeFormat;
use super::runner::{EventStream, RunLimits, RunRequest, Runner, SetupIssue, binary_available};
use super::session_lock::SessionLocks;
use crate::config::EngineConfig;
use crate::{EngineId, ResumeToken};

pub(crate) const ENGINE: &str = "pi";

static RESUME: Lazy<ResumeFormat> = Lazy::new(|| ResumeFormat::quoted(ENGINE, "--session", &[]));

/// Pi coding agent CLI runner
#[derive(Clone)]
pub struct PiRunner {
    engine: EngineId,
    binary: String,
    extra_args: Vec<String>,
    model: Option<String>,
    provider: Option<String>,
    title: String,
    session_dir: PathBuf,
    env: Vec<(String, String)>,
    limits: RunLimits,
    locks: SessionLocks,
}

/// `~/.pi/agent/sessions/takopi`, next to the sessions pi creates itself
fn default_session_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".pi")
        .join("agent")
        .join("sessions")
        .join("takopi")
}

impl PiRunner {
    /// Build a runner from its `[pi]` table
    pub fn new(config: &EngineConfig, limits: RunLimits) -> Self {
        let mut env = config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>();
        env.sort();

        Self {
            engine: EngineId::new(ENGINE),
            binary: config.binary(ENGINE).to_string(),
            extra_args: config.extra_args.clone().unwrap_or_default(),
            model: config.model.clone(),
            provider: config.provider.clone(),
            title: config.title.clone().unwrap_or_else(|| ENGINE.to_string()),
            session_dir: config.session_dir.clone().unwrap_or_else(default_session_dir),
            env,
            limits,
            locks: SessionLocks::new(),
        }
    }

    /// Fresh session file: `<session_dir>/<timestamp>_<uuid>.jsonl`
    pub fn new_session(&self) -> ResumeToken {
        let name = format!(
            "{}_{}.jsonl",
            Utc::now().format("%Y-%m-%dT%H-%M-%S"),
            Uuid::new_v4()
        );
        let path = self.session_dir.join(name);
        ResumeToken::new(self.engine.clone(), path.display().to_string())
    }

    pub fn build_args(&self, request: &RunRequest, session: &ResumeToken) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--mode".to_string(),
            "json".to_string(),
        ];

        if let Some(provider) = &self.provider {
            args.push("--provider".to_string());
            args.push(provider.clone());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        args.push("--session".to_string());
        args.push(session.value.clone());
        args.extend(self.extra_args.iter().cloned());

        // A leading dash would be parsed as a flag
        if request.prompt.starts_with('-') {
            args.push(format!(" {}", request.prompt));
        } else {
            args.push(request.prompt.clone());
        }
        args
    }

    fn meta(&self) -> Option<Value> {
        let mut meta = Map::new();
        if let Some(model) = &self.model {
            meta.insert("model".into(), model.clone().into());
        }
        if let Some(provider) = &self.provider {
            meta.insert("provider".into(), provider.clone().into());
        }
        (!meta.is_empty()).then_some(Value::Object(meta))
    }

    fn invocation(&self, request: &RunRequest, session: &ResumeToken) -> Invocation {
        let mut invocation = Invocation::new(&self.binary);
        invocation.args = self.build_args(request, session);
        invocation.env = self.env.iter().cloned().collect();
        invocation
    }
}

impl Runner for PiRunner {
    fn engine(&self) -> &EngineId {
        &self.engine
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn resume_format(&self) -> &ResumeFormat {
        &RESUME
    }

    fn run(&self, request: RunRequest) -> EventStream {
        let session = match &request.resume {
            Some(token) => token.clone(),
            None => {
                if let Err(e) = std::fs::create_dir_all(&self.session_dir) {
                    tracing::warn!(
                        engine = ENGINE,
                        dir = %self.session_dir.display(),
                        "failed to create session directory: {}",
                        e
                    );
                }
                self.new_session()
            }
        };
        tracing::info!(
            engine = ENGINE,
            resume = ?request.resume.as_ref().map(|t| t.value.as_str()),
            session = %session.value,
            "starting run"
        );
        tracing::debug!(engine = ENGINE, "prompt: {}", request.prompt);

        let (emitter, stream) = RunEmitter::channel(
            self.engine.clone(),
            self.limits.event_buffer,
            self.locks.clone(),
            request.cancel.clone(),
            request.resume.clone(),
        );
        let translator = PiTranslator::new(self.title.clone(), session.clone())
            .with_meta(self.meta());
        process::launch(
            self.invocation(&request, &session),
            translator,
            emitter,
            request.cancel,
            self.limits.cancel_grace,
        );
        stream
    }

    fn is_available(&self) -> bool {
        binary_available(&self.binary)
    }

    fn check_setup(&self) -> Vec<SetupIssue> {
        if self.is_available() {
            return Vec::new();
        }
        vec![SetupIssue::new(
            "Install the pi coding agent",
            &["   $ npm install -g @mariozechner/pi-coding-agent"],
        )]
    }
}
