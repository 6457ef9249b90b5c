//! Codex CLI runner

mod translate;

pub use translate::CodexTranslator;

use once_cell::sync::Lazy;

use super::emitter::RunEmitter;
use super::process::{self, Invocation};
use super::resume::ResumeFormat;
use super::runner::{EventStream, RunLimits, RunRequest, Runner, SetupIssue, binary_available};
use super::session_lock::SessionLocks;
use crate::EngineId;
use crate::config::EngineConfig;

pub(crate) const ENGINE: &str = "codex";

static RESUME: Lazy<ResumeFormat> = Lazy::new(|| ResumeFormat::new(ENGINE, "resume", &[]));

/// Codex CLI runner
///
/// Codex uses `codex exec --json -` for non-interactive mode, reading the
/// prompt from stdin to avoid command line length limits. Resumed runs use
/// `codex exec --json resume <thread_id> -`.
#[derive(Clone)]
pub struct CodexRunner {
    engine: EngineId,
    binary: String,
    extra_args: Vec<String>,
    model: Option<String>,
    title: String,
    env: Vec<(String, String)>,
    limits: RunLimits,
    locks: SessionLocks,
}

impl CodexRunner {
    /// Build a runner from its `[codex]` table
    pub fn new(config: &EngineConfig, limits: RunLimits) -> Self {
        // Keep codex from running its own desktop notifications by default
        let mut extra_args = config
            .extra_args
            .clone()
            .unwrap_or_else(|| vec!["-c".to_string(), "notify=[]".to_string()]);
        let mut title = config.title.clone().unwrap_or_else(|| "Codex".to_string());
        if let Some(profile) = &config.profile {
            extra_args.push("--profile".to_string());
            extra_args.push(profile.clone());
            if config.title.is_none() {
                title = profile.clone();
            }
        }

        let mut env = config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>();
        env.sort();

        Self {
            engine: EngineId::new(ENGINE),
            binary: config.binary(ENGINE).to_string(),
            extra_args,
            model: config.model.clone(),
            title,
            env,
            limits,
            locks: SessionLocks::new(),
        }
    }

    pub fn build_args(&self, request: &RunRequest) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.push("exec".to_string());
        args.push("--json".to_string());

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if let Some(resume) = &request.resume {
            args.push("resume".to_string());
            args.push(resume.value.clone());
        }

        args.push("-".to_string());
        args
    }

    fn invocation(&self, request: &RunRequest) -> Invocation {
        let mut invocation = Invocation::new(&self.binary);
        invocation.args = self.build_args(request);
        invocation.stdin = Some(request.prompt.clone());
        invocation.env = self.env.iter().cloned().collect();
        invocation
    }
}

impl Runner for CodexRunner {
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
        tracing::info!(
            engine = ENGINE,
            resume = ?request.resume.as_ref().map(|t| t.value.as_str()),
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
        process::launch(
            self.invocation(&request),
            CodexTranslator::new(self.title.clone()),
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
            "Install the Codex CLI",
            &["   $ npm install -g @openai/codex", "   $ brew install codex"],
        )]
    }
}
