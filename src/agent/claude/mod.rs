//! Claude Code runner
//!
//! Runs `claude -p --output-format stream-json --verbose` and translates the
//! stream-json events. The prompt goes on the command line after `--`.

mod output;
mod tool_format;
mod translate;

pub use output::StreamEvent;
pub use translate::ClaudeTranslator;

use once_cell::sync::Lazy;

use super::emitter::RunEmitter;
use super::process::{self, Invocation};
use super::resume::ResumeFormat;
use super::runner::{EventStream, RunLimits, RunRequest, Runner, SetupIssue, binary_available};
use super::session_lock::SessionLocks;
use crate::EngineId;
use crate::config::EngineConfig;

pub(crate) const ENGINE: &str = "claude";

/// Removed from the subprocess environment unless API billing is enabled
const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

static RESUME: Lazy<ResumeFormat> =
    Lazy::new(|| ResumeFormat::new(ENGINE, "--resume", &["-r"]));

/// Claude Code CLI runner
#[derive(Clone)]
pub struct ClaudeRunner {
    engine: EngineId,
    binary: String,
    model: Option<String>,
    allowed_tools: Vec<String>,
    extra_args: Vec<String>,
    dangerously_skip_permissions: bool,
    use_api_billing: bool,
    title: String,
    env: Vec<(String, String)>,
    limits: RunLimits,
    locks: SessionLocks,
}

impl ClaudeRunner {
    /// Build a runner from its `[claude]` table
    pub fn new(config: &EngineConfig, limits: RunLimits) -> Self {
        let title = config
            .title
            .clone()
            .or_else(|| config.model.clone())
            .unwrap_or_else(|| ENGINE.to_string());
        let mut env = config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>();
        env.sort();

        Self {
            engine: EngineId::new(ENGINE),
            binary: config.binary(ENGINE).to_string(),
            model: config.model.clone(),
            allowed_tools: config.allowed_tools.clone(),
            extra_args: config.extra_args.clone().unwrap_or_default(),
            dangerously_skip_permissions: config.dangerously_skip_permissions,
            use_api_billing: config.use_api_billing,
            title,
            env,
            limits,
            locks: SessionLocks::new(),
        }
    }

    pub fn build_args(&self, request: &RunRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];

        if let Some(resume) = &request.resume {
            args.push("--resume".to_string());
            args.push(resume.value.clone());
        }

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        let allowed = self
            .allowed_tools
            .iter()
            .filter(|t| !t.is_empty())
            .cloned()
            .collect::<Vec<_>>();
        if !allowed.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(allowed.join(","));
        }

        if self.dangerously_skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }

        args.extend(self.extra_args.iter().cloned());

        // Prompts starting with '-' must not be parsed as flags
        args.push("--".to_string());
        args.push(request.prompt.clone());
        args
    }

    fn invocation(&self, request: &RunRequest) -> Invocation {
        let mut invocation = Invocation::new(&self.binary);
        invocation.args = self.build_args(request);
        invocation.env = self.env.iter().cloned().collect();
        if !self.use_api_billing {
            invocation.env_remove.push(API_KEY_VAR.to_string());
            invocation.env.remove(API_KEY_VAR);
        }
        invocation
    }
}

impl Runner for ClaudeRunner {
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
            ClaudeTranslator::new(self.title.clone()),
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
            "Install the Claude Code CLI",
            &["   $ npm install -g @anthropic-ai/claude-code"],
        )]
    }
}
