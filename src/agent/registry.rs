//! Engine registry.
//!
//! The registry is the closed set of runners the process can dispatch to,
//! keyed by [`EngineId`]. It is built once at startup, either from the
//! configuration ([`EngineRegistry::from_config`]) or by registering runners
//! explicitly, and is read-only afterwards. Share it as `Arc<EngineRegistry>`.
//!
//! Besides lookup it answers the one question that needs every runner at
//! once: which engine (if any) does a resume line in some text belong to.
//!
//! # Usage
//!
//! ```rust,ignore
//! let registry = EngineRegistry::from_config(&config)?;
//! let runner = registry.resolve("codex")?;
//! let token = registry.find_resume("`codex resume 0199a`")?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use super::claude::ClaudeRunner;
use super::codex::CodexRunner;
use super::pi::PiRunner;
use super::resume::ResumeError;
use super::runner::{Runner, SetupIssue};
use crate::config::Config;
use crate::{EngineId, ResumeToken};

/// Why a request could not be mapped to a runner
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown engine {0:?}")]
    UnknownEngine(String),
    #[error("no engines are enabled")]
    NoEngines,
    #[error("message refers to more than one session; reply to a single resume line")]
    AmbiguousResume,
    #[error("resume line is for {token}, but {requested} was requested")]
    EngineMismatch { requested: String, token: String },
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error(transparent)]
    Resume(#[from] ResumeError),
}

/// Closed map of engine id to runner
pub struct EngineRegistry {
    runners: BTreeMap<EngineId, Arc<dyn Runner>>,
    default: EngineId,
}

impl EngineRegistry {
    /// Empty registry whose default engine is `default`.
    ///
    /// The default must be registered before the registry is used.
    pub fn new(default: impl Into<EngineId>) -> Self {
        Self {
            runners: BTreeMap::new(),
            default: default.into(),
        }
    }

    /// Register the built-in runners enabled in `config`
    pub fn from_config(config: &Config) -> Result<Self, ResolveError> {
        let limits = config.queue.run_limits();
        let mut registry = Self::new(config.default_engine.as_str());
        if config.codex.enabled {
            registry.register(Arc::new(CodexRunner::new(&config.codex, limits)));
        }
        if config.claude.enabled {
            registry.register(Arc::new(ClaudeRunner::new(&config.claude, limits)));
        }
        if config.pi.enabled {
            registry.register(Arc::new(PiRunner::new(&config.pi, limits)));
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Add (or replace) the runner for its engine
    pub fn register(&mut self, runner: Arc<dyn Runner>) {
        let id = runner.engine().clone();
        if self.runners.insert(id.clone(), runner).is_some() {
            tracing::warn!(engine = %id, "replacing registered runner");
        }
    }

    /// Check that the default engine is registered
    pub fn validate(&self) -> Result<(), ResolveError> {
        if self.runners.is_empty() {
            return Err(ResolveError::NoEngines);
        }
        if !self.runners.contains_key(&self.default) {
            return Err(ResolveError::UnknownEngine(self.default.to_string()));
        }
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Runner>, ResolveError> {
        self.runners
            .get(&EngineId::new(id))
            .cloned()
            .ok_or_else(|| ResolveError::UnknownEngine(id.to_string()))
    }

    pub fn default_engine(&self) -> &EngineId {
        &self.default
    }

    pub fn default_runner(&self) -> Result<Arc<dyn Runner>, ResolveError> {
        self.resolve(self.default.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.runners.contains_key(&EngineId::new(id))
    }

    /// Registered engine ids, sorted
    pub fn ids(&self) -> Vec<EngineId> {
        self.runners.keys().cloned().collect()
    }

    /// Registered runners in id order
    pub fn runners(&self) -> impl Iterator<Item = &Arc<dyn Runner>> {
        self.runners.values()
    }

    /// Find the single resume token referenced by `text`.
    ///
    /// `Ok(None)` when no engine recognizes a resume line; an error when the
    /// text refers to more than one session, within or across engines.
    pub fn find_resume(&self, text: &str) -> Result<Option<ResumeToken>, ResolveError> {
        let mut found: Option<ResumeToken> = None;
        for runner in self.runners.values() {
            if !runner.is_resume_line(text) {
                continue;
            }
            let Some(token) = runner.extract_resume(text) else {
                return Err(ResolveError::AmbiguousResume);
            };
            if found.as_ref().is_some_and(|f| *f != token) {
                return Err(ResolveError::AmbiguousResume);
            }
            found = Some(token);
        }
        Ok(found)
    }

    /// Whether any registered engine recognizes a resume line in `text`
    pub fn is_resume_line(&self, text: &str) -> bool {
        self.runners.values().any(|r| r.is_resume_line(text))
    }

    /// Render `token` with its own engine's resume syntax
    pub fn format_resume(&self, token: &ResumeToken) -> Result<String, ResolveError> {
        let runner = self.resolve(token.engine.as_str())?;
        Ok(runner.format_resume(token)?)
    }

    /// Setup problems of every registered engine
    pub fn check_setup(&self) -> Vec<(EngineId, Vec<SetupIssue>)> {
        self.runners
            .iter()
            .map(|(id, runner)| (id.clone(), runner.check_setup()))
            .collect()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.ids())
            .field("default", &self.default)
            .finish()
    }
}
