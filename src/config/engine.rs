//! Per-engine configuration

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One `[codex]` / `[claude]` / `[pi]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Disabled engines are not registered at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Binary to run; defaults to the engine id looked up on `PATH`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Model passed with `--model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Pi only: `--provider`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Pi only: where new session files are created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_dir: Option<PathBuf>,

    /// Claude only: `--allowedTools`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,

    /// Extra CLI arguments. `None` keeps the engine's defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_args: Option<Vec<String>>,

    /// Codex only: `--profile`, also used as the run title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Display title of runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Claude only: `--dangerously-skip-permissions`
    #[serde(default)]
    pub dangerously_skip_permissions: bool,

    /// Claude only: keep `ANTHROPIC_API_KEY` in the environment
    #[serde(default)]
    pub use_api_billing: bool,

    /// Extra environment for the subprocess
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            path: None,
            model: None,
            provider: None,
            session_dir: None,
            allowed_tools: Vec::new(),
            extra_args: None,
            profile: None,
            title: None,
            dangerously_skip_permissions: false,
            use_api_billing: false,
            env: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Binary for `engine`, honoring `path`
    pub fn binary<'a>(&'a self, engine: &'a str) -> &'a str {
        self.path.as_deref().unwrap_or(engine)
    }
}
