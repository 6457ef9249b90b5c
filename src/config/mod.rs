//! Configuration loading and management

mod engine;

pub use engine::EngineConfig;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::agent::{DEFAULT_CANCEL_GRACE, DEFAULT_EVENT_BUFFER, RunLimits};

/// Engines this build knows how to drive
pub const KNOWN_ENGINES: &[&str] = &["claude", "codex", "pi"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Engine used when a message names none and carries no resume line
    #[serde(default = "default_engine")]
    pub default_engine: String,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub delivery: DeliverySettings,

    #[serde(default)]
    pub codex: EngineConfig,

    #[serde(default)]
    pub claude: EngineConfig,

    #[serde(default)]
    pub pi: EngineConfig,
}

fn default_engine() -> String {
    "codex".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_engine: default_engine(),
            queue: QueueSettings::default(),
            delivery: DeliverySettings::default(),
            codex: EngineConfig::default(),
            claude: EngineConfig::default(),
            pi: EngineConfig::default(),
        }
    }
}

/// `[queue]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum requests waiting behind a running one, per session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pending: Option<usize>,

    /// Cancel a run after this long without an event. 0 disables.
    #[serde(default)]
    pub idle_timeout_secs: u64,

    /// Time between SIGTERM and SIGKILL on cancel
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Capacity of each run's event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_cancel_grace_ms() -> u64 {
    DEFAULT_CANCEL_GRACE.as_millis() as u64
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_pending: None,
            idle_timeout_secs: 0,
            cancel_grace_ms: default_cancel_grace_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl QueueSettings {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn run_limits(&self) -> RunLimits {
        RunLimits {
            event_buffer: self.event_buffer,
            cancel_grace: Duration::from_millis(self.cancel_grace_ms),
        }
    }
}

/// `[delivery]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverySettings {
    /// Send the final answer as a new message (notifies the user).
    /// When false the progress placeholder is edited in place.
    #[serde(default = "default_notify")]
    pub notify: bool,
}

fn default_notify() -> bool {
    true
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            notify: default_notify(),
        }
    }
}

impl Config {
    /// Default location: `~/.takopi/takopi.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".takopi").join("takopi.toml"))
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit file, or the default one if it exists.
    ///
    /// A missing default file yields the built-in defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                tracing::debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Config table of a known engine
    pub fn engine(&self, id: &str) -> Option<&EngineConfig> {
        match id {
            "codex" => Some(&self.codex),
            "claude" => Some(&self.claude),
            "pi" => Some(&self.pi),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let Some(engine) = self.engine(&self.default_engine) else {
            bail!(
                "default_engine: unknown engine {:?} (expected one of {})",
                self.default_engine,
                KNOWN_ENGINES.join(", ")
            );
        };
        if !engine.enabled {
            bail!(
                "default_engine: engine {:?} is disabled in [{}]",
                self.default_engine,
                self.default_engine
            );
        }
        if self.queue.event_buffer == 0 {
            bail!("queue.event_buffer: must be at least 1");
        }
        if self.queue.max_pending == Some(0) {
            bail!("queue.max_pending: must be at least 1 when set");
        }
        for id in KNOWN_ENGINES {
            if let Some(engine) = self.engine(id) {
                if engine.path.as_deref().is_some_and(|p| p.trim().is_empty()) {
                    bail!("{}.path: must not be empty", id);
                }
            }
        }
        Ok(())
    }
}
