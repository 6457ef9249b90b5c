use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::engine::{EngineId, ResumeToken};

/// The kind of work an action describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Shell command execution
    Command,
    /// Generic tool or MCP tool invocation
    Tool,
    /// File edit/create/delete
    FileChange,
    /// Web search or fetch
    WebSearch,
    /// Reasoning, todo lists and other notes
    Note,
    /// A model turn
    Turn,
    /// Engine warnings and protocol problems
    Warning,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Command => write!(f, "command"),
            ActionKind::Tool => write!(f, "tool"),
            ActionKind::FileChange => write!(f, "file_change"),
            ActionKind::WebSearch => write!(f, "web_search"),
            ActionKind::Note => write!(f, "note"),
            ActionKind::Turn => write!(f, "turn"),
            ActionKind::Warning => write!(f, "warning"),
        }
    }
}

/// Lifecycle phase of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPhase {
    Started,
    Updated,
    Completed,
}

impl ActionPhase {
    /// Parse the suffix of an `item.<phase>` style event type
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "started" => Some(ActionPhase::Started),
            "updated" => Some(ActionPhase::Updated),
            "completed" => Some(ActionPhase::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One tool/command/note the engine reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub kind: ActionKind,
    pub title: String,
    #[serde(default)]
    pub detail: Map<String, Value>,
}

impl Action {
    pub fn new(id: impl Into<String>, kind: ActionKind, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            detail: Map::new(),
        }
    }

    pub fn with_detail(mut self, detail: Map<String, Value>) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }
}

/// First event of a run: the session this run belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedEvent {
    pub engine: EngineId,
    pub resume: ResumeToken,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub engine: EngineId,
    pub action: Action,
    pub phase: ActionPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<ActionLevel>,
}

impl ActionEvent {
    pub fn new(engine: EngineId, phase: ActionPhase, action: Action) -> Self {
        Self {
            engine,
            action,
            phase,
            ok: None,
            message: None,
            level: None,
        }
    }

    pub fn started(engine: EngineId, action: Action) -> Self {
        Self::new(engine, ActionPhase::Started, action)
    }

    pub fn completed(engine: EngineId, action: Action, ok: bool) -> Self {
        let mut event = Self::new(engine, ActionPhase::Completed, action);
        event.ok = Some(ok);
        event
    }

    /// A self-contained warning entry (already completed, never pending)
    pub fn note(
        engine: EngineId,
        id: impl Into<String>,
        message: impl Into<String>,
        ok: bool,
        detail: Map<String, Value>,
    ) -> Self {
        let message = message.into();
        let action = Action::new(id, ActionKind::Warning, message.clone()).with_detail(detail);
        Self {
            engine,
            action,
            phase: ActionPhase::Completed,
            ok: Some(ok),
            message: Some(message),
            level: Some(if ok {
                ActionLevel::Info
            } else {
                ActionLevel::Warning
            }),
        }
    }
}

/// Terminal event of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedEvent {
    pub engine: EngineId,
    pub ok: bool,
    #[serde(default)]
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

impl CompletedEvent {
    pub fn success(
        engine: EngineId,
        answer: impl Into<String>,
        resume: Option<ResumeToken>,
    ) -> Self {
        Self {
            engine,
            ok: true,
            answer: answer.into(),
            error: None,
            resume,
            usage: None,
        }
    }

    pub fn failure(
        engine: EngineId,
        error: impl Into<String>,
        answer: impl Into<String>,
        resume: Option<ResumeToken>,
    ) -> Self {
        Self {
            engine,
            ok: false,
            answer: answer.into(),
            error: Some(error.into()),
            resume,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Option<Value>) -> Self {
        self.usage = usage;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        !self.ok && self.error.as_deref() == Some(CANCELLED)
    }
}

/// Error text of a run stopped by cancellation or inactivity
pub const CANCELLED: &str = "cancelled";
/// Error text of a run whose process ended without a terminal event
pub const TERMINATED: &str = "terminated";

/// Normalized unit of run progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TakopiEvent {
    Started(StartedEvent),
    Action(ActionEvent),
    Completed(CompletedEvent),
}

impl TakopiEvent {
    pub fn engine(&self) -> &EngineId {
        match self {
            TakopiEvent::Started(e) => &e.engine,
            TakopiEvent::Action(e) => &e.engine,
            TakopiEvent::Completed(e) => &e.engine,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TakopiEvent::Completed(_))
    }

    pub fn as_completed(&self) -> Option<&CompletedEvent> {
        match self {
            TakopiEvent::Completed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StartedEvent> for TakopiEvent {
    fn from(value: StartedEvent) -> Self {
        TakopiEvent::Started(value)
    }
}

impl From<ActionEvent> for TakopiEvent {
    fn from(value: ActionEvent) -> Self {
        TakopiEvent::Action(value)
    }
}

impl From<CompletedEvent> for TakopiEvent {
    fn from(value: CompletedEvent) -> Self {
        TakopiEvent::Completed(value)
    }
}
