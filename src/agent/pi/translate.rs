//! Pi `--mode json` output translation
//!
//! Pi emits one JSON object per line:
//! - `agent_start` / `agent_end` - run boundaries, `agent_end` carries the transcript
//! - `turn_start` / `turn_end`, `message_start` / `message_update` - ignored
//! - `message_end` - a finished message; assistant messages carry the answer
//! - `tool_execution_start` / `tool_execution_end` - individual tool calls
//!
//! Pi never reports a session id: the session file is chosen by the runner
//! before spawning, so the translator is handed the token up front.

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::agent::process::{ExitInfo, Translator};
use crate::{
    Action, ActionEvent, ActionKind, CompletedEvent, EngineId, ResumeToken, StartedEvent,
    TERMINATED, TakopiEvent,
};

use super::ENGINE;

fn engine() -> EngineId {
    EngineId::new(ENGINE)
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

/// Stateful translator for one pi invocation
pub struct PiTranslator {
    title: String,
    resume: ResumeToken,
    meta: Option<Value>,
    started: bool,
    answer: Option<String>,
    error: Option<String>,
    tools: HashMap<String, Action>,
    note_seq: u32,
}

impl PiTranslator {
    pub fn new(title: impl Into<String>, resume: ResumeToken) -> Self {
        Self {
            title: title.into(),
            resume,
            meta: None,
            started: false,
            answer: None,
            error: None,
            tools: HashMap::new(),
            note_seq: 0,
        }
    }

    /// Attach model/provider details to the started event
    pub fn with_meta(mut self, meta: Option<Value>) -> Self {
        self.meta = meta;
        self
    }

    fn note(&mut self, message: impl Into<String>, detail: Map<String, Value>) -> TakopiEvent {
        self.note_seq += 1;
        let id = format!("pi.warning.{}", self.note_seq);
        ActionEvent::note(engine(), id, message, false, detail).into()
    }

    fn started(&mut self) -> Option<TakopiEvent> {
        if self.started {
            return None;
        }
        self.started = true;
        Some(
            StartedEvent {
                engine: engine(),
                resume: self.resume.clone(),
                title: self.title.clone(),
                meta: self.meta.clone(),
            }
            .into(),
        )
    }

    fn tool_started(&mut self, event: &Value) -> Vec<TakopiEvent> {
        let Some(id) = str_field(event, "toolCallId").filter(|id| !id.is_empty()) else {
            tracing::debug!("pi tool event without toolCallId: {}", event);
            return Vec::new();
        };
        let name = str_field(event, "toolName").unwrap_or("tool");
        let args = event.get("args").cloned().unwrap_or(Value::Null);
        let action = tool_action(id, name, &args);
        self.tools.insert(id.to_string(), action.clone());
        vec![ActionEvent::started(engine(), action).into()]
    }

    fn tool_finished(&mut self, event: &Value) -> Vec<TakopiEvent> {
        let Some(id) = str_field(event, "toolCallId").filter(|id| !id.is_empty()) else {
            tracing::debug!("pi tool event without toolCallId: {}", event);
            return Vec::new();
        };
        let mut action = self.tools.remove(id).unwrap_or_else(|| {
            let name = str_field(event, "toolName").unwrap_or("tool");
            tool_action(id, name, &Value::Null)
        });
        let is_error = event.get("isError").and_then(|e| e.as_bool()) == Some(true);
        if let Some(result) = event.get("result").filter(|r| !r.is_null()) {
            action.detail.insert("result".into(), result.clone());
        }
        vec![ActionEvent::completed(engine(), action, !is_error).into()]
    }

    fn assistant_message(&mut self, message: &Value) {
        if str_field(message, "role") != Some("assistant") {
            return;
        }
        let text = message_text(message);
        if !text.is_empty() {
            self.answer = Some(text);
        }
        match str_field(message, "stopReason") {
            Some("error") => {
                let error = str_field(message, "errorMessage").unwrap_or("pi run failed");
                self.error = Some(error.to_string());
            }
            Some("aborted") => {
                let error = str_field(message, "errorMessage").unwrap_or("pi run aborted");
                self.error = Some(error.to_string());
            }
            _ => {}
        }
    }

    fn completed(&mut self, event: &Value) -> TakopiEvent {
        // `agent_end` repeats the transcript; only fill in what message_end missed
        if self.answer.is_none() && self.error.is_none() {
            let last = event
                .get("messages")
                .and_then(|m| m.as_array())
                .and_then(|messages| {
                    messages
                        .iter()
                        .rev()
                        .find(|m| str_field(m, "role") == Some("assistant"))
                });
            if let Some(message) = last {
                self.assistant_message(message);
            }
        }
        let resume = Some(self.resume.clone());
        match &self.error {
            Some(error) => CompletedEvent::failure(engine(), error, self.answer(), resume).into(),
            None => CompletedEvent::success(engine(), self.answer(), resume).into(),
        }
    }
}

fn tool_action(id: &str, name: &str, args: &Value) -> Action {
    let arg = |key: &str| str_field(args, key).unwrap_or("").to_string();
    let (kind, title, mut detail) = match name {
        "bash" => {
            let mut detail = Map::new();
            detail.insert("command".into(), arg("command").into());
            (ActionKind::Command, arg("command"), detail)
        }
        "write" | "edit" => {
            let path = str_field(args, "path")
                .or_else(|| str_field(args, "file_path"))
                .unwrap_or("")
                .to_string();
            let change = if name == "write" { "add" } else { "update" };
            let mut detail = Map::new();
            detail.insert("changes".into(), json!([{ "path": path, "kind": change }]));
            (ActionKind::FileChange, path, detail)
        }
        "read" | "ls" | "find" | "grep" => {
            let target = ["path", "pattern"]
                .into_iter()
                .find_map(|key| str_field(args, key))
                .unwrap_or("");
            let title = if target.is_empty() {
                name.to_string()
            } else {
                format!("{}: `{}`", name, target)
            };
            (ActionKind::Tool, title, Map::new())
        }
        _ => (ActionKind::Tool, name.to_string(), Map::new()),
    };
    detail.insert("name".into(), name.into());
    if !args.is_null() {
        detail.insert("args".into(), args.clone());
    }
    Action::new(id, kind, title).with_detail(detail)
}

fn message_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|b| str_field(b, "type") == Some("text"))
            .filter_map(|b| str_field(b, "text"))
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string(),
        _ => String::new(),
    }
}

impl Translator for PiTranslator {
    fn translate(&mut self, event: &Value) -> Vec<TakopiEvent> {
        let Some(event_type) = str_field(event, "type") else {
            tracing::debug!("pi event without type: {}", event);
            return Vec::new();
        };

        let mut events: Vec<TakopiEvent> = self.started().into_iter().collect();
        match event_type {
            "tool_execution_start" => events.extend(self.tool_started(event)),
            "tool_execution_end" => events.extend(self.tool_finished(event)),
            "message_end" => {
                if let Some(message) = event.get("message") {
                    self.assistant_message(message);
                }
            }
            "agent_end" => events.push(self.completed(event)),
            "agent_start" | "turn_start" | "turn_end" | "message_start" | "message_update"
            | "tool_execution_update" => {}
            other => tracing::debug!("ignoring pi event type {}", other),
        }
        events
    }

    fn finish(&mut self, exit: &ExitInfo, _session: Option<&ResumeToken>) -> Vec<TakopiEvent> {
        let message = if exit.success {
            "pi finished without an agent_end event".to_string()
        } else {
            let rc = exit
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            format!("pi failed (rc={}).", rc)
        };
        let mut detail = Map::new();
        detail.insert("stderr_tail".into(), exit.stderr_tail.clone().into());
        let note = self.note(message, detail);
        let error = self.error.clone().unwrap_or_else(|| TERMINATED.to_string());
        let failed = CompletedEvent::failure(engine(), error, self.answer(), None);
        vec![note, failed.into()]
    }

    fn answer(&self) -> String {
        self.answer.clone().unwrap_or_default()
    }
}
