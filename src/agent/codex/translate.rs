//! Codex `exec --json` output translation
//!
//! Codex emits one JSON object per line:
//! - `thread.started` - session id
//! - `turn.started` / `turn.completed` / `turn.failed` / `turn.rate_limited`
//! - `item.started` / `item.updated` / `item.completed` - individual steps
//! - `error` - fatal or transient errors

use serde_json::{Map, Value, json};

use crate::agent::process::{ExitInfo, Translator};
use crate::{
    Action, ActionEvent, ActionKind, ActionPhase, CompletedEvent, EngineId,
    ResumeToken, StartedEvent, TERMINATED, TakopiEvent,
};

use super::ENGINE;

fn engine() -> EngineId {
    EngineId::new(ENGINE)
}

fn item_kind(item_type: &str) -> Option<ActionKind> {
    match item_type {
        "command_execution" => Some(ActionKind::Command),
        "mcp_tool_call" | "tool_call" => Some(ActionKind::Tool),
        "web_search" => Some(ActionKind::WebSearch),
        "file_change" => Some(ActionKind::FileChange),
        "reasoning" | "todo_list" => Some(ActionKind::Note),
        _ => None,
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

fn field(value: &Value, key: &str) -> Value {
    value.get(key).cloned().unwrap_or(Value::Null)
}

/// Stateful translator for one codex invocation
pub struct CodexTranslator {
    title: String,
    answer: Option<String>,
    turn_index: u32,
    note_seq: u32,
}

impl CodexTranslator {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            answer: None,
            turn_index: 0,
            note_seq: 0,
        }
    }

    fn note(&mut self, message: impl Into<String>, detail: Map<String, Value>) -> TakopiEvent {
        self.note_seq += 1;
        let id = format!("codex.warning.{}", self.note_seq);
        ActionEvent::note(engine(), id, message, false, detail).into()
    }

    fn failed(&self, error: impl Into<String>) -> TakopiEvent {
        CompletedEvent::failure(engine(), error, self.answer(), None).into()
    }

    fn translate_item(&mut self, phase: ActionPhase, item: &Value) -> Vec<TakopiEvent> {
        let item_type = match str_field(item, "type").or_else(|| str_field(item, "item_type")) {
            Some("assistant_message") => "agent_message",
            Some(t) => t,
            None => return Vec::new(),
        };

        if item_type == "agent_message" {
            if phase == ActionPhase::Completed {
                if let Some(text) = str_field(item, "text") {
                    if self.answer.is_some() {
                        tracing::debug!(
                            "codex emitted multiple agent messages; using the last one"
                        );
                    }
                    self.answer = Some(text.to_string());
                }
            }
            return Vec::new();
        }

        let Some(id) = str_field(item, "id").filter(|id| !id.is_empty()) else {
            tracing::debug!("missing item id in codex event: {}", item);
            return Vec::new();
        };

        if item_type == "error" {
            if phase != ActionPhase::Completed {
                return Vec::new();
            }
            let message = str_field(item, "message").unwrap_or("codex item error");
            let mut detail = Map::new();
            detail.insert("message".into(), message.into());
            return vec![ActionEvent::note(engine(), id, message, false, detail).into()];
        }

        let Some(kind) = item_kind(item_type) else {
            tracing::debug!("ignoring codex item type {}", item_type);
            return Vec::new();
        };
        let status = str_field(item, "status");

        let (title, mut detail, ok) = match kind {
            ActionKind::Command => {
                let exit_code = item.get("exit_code").and_then(|c| c.as_i64());
                let ok = status != Some("failed") && exit_code.is_none_or(|c| c == 0);
                let mut detail = Map::new();
                detail.insert("exit_code".into(), field(item, "exit_code"));
                detail.insert("status".into(), field(item, "status"));
                if let Some(output) = item.get("aggregated_output") {
                    detail.insert("output".into(), output.clone());
                }
                let title = str_field(item, "command").unwrap_or("").to_string();
                (title, detail, ok)
            }
            ActionKind::Tool => tool_summary(item_type, item),
            ActionKind::WebSearch => {
                let mut detail = Map::new();
                detail.insert("query".into(), field(item, "query"));
                let title = str_field(item, "query").unwrap_or("").to_string();
                (title, detail, true)
            }
            ActionKind::FileChange => {
                // Codex reports file changes once they are applied
                if phase != ActionPhase::Completed {
                    return Vec::new();
                }
                let changes = item.get("changes").cloned().unwrap_or_else(|| json!([]));
                let mut detail = Map::new();
                detail.insert("changes".into(), changes);
                detail.insert("status".into(), field(item, "status"));
                detail.insert("error".into(), field(item, "error"));
                (change_summary(item), detail, status != Some("failed"))
            }
            _ if item_type == "todo_list" => {
                let (done, total, next) = todo_progress(item.get("items"));
                let title = match (total, next) {
                    (0, _) => "todo".to_string(),
                    (_, Some(next)) => format!("todo {}/{}: {}", done, total, next),
                    (_, None) => format!("todo {}/{}: done", done, total),
                };
                let mut detail = Map::new();
                detail.insert("done".into(), done.into());
                detail.insert("total".into(), total.into());
                (title, detail, true)
            }
            _ => {
                let title = str_field(item, "text").unwrap_or("").to_string();
                (title, Map::new(), true)
            }
        };

        if phase != ActionPhase::Completed {
            let action = Action::new(id, kind, title).with_detail(detail);
            return vec![ActionEvent::new(engine(), phase, action).into()];
        }

        if kind == ActionKind::Tool {
            if let Some(error) = item.get("error").filter(|e| !e.is_null()) {
                let message = error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                detail.insert("error_message".into(), message.into());
            }
        }
        let action = Action::new(id, kind, title).with_detail(detail);
        vec![ActionEvent::completed(engine(), action, ok).into()]
    }
}

fn tool_summary(item_type: &str, item: &Value) -> (String, Map<String, Value>, bool) {
    let mut detail = Map::new();
    let title = if item_type == "tool_call" {
        detail.insert("name".into(), field(item, "name"));
        str_field(item, "name").unwrap_or("tool").to_string()
    } else {
        detail.insert("server".into(), field(item, "server"));
        detail.insert("tool".into(), field(item, "tool"));
        let name = [str_field(item, "server"), str_field(item, "tool")]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(".");
        if name.is_empty() { "tool".to_string() } else { name }
    };
    detail.insert("status".into(), field(item, "status"));
    if let Some(arguments) = item.get("arguments") {
        detail.insert("arguments".into(), arguments.clone());
    }
    if let Some(result) = item.get("result") {
        detail.insert("result".into(), result.clone());
    }
    let has_error = item.get("error").is_some_and(|e| !e.is_null());
    let ok = str_field(item, "status") != Some("failed") && !has_error;
    (title, detail, ok)
}

fn change_summary(item: &Value) -> String {
    let changes = item
        .get("changes")
        .and_then(|c| c.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();
    let paths = changes
        .iter()
        .filter_map(|c| str_field(c, "path"))
        .collect::<Vec<_>>();
    if !paths.is_empty() {
        return paths.join(", ");
    }
    match changes.len() {
        0 => "files".to_string(),
        n => format!("{} files", n),
    }
}

fn todo_progress(items: Option<&Value>) -> (u64, u64, Option<String>) {
    let mut done = 0;
    let mut total = 0;
    let mut next = None;
    for item in items.and_then(|i| i.as_array()).into_iter().flatten() {
        if !item.is_object() {
            continue;
        }
        total += 1;
        if item.get("completed").and_then(|c| c.as_bool()) == Some(true) {
            done += 1;
        } else if next.is_none() {
            next = item.get("text").map(|t| match t.as_str() {
                Some(s) => s.to_string(),
                None => t.to_string(),
            });
        }
    }
    (done, total, next)
}

impl Translator for CodexTranslator {
    fn translate(&mut self, event: &Value) -> Vec<TakopiEvent> {
        let Some(event_type) = str_field(event, "type") else {
            tracing::debug!("codex event without type: {}", event);
            return Vec::new();
        };

        match event_type {
            "thread.started" => match str_field(event, "thread_id") {
                Some(thread_id) => vec![
                    StartedEvent {
                        engine: engine(),
                        resume: ResumeToken::new(engine(), thread_id),
                        title: self.title.clone(),
                        meta: None,
                    }
                    .into(),
                ],
                None => {
                    tracing::debug!("codex thread.started missing thread_id: {}", event);
                    Vec::new()
                }
            },
            "turn.started" => {
                let id = format!("turn_{}", self.turn_index);
                self.turn_index += 1;
                let action = Action::new(id, ActionKind::Turn, "turn started");
                vec![ActionEvent::started(engine(), action).into()]
            }
            "turn.completed" => {
                let usage = event.get("usage").cloned();
                vec![
                    CompletedEvent::success(engine(), self.answer(), None)
                        .with_usage(usage)
                        .into(),
                ]
            }
            "turn.failed" => {
                let message = event
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("codex turn failed");
                vec![self.failed(message)]
            }
            "turn.rate_limited" => {
                let message = match event.get("retry_after_ms").and_then(|r| r.as_u64()) {
                    Some(ms) => format!("rate limited (retry after {}ms)", ms),
                    None => "rate limited".to_string(),
                };
                vec![self.note(message, Map::new())]
            }
            "error" => {
                let message = str_field(event, "message").unwrap_or("codex error");
                let fatal = event.get("fatal").is_none_or(|f| f.as_bool() == Some(true));
                if fatal {
                    return vec![self.failed(message)];
                }
                let mut detail = Map::new();
                detail.insert("code".into(), field(event, "code"));
                detail.insert("fatal".into(), field(event, "fatal"));
                vec![self.note(message, detail)]
            }
            t if t.starts_with("item.") => {
                let Some(phase) = ActionPhase::from_suffix(&t["item.".len()..]) else {
                    return Vec::new();
                };
                match event.get("item") {
                    Some(item) => self.translate_item(phase, item),
                    None => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    fn finish(&mut self, exit: &ExitInfo, session: Option<&ResumeToken>) -> Vec<TakopiEvent> {
        if !exit.success {
            let rc = exit
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let mut detail = Map::new();
            detail.insert("stderr_tail".into(), exit.stderr_tail.clone().into());
            let note = self.note(format!("codex exec failed (rc={}).", rc), detail);
            return vec![note, self.failed(TERMINATED)];
        }
        if session.is_none() {
            return vec![self.failed("codex exec finished but no session id was captured")];
        }
        vec![CompletedEvent::success(engine(), self.answer(), None).into()]
    }

    fn answer(&self) -> String {
        self.answer.clone().unwrap_or_default()
    }
}
