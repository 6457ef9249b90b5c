use std::collections::HashMap;

use serde_json::{Map, Value};

use super::ENGINE;
use super::output::{ContentBlock, PermissionDenial, StreamEvent, tool_result_text};
use super::tool_format::{input_path, tool_kind_and_title};
use crate::agent::process::{ExitInfo, Translator};
use crate::{
    Action, ActionEvent, ActionKind, CompletedEvent, EngineId, ResumeToken, StartedEvent,
    TERMINATED, TakopiEvent,
};

fn engine() -> EngineId {
    EngineId::new(ENGINE)
}

/// Stateful translator for one claude invocation
pub struct ClaudeTranslator {
    title: String,
    last_text: Option<String>,
    pending: HashMap<String, Action>,
    note_seq: u32,
}

impl ClaudeTranslator {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            last_text: None,
            pending: HashMap::new(),
            note_seq: 0,
        }
    }

    fn note(&mut self, message: impl Into<String>, detail: Map<String, Value>) -> TakopiEvent {
        self.note_seq += 1;
        let id = format!("claude.warning.{}", self.note_seq);
        ActionEvent::note(engine(), id, message, false, detail).into()
    }

    fn tool_started(
        &mut self,
        id: &str,
        name: &str,
        input: &Value,
        message_id: Option<&str>,
        parent: Option<&str>,
    ) -> Option<TakopiEvent> {
        if id.is_empty() {
            return None;
        }
        let (kind, title) = tool_kind_and_title(name, input);
        let mut action = Action::new(id, kind, title)
            .with_field("name", name)
            .with_field("input", input.clone());
        if let Some(message_id) = message_id {
            action = action.with_field("message_id", message_id);
        }
        if let Some(parent) = parent {
            action = action.with_field("parent_tool_use_id", parent);
        }
        if kind == ActionKind::FileChange {
            if let Some(path) = input_path(input) {
                let changes = serde_json::json!([{"path": path, "kind": "update"}]);
                action = action.with_field("changes", changes);
            }
        }
        self.pending.insert(id.to_string(), action.clone());
        Some(ActionEvent::started(engine(), action).into())
    }

    fn tool_result(&mut self, tool_use_id: &str, content: &Value, is_error: bool) -> TakopiEvent {
        let action = self
            .pending
            .remove(tool_use_id)
            .unwrap_or_else(|| Action::new(tool_use_id, ActionKind::Tool, "tool result"));
        let result = tool_result_text(content);
        let action = action
            .with_field("tool_use_id", tool_use_id)
            .with_field("result_len", result.chars().count())
            .with_field("result", result)
            .with_field("is_error", is_error);
        ActionEvent::completed(engine(), action, !is_error).into()
    }
}

fn permission_denials(denials: &[PermissionDenial]) -> Vec<TakopiEvent> {
    denials
        .iter()
        .enumerate()
        .map(|(idx, denial)| {
            let title = match denial.tool_name.as_deref().filter(|n| !n.is_empty()) {
                Some(name) => format!("permission denied: {}", name),
                None => "permission denied".to_string(),
            };
            let id = match denial.tool_use_id.as_deref().filter(|i| !i.is_empty()) {
                Some(tool_use_id) => format!("claude.permission.{}", tool_use_id),
                None => format!("claude.permission.{}", idx),
            };
            let detail = match serde_json::to_value(denial) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            ActionEvent::note(engine(), id, title, false, detail).into()
        })
        .collect()
}

/// First usable message of a failed result
fn result_error(error: Option<&Value>, errors: &[Value]) -> String {
    if let Some(message) = error.and_then(|e| e.as_str()).filter(|e| !e.is_empty()) {
        return message.to_string();
    }
    errors
        .iter()
        .find_map(|item| match item {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            other => other
                .get("message")
                .or_else(|| other.get("error"))
                .and_then(|m| m.as_str())
                .filter(|m| !m.is_empty())
                .map(str::to_string),
        })
        .unwrap_or_else(|| "claude run failed".to_string())
}

impl Translator for ClaudeTranslator {
    fn translate(&mut self, line: &Value) -> Vec<TakopiEvent> {
        let Some(event) = StreamEvent::from_value(line) else {
            return Vec::new();
        };

        match event {
            StreamEvent::System {
                subtype,
                session_id,
                model,
                cwd,
                tools,
                permission_mode,
                mcp_servers,
            } => {
                if subtype != "init" {
                    return Vec::new();
                }
                let Some(session_id) = session_id.filter(|s| !s.is_empty()) else {
                    tracing::debug!("claude init without session_id");
                    return Vec::new();
                };
                let mut meta = Map::new();
                if let Some(cwd) = cwd {
                    meta.insert("cwd".into(), cwd.into());
                }
                if let Some(tools) = tools {
                    meta.insert("tools".into(), tools);
                }
                if let Some(mode) = permission_mode {
                    meta.insert("permissionMode".into(), mode.into());
                }
                if let Some(servers) = mcp_servers {
                    meta.insert("mcp_servers".into(), servers);
                }
                vec![
                    StartedEvent {
                        engine: engine(),
                        resume: ResumeToken::new(engine(), session_id),
                        title: model.unwrap_or_else(|| self.title.clone()),
                        meta: (!meta.is_empty()).then_some(Value::Object(meta)),
                    }
                    .into(),
                ]
            }
            StreamEvent::Assistant {
                message,
                parent_tool_use_id,
            } => {
                let mut out = Vec::new();
                for block in message.content.blocks() {
                    match block {
                        ContentBlock::ToolUse { id, name, input } => {
                            out.extend(self.tool_started(
                                id,
                                name,
                                input,
                                message.id.as_deref(),
                                parent_tool_use_id.as_deref(),
                            ));
                        }
                        ContentBlock::Text { text } if !text.is_empty() => {
                            self.last_text = Some(text.clone());
                        }
                        _ => {}
                    }
                }
                out
            }
            StreamEvent::User { message } => message
                .content
                .blocks()
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } if !tool_use_id.is_empty() => {
                        Some(self.tool_result(tool_use_id, content, *is_error == Some(true)))
                    }
                    _ => None,
                })
                .collect(),
            StreamEvent::Result {
                is_error,
                result,
                session_id,
                total_cost_usd,
                duration_ms,
                duration_api_ms,
                num_turns,
                usage,
                model_usage,
                error,
                errors,
                permission_denials: denials,
                ..
            } => {
                let mut out = permission_denials(&denials);

                let ok = !is_error;
                let mut answer = result.unwrap_or_default();
                if ok && answer.is_empty() {
                    answer = self.last_text.clone().unwrap_or_default();
                }
                let resume = session_id
                    .filter(|s| !s.is_empty())
                    .map(|s| ResumeToken::new(engine(), s));

                let mut payload = Map::new();
                if let Some(cost) = total_cost_usd {
                    payload.insert("total_cost_usd".into(), cost.into());
                }
                if let Some(ms) = duration_ms {
                    payload.insert("duration_ms".into(), ms.into());
                }
                if let Some(ms) = duration_api_ms {
                    payload.insert("duration_api_ms".into(), ms.into());
                }
                if let Some(turns) = num_turns {
                    payload.insert("num_turns".into(), turns.into());
                }
                if let Some(usage) = usage {
                    payload.insert("usage".into(), usage);
                }
                if let Some(model_usage) = model_usage {
                    payload.insert("modelUsage".into(), model_usage);
                }
                let usage = (!payload.is_empty()).then_some(Value::Object(payload));

                let completed = if ok {
                    CompletedEvent::success(engine(), answer, resume)
                } else {
                    let error = result_error(error.as_ref(), &errors);
                    CompletedEvent::failure(engine(), error, answer, resume)
                };
                out.push(completed.with_usage(usage).into());
                out
            }
            StreamEvent::Other => Vec::new(),
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
            let note = self.note(format!("claude failed (rc={}).", rc), detail);
            let completed = CompletedEvent::failure(engine(), TERMINATED, self.answer(), None);
            return vec![note, completed.into()];
        }
        if session.is_none() {
            let completed = CompletedEvent::failure(
                engine(),
                "claude finished but no session id was captured",
                self.answer(),
                None,
            );
            return vec![completed.into()];
        }
        let note = self.note("claude finished without a result event", Map::new());
        let completed = CompletedEvent::failure(engine(), TERMINATED, self.answer(), None);
        vec![note, completed.into()]
    }

    fn answer(&self) -> String {
        self.last_text.clone().unwrap_or_default()
    }
}
