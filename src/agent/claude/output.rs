//! Claude Code `stream-json` output model

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events from the Claude stream-json output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// System message, `subtype = "init"` carries the session id
    System {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        tools: Option<Value>,
        #[serde(default, rename = "permissionMode")]
        permission_mode: Option<String>,
        #[serde(default)]
        mcp_servers: Option<Value>,
    },

    /// Assistant message (text or tool use)
    Assistant {
        #[serde(default)]
        message: Message,
        #[serde(default)]
        parent_tool_use_id: Option<String>,
    },

    /// User message (usually tool results)
    User {
        #[serde(default)]
        message: Message,
    },

    /// Final result of the run
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default, alias = "cost_usd")]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        duration_api_ms: Option<u64>,
        #[serde(default)]
        num_turns: Option<u64>,
        #[serde(default)]
        usage: Option<Value>,
        #[serde(default, rename = "modelUsage")]
        model_usage: Option<Value>,
        #[serde(default)]
        error: Option<Value>,
        #[serde(default)]
        errors: Vec<Value>,
        #[serde(default)]
        permission_denials: Vec<PermissionDenial>,
    },

    /// Stream events this crate does not interpret
    #[serde(other)]
    Other,
}

/// Message envelope of assistant and user events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: MessageContent,
}

/// Plain prompt text or a list of content blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Blocks(Vec<ContentBlock>),
    Text(String),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Blocks(Vec::new())
    }
}

impl MessageContent {
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            MessageContent::Blocks(blocks) => blocks,
            MessageContent::Text(_) => &[],
        }
    }
}

/// Content block (text, tool use or tool result)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content
    Text { text: String },

    /// Tool use request
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },

    /// Tool result; `content` is a string or a list of text blocks
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: Option<bool>,
    },

    /// Thinking and other blocks
    #[serde(other)]
    Other,
}

/// A tool call the permission system refused
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDenial {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
}

impl StreamEvent {
    /// Interpret a parsed JSON line, `None` if it does not fit the model
    pub fn from_value(value: &Value) -> Option<Self> {
        match serde_json::from_value(value.clone()) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!("unrecognized claude event ({}): {}", e, value);
                None
            }
        }
    }
}

/// Flatten tool result content into plain text
pub fn tool_result_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.as_str()),
                other => other.get("text").and_then(|t| t.as_str()),
            })
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}
