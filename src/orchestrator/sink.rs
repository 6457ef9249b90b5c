//! Outbound side of the orchestrator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ActionEvent, CompletedEvent, SessionKey, StartedEvent};

/// How the final answer reaches the chat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Send a new message, which notifies the user
    #[default]
    NewMessage,
    /// Replace the progress placeholder silently
    EditPlaceholder,
}

impl DeliveryMode {
    pub fn from_notify(notify: bool) -> Self {
        if notify {
            DeliveryMode::NewMessage
        } else {
            DeliveryMode::EditPlaceholder
        }
    }
}

/// Final outcome of a run, ready for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct Finalized {
    pub completed: CompletedEvent,
    /// Resume line of the session, when one is known
    pub resume_line: Option<String>,
    pub delivery: DeliveryMode,
}

impl Finalized {
    /// Plain text of the final message: answer or error, then the resume line
    pub fn message(&self) -> String {
        let completed = &self.completed;
        let mut text = if completed.ok {
            if completed.answer.trim().is_empty() {
                "done".to_string()
            } else {
                completed.answer.clone()
            }
        } else {
            let error = completed.error.as_deref().unwrap_or("failed");
            let head = if completed.is_cancelled() {
                "cancelled".to_string()
            } else {
                format!("error: {}", error)
            };
            if completed.answer.trim().is_empty() {
                head
            } else {
                format!("{}\n\n{}", head, completed.answer)
            }
        };
        if let Some(line) = &self.resume_line {
            text.push_str("\n\n");
            text.push_str(line);
        }
        text
    }
}

/// Chat adapter callbacks, one call per event in run order
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// A request is waiting behind a running one; `position` 1 runs next
    async fn queued(&self, _key: &SessionKey, _position: usize) {}

    async fn started(&self, key: &SessionKey, event: &StartedEvent);

    async fn action(&self, key: &SessionKey, event: &ActionEvent);

    async fn finished(&self, key: &SessionKey, result: Finalized);

    /// The run's stream ended without a completion event
    async fn incomplete(&self, key: &SessionKey);
}
