use serde::{Deserialize, Serialize};

use super::engine::ResumeToken;

/// Conversation thread identifier supplied by the chat adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Which session inside a thread a request targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRef {
    /// No resume token: the engine will open a fresh session
    New,
    /// Continue a previously reported session
    Resumed(ResumeToken),
}

impl SessionRef {
    pub fn from_resume(resume: Option<ResumeToken>) -> Self {
        match resume {
            Some(token) => SessionRef::Resumed(token),
            None => SessionRef::New,
        }
    }

    pub fn token(&self) -> Option<&ResumeToken> {
        match self {
            SessionRef::New => None,
            SessionRef::Resumed(token) => Some(token),
        }
    }
}

/// Concurrency identity: requests with equal keys never overlap
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub thread: ThreadId,
    pub session: SessionRef,
}

impl SessionKey {
    pub fn new(thread: ThreadId, resume: Option<ResumeToken>) -> Self {
        Self {
            thread,
            session: SessionRef::from_resume(resume),
        }
    }

    pub fn resume(&self) -> Option<&ResumeToken> {
        self.session.token()
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.session {
            SessionRef::New => write!(f, "{}/new", self.thread),
            SessionRef::Resumed(token) => write!(f, "{}/{}", self.thread, token),
        }
    }
}
