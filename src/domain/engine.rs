use serde::{Deserialize, Serialize};

/// Identifier of an engine backend (e.g. `"codex"`, `"claude"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(String);

impl EngineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl PartialEq<str> for EngineId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for EngineId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Opaque, engine-specific reference to a resumable session.
///
/// Tokens are only comparable within one engine: two tokens with the same
/// value but different engines are different sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeToken {
    pub engine: EngineId,
    pub value: String,
}

impl ResumeToken {
    pub fn new(engine: EngineId, value: impl Into<String>) -> Self {
        Self {
            engine,
            value: value.into(),
        }
    }

    /// Whether the value can be embedded in a single resume line,
    /// quoted if it contains spaces
    pub fn is_well_formed(&self) -> bool {
        !self.value.trim().is_empty()
            && !self
                .value
                .chars()
                .any(|c| c.is_control() || c == '`' || c == '"')
    }

    /// Whether the value only fits a resume line inside double quotes
    pub fn needs_quotes(&self) -> bool {
        self.value.chars().any(char::is_whitespace)
    }
}

impl std::fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.engine, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_differ_across_engines() {
        let a = ResumeToken::new(EngineId::new("codex"), "abc");
        let b = ResumeToken::new(EngineId::new("claude"), "abc");
        assert_ne!(a, b);
        assert_eq!(a, ResumeToken::new("codex".into(), "abc"));
    }

    #[test]
    fn test_well_formed() {
        let engine = EngineId::new("codex");
        assert!(ResumeToken::new(engine.clone(), "019a-xyz").is_well_formed());
        assert!(!ResumeToken::new(engine.clone(), "").is_well_formed());
        assert!(!ResumeToken::new(engine.clone(), " ").is_well_formed());
        assert!(!ResumeToken::new(engine.clone(), "a`b").is_well_formed());
        assert!(!ResumeToken::new(engine.clone(), "a\"b").is_well_formed());
        assert!(!ResumeToken::new(engine.clone(), "a\nb").is_well_formed());

        let spaced = ResumeToken::new(engine.clone(), "/tmp/a b.jsonl");
        assert!(spaced.is_well_formed());
        assert!(spaced.needs_quotes());
        assert!(!ResumeToken::new(engine, "/tmp/a.jsonl").needs_quotes());
    }
}
