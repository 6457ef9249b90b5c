//! Resume line formatting and recognition shared by all runners.
//!
//! Every engine embeds its session reference in outbound messages as a single
//! backticked command line, e.g. `` `codex resume 0199a` `` or
//! `` `claude --resume 8f2c` ``. The line is exactly what an operator would
//! type to resume the session locally, which keeps it greppable.
//!
//! Engines whose tokens are file paths opt into quoting: a token containing
//! spaces is rendered inside double quotes, and quoted tokens are recognized
//! whether or not they need the quotes.

use regex::Regex;
use thiserror::Error;

use crate::{EngineId, ResumeToken};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResumeError {
    #[error("resume token is for engine {actual:?}, expected {expected:?}")]
    WrongEngine { expected: String, actual: String },
    #[error("resume token value {0:?} cannot be embedded in a resume line")]
    InvalidValue(String),
}

/// Per-engine resume line syntax: `<engine> <flag> <token>`
#[derive(Debug, Clone)]
pub struct ResumeFormat {
    engine: EngineId,
    flag: String,
    quoted: bool,
    pattern: Regex,
}

impl ResumeFormat {
    /// Build the format for `engine`, rendering with `flag` and also
    /// recognizing any of `aliases` in place of it.
    pub fn new(engine: &str, flag: &str, aliases: &[&str]) -> Self {
        Self::build(engine, flag, aliases, false)
    }

    /// Like [`ResumeFormat::new`], for tokens that may contain spaces
    pub fn quoted(engine: &str, flag: &str, aliases: &[&str]) -> Self {
        Self::build(engine, flag, aliases, true)
    }

    fn build(engine: &str, flag: &str, aliases: &[&str], quoted: bool) -> Self {
        let flags = std::iter::once(flag)
            .chain(aliases.iter().copied())
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|");
        let token = if quoted {
            r#"(?:"(?P<quoted>[^"`\r\n]+)"|(?P<token>[^`\s"]+))"#
        } else {
            r"(?P<token>[^`\s]+)"
        };
        let pattern = format!(
            r"(?im)^\s*`?{}\s+(?:{})\s+{}`?\s*$",
            regex::escape(engine),
            flags,
            token
        );
        Self {
            engine: EngineId::new(engine),
            flag: flag.to_string(),
            quoted,
            pattern: Regex::new(&pattern).expect("resume pattern is built from escaped literals"),
        }
    }

    pub fn engine(&self) -> &EngineId {
        &self.engine
    }

    /// Render the canonical single-line form of `token`
    pub fn format(&self, token: &ResumeToken) -> Result<String, ResumeError> {
        if token.engine != self.engine {
            return Err(ResumeError::WrongEngine {
                expected: self.engine.to_string(),
                actual: token.engine.to_string(),
            });
        }
        if !token.is_well_formed() || (token.needs_quotes() && !self.quoted) {
            return Err(ResumeError::InvalidValue(token.value.clone()));
        }
        if token.needs_quotes() {
            return Ok(format!("`{} {} \"{}\"`", self.engine, self.flag, token.value));
        }
        Ok(format!("`{} {} {}`", self.engine, self.flag, token.value))
    }

    /// Find the single resume token of this engine in `text`.
    ///
    /// Returns `None` when there is no resume line, or when the text holds
    /// lines referring to different sessions.
    pub fn extract(&self, text: &str) -> Option<ResumeToken> {
        let mut found: Option<&str> = None;
        for caps in self.pattern.captures_iter(text) {
            let value = caps.name("quoted").or_else(|| caps.name("token"))?.as_str();
            match found {
                Some(existing) if existing != value => return None,
                _ => found = Some(value),
            }
        }
        found.map(|value| ResumeToken::new(self.engine.clone(), value))
    }

    /// Cheap check whether `text` contains a resume line of this engine
    pub fn is_resume_line(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codex() -> ResumeFormat {
        ResumeFormat::new("codex", "resume", &[])
    }

    fn claude() -> ResumeFormat {
        ResumeFormat::new("claude", "--resume", &["-r"])
    }

    fn pi() -> ResumeFormat {
        ResumeFormat::quoted("pi", "--session", &[])
    }

    #[test]
    fn test_round_trip() {
        for (format, value) in [
            (codex(), "0199a213-81c0-7800-8aa1-bbab2a035a53"),
            (claude(), "8f2c1d2e-aaaa-bbbb-cccc-000000000001"),
            (claude(), "/tmp/sessions/a.jsonl"),
        ] {
            let token = ResumeToken::new(format.engine().clone(), value);
            let line = format.format(&token).unwrap();
            assert_eq!(format.extract(&line), Some(token));
            assert!(format.is_resume_line(&line));
        }
    }

    #[test]
    fn test_canonical_lines() {
        let token = ResumeToken::new(EngineId::new("codex"), "abc");
        assert_eq!(codex().format(&token).unwrap(), "`codex resume abc`");
        let token = ResumeToken::new(EngineId::new("claude"), "abc");
        assert_eq!(claude().format(&token).unwrap(), "`claude --resume abc`");
    }

    #[test]
    fn test_no_cross_engine_match() {
        let codex_line = "`codex resume abc`";
        let claude_line = "`claude --resume abc`";
        assert_eq!(claude().extract(codex_line), None);
        assert_eq!(codex().extract(claude_line), None);
        assert!(!claude().is_resume_line(codex_line));
        assert!(!codex().is_resume_line(claude_line));
    }

    #[test]
    fn test_extract_from_message_body() {
        let text = "done, updated 3 files\n\n`codex resume t-123`\n";
        assert_eq!(
            codex().extract(text),
            Some(ResumeToken::new(EngineId::new("codex"), "t-123"))
        );
        assert_eq!(
            claude().extract("claude -r s1"),
            Some(ResumeToken::new(EngineId::new("claude"), "s1"))
        );
    }

    #[test]
    fn test_ambiguous_and_repeated() {
        let ambiguous = "`codex resume a`\n`codex resume b`";
        assert_eq!(codex().extract(ambiguous), None);
        assert!(codex().is_resume_line(ambiguous));

        let repeated = "`codex resume a`\nagain:\n`codex resume a`";
        assert_eq!(
            codex().extract(repeated),
            Some(ResumeToken::new(EngineId::new("codex"), "a"))
        );
    }

    #[test]
    fn test_rejects_partial_lines() {
        assert_eq!(codex().extract("please run codex resume abc now"), None);
        assert_eq!(codex().extract("`codex resume`"), None);
        assert_eq!(codex().extract(""), None);
    }

    #[test]
    fn test_format_errors() {
        let wrong = ResumeToken::new(EngineId::new("claude"), "abc");
        assert!(matches!(
            codex().format(&wrong),
            Err(ResumeError::WrongEngine { .. })
        ));
        let spaced = ResumeToken::new(EngineId::new("codex"), "a b");
        assert_eq!(
            codex().format(&spaced),
            Err(ResumeError::InvalidValue("a b".to_string()))
        );
    }

    #[test]
    fn test_quoted_tokens() {
        let token = ResumeToken::new(EngineId::new("pi"), "/tmp/pi/session.jsonl");
        assert_eq!(pi().format(&token).unwrap(), "`pi --session /tmp/pi/session.jsonl`");
        assert_eq!(pi().extract("`pi --session /tmp/pi/session.jsonl`"), Some(token.clone()));
        assert_eq!(pi().extract(r#"pi --session "/tmp/pi/session.jsonl""#), Some(token));
        assert_eq!(pi().extract("`codex resume sid`"), None);

        let spaced = ResumeToken::new(EngineId::new("pi"), "/tmp/pi session.jsonl");
        let line = pi().format(&spaced).unwrap();
        assert_eq!(line, r#"`pi --session "/tmp/pi session.jsonl"`"#);
        assert_eq!(pi().extract(&line), Some(spaced));
    }

    #[test]
    fn test_quoted_tokens_reject_broken_lines() {
        assert_eq!(pi().extract(r#"`pi --session "/tmp/pi session.jsonl`"#), None);
        assert_eq!(pi().extract(r#"`pi --session ""`"#), None);
        let bad = ResumeToken::new(EngineId::new("pi"), "a\"b");
        assert_eq!(
            pi().format(&bad),
            Err(ResumeError::InvalidValue("a\"b".to_string()))
        );
    }
}
