//! Tool call classification for the Claude runner

use serde_json::Value;

use crate::ActionKind;

/// Path argument of file oriented tools
pub fn input_path(input: &Value) -> Option<&str> {
    ["file_path", "path", "notebook_path"]
        .iter()
        .filter_map(|key| input.get(*key).and_then(|v| v.as_str()))
        .find(|path| !path.is_empty())
}

fn input_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// Map a tool call to the action kind and title shown to the user
pub fn tool_kind_and_title(name: &str, input: &Value) -> (ActionKind, String) {
    match name {
        "Bash" | "Shell" | "KillShell" => {
            let command = input_str(input, "command").unwrap_or(name);
            (ActionKind::Command, command.to_string())
        }
        "Edit" | "Write" | "MultiEdit" | "NotebookEdit" => {
            let title = input_path(input).unwrap_or(name);
            (ActionKind::FileChange, title.to_string())
        }
        "Read" => match input_path(input) {
            Some(path) => (ActionKind::Tool, format!("read: `{}`", path)),
            None => (ActionKind::Tool, "read".to_string()),
        },
        "Glob" => match input_str(input, "pattern") {
            Some(pattern) => (ActionKind::Tool, format!("glob: `{}`", pattern)),
            None => (ActionKind::Tool, "glob".to_string()),
        },
        "Grep" => match input_str(input, "pattern") {
            Some(pattern) => (ActionKind::Tool, format!("grep: {}", pattern)),
            None => (ActionKind::Tool, "grep".to_string()),
        },
        "WebSearch" => {
            let query = input_str(input, "query").unwrap_or("search");
            (ActionKind::WebSearch, query.to_string())
        }
        "WebFetch" => {
            let url = input_str(input, "url").unwrap_or("fetch");
            (ActionKind::WebSearch, url.to_string())
        }
        "TodoWrite" => (ActionKind::Note, "update todos".to_string()),
        "TodoRead" => (ActionKind::Note, "read todos".to_string()),
        "AskUserQuestion" => (ActionKind::Note, "ask user".to_string()),
        "Task" | "Agent" => {
            let title = input_str(input, "description")
                .or_else(|| input_str(input, "prompt"))
                .unwrap_or(name);
            (ActionKind::Tool, title.to_string())
        }
        _ => (ActionKind::Tool, name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kinds() {
        let cases = [
            ("Bash", json!({"command": "cargo fmt"}), ActionKind::Command, "cargo fmt"),
            ("Edit", json!({"file_path": "src/lib.rs"}), ActionKind::FileChange, "src/lib.rs"),
            ("Write", json!({}), ActionKind::FileChange, "Write"),
            ("Read", json!({"file_path": "a.md"}), ActionKind::Tool, "read: `a.md`"),
            ("Grep", json!({"pattern": "fn main"}), ActionKind::Tool, "grep: fn main"),
            (
                "WebFetch",
                json!({"url": "https://example.com"}),
                ActionKind::WebSearch,
                "https://example.com",
            ),
            ("TodoWrite", json!({"todos": []}), ActionKind::Note, "update todos"),
            ("Task", json!({"description": "explore repo"}), ActionKind::Tool, "explore repo"),
            ("mcp__docs__search", json!({}), ActionKind::Tool, "mcp__docs__search"),
        ];
        for (name, input, kind, title) in cases {
            assert_eq!(tool_kind_and_title(name, &input), (kind, title.to_string()), "{}", name);
        }
    }
}
