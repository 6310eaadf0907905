//! Shell-command inspection: spotting `git commit` and reading exit codes.

use crate::event::{ToolCall, ToolKind};
use regex_lite::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;

/// Function-call names that run a shell command.
pub const SHELL_TOOLS: &[&str] = &["shell_command", "exec_command", "shell"];

/// Tokens that end one simple command and start the next.
const SEPARATORS: &[&str] = &[";", "&&", "||", "|", "&"];

/// Shell command text carried by a shell tool call.
///
/// `arguments` is a JSON object (normally JSON-encoded as a string) whose
/// `command` or `cmd` is either a command string or an argv array.
pub fn extract_command(call: &ToolCall) -> Option<String> {
    if call.kind != ToolKind::Function {
        return None;
    }
    if !SHELL_TOOLS.contains(&call.name.as_deref()?) {
        return None;
    }
    let args = match call.arguments.as_ref()? {
        Value::String(encoded) => serde_json::from_str::<Value>(encoded).ok()?,
        other => other.clone(),
    };
    let command = ["command", "cmd"]
        .iter()
        .find_map(|key| args.get(*key).filter(|v| !v.is_null()))?;
    match command {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => {
            let argv: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            argv_command(&argv)
        }
        _ => None,
    }
}

/// `[shell, -c|-lc, script]` yields the script; any other argv is re-quoted.
fn argv_command(argv: &[&str]) -> Option<String> {
    match argv {
        [] => None,
        [_, flag, script] if matches!(*flag, "-c" | "-lc") => Some(script.to_string()),
        words => Some(shlex::try_join(words.iter().copied()).unwrap_or_else(|_| words.join(" "))),
    }
}

/// Whether any simple command in `command` runs `git ... commit`.
///
/// Strings the shell lexer rejects fall back to a substring test.
pub fn has_git_commit(command: &str) -> bool {
    let Some(tokens) = shlex::split(&space_operators(command)) else {
        return command.contains("git commit");
    };
    tokens
        .split(|token| SEPARATORS.contains(&token.as_str()))
        .any(segment_has_git_commit)
}

/// Surround unquoted `;`, `&` and `|` runs with spaces so `a;b` and `a&&b`
/// lex as three tokens.
fn space_operators(command: &str) -> String {
    let is_operator = |c: char| matches!(c, ';' | '&' | '|');
    let mut out = String::with_capacity(command.len() + 8);
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match (quote, c) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('"'), '\\') | (None, '\\') => escaped = true,
            (None, '\'' | '"') => quote = Some(c),
            (None, c) if is_operator(c) => {
                if !out.ends_with(is_operator) {
                    out.push(' ');
                }
                out.push(c);
                if !chars.peek().copied().is_some_and(is_operator) {
                    out.push(' ');
                }
                continue;
            }
            _ => {}
        }
        out.push(c);
    }
    out
}

fn segment_has_git_commit(tokens: &[String]) -> bool {
    tokens
        .iter()
        .position(|token| is_git(token))
        .is_some_and(|idx| tokens[idx + 1..].iter().any(|t| t == "commit"))
}

fn is_git(token: &str) -> bool {
    token == "git" || Path::new(token).file_name().is_some_and(|name| name == "git")
}

fn exit_code_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"Exit code:\s*(\d+)",
            r"Process exited with code\s+(\d+)",
            r#""exit_code"\s*:\s*(\d+)"#,
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// Exit code reported in a tool output. The first pattern that matches decides.
pub fn parse_exit_code(output: &str) -> Option<i64> {
    let caps = exit_code_patterns()
        .iter()
        .find_map(|pattern| pattern.captures(output))?;
    caps.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shell_call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            kind: ToolKind::Function,
            call_id: Some("c1".into()),
            name: Some(name.into()),
            arguments: Some(arguments),
            completed: false,
        }
    }

    #[test]
    fn test_extract_command_string_and_argv() {
        let encoded = shell_call(
            "shell_command",
            Value::String(r#"{"command":"git commit -m x"}"#.into()),
        );
        assert_eq!(extract_command(&encoded).as_deref(), Some("git commit -m x"));

        let script = shell_call("shell", json!({"command": ["bash", "-lc", "git add . && git commit -m y"]}));
        assert_eq!(
            extract_command(&script).as_deref(),
            Some("git add . && git commit -m y")
        );

        let argv = shell_call("exec_command", json!({"cmd": ["git", "commit", "-m", "two words"]}));
        let rejoined = extract_command(&argv).unwrap();
        assert_eq!(
            shlex::split(&rejoined),
            Some(vec!["git".into(), "commit".into(), "-m".into(), "two words".into()])
        );
    }

    #[test]
    fn test_extract_command_ignores_other_tools() {
        let other = shell_call("apply_patch", json!({"command": "git commit"}));
        assert_eq!(extract_command(&other), None);

        let mut custom = shell_call("shell", json!({"command": "git commit"}));
        custom.kind = ToolKind::Custom;
        assert_eq!(extract_command(&custom), None);

        let garbled = shell_call("shell", Value::String("{oops".into()));
        assert_eq!(extract_command(&garbled), None);
    }

    #[test]
    fn test_git_commit_detection() {
        assert!(has_git_commit("git commit -m 'msg'"));
        assert!(has_git_commit("git -C repo commit --amend"));
        assert!(has_git_commit("/usr/bin/git commit"));
        assert!(has_git_commit("cargo fmt && git add -A && git commit -m done"));
        assert!(has_git_commit("echo hi; git commit"));

        assert!(!has_git_commit("git status"));
        assert!(!has_git_commit("echo commit | git log"));
        assert!(!has_git_commit("gitk commit"));
    }

    #[test]
    fn test_git_commit_after_unspaced_separator() {
        assert!(has_git_commit("git add .;git commit -m x"));
        assert!(has_git_commit("make&&git commit -m y"));
        assert!(has_git_commit("false||git commit"));
        assert!(has_git_commit("echo \"a b\"&&git commit"));
        assert!(has_git_commit("git commit -m x 2>&1"));

        assert!(!has_git_commit("echo 'a;git commit'"));
        assert!(!has_git_commit("echo \"x&&git commit\""));
        assert!(!has_git_commit("git log|grep commit"));
    }

    #[test]
    fn test_space_operators_keeps_quoted_text() {
        assert_eq!(space_operators("a;b"), "a ; b");
        assert_eq!(space_operators("a&&b"), "a && b");
        assert_eq!(space_operators("a 'x;y' \\;b"), "a 'x;y' \\;b");
    }

    #[test]
    fn test_unbalanced_quotes_fall_back_to_substring() {
        assert!(has_git_commit("git commit -m \"unterminated"));
        assert!(!has_git_commit("git status \"unterminated"));
    }

    #[test]
    fn test_parse_exit_code() {
        assert_eq!(parse_exit_code("Exit code: 0\nWall time: 1s"), Some(0));
        assert_eq!(parse_exit_code("Process exited with code 128"), Some(128));
        assert_eq!(parse_exit_code(r#"{"output":"","metadata":{"exit_code": 1}}"#), Some(1));
        assert_eq!(parse_exit_code("no status here"), None);
    }
}
