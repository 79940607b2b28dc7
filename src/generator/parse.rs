// SPDX-License-Identifier: MIT
//! Layered parsing of generator replies.
//!
//! Models wrap JSON in markdown fences, leave raw newlines inside string
//! fields, and under-escape backslashes in generated code. Each layer here
//! recovers one class of damage; only when all of them fail does the reply
//! count as malformed.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::GenerationReply;
use crate::error::HostError;

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid regex"));
static ANY_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```\s*(.*?)\s*```").expect("valid regex"));
static MESSAGE_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""message"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid regex"));
static THINKING_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""thinking"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid regex"));

/// Parse the raw reply text into a [`GenerationReply`].
pub fn parse_reply(text: &str) -> Result<GenerationReply, HostError> {
    let candidate = extract_json_block(text);

    if let Ok(reply) = serde_json::from_str::<GenerationReply>(candidate) {
        return Ok(reply);
    }

    let repaired = repair_json(candidate);
    if let Ok(reply) = serde_json::from_str::<GenerationReply>(&repaired) {
        debug!("generator reply needed escape repair");
        return Ok(reply);
    }

    // Last resort: salvage the human-readable fields so the user at least
    // sees the model's message instead of a parse error.
    if let Some(message) = capture(&MESSAGE_FIELD, text) {
        warn!("generator reply unparseable — salvaged message field only");
        return Ok(GenerationReply {
            thinking: capture(&THINKING_FIELD, text).unwrap_or_default(),
            actions: Vec::new(),
            message,
            completed: true,
            needs_more_info: false,
        });
    }

    Err(HostError::ExternalService(
        "reply was not parseable JSON".to_string(),
    ))
}

/// Prefer the ```json fenced block, then any fenced block, then the whole
/// trimmed text.
fn extract_json_block(text: &str) -> &str {
    for fence in [&*JSON_FENCE, &*ANY_FENCE] {
        if let Some(caps) = fence.captures(text) {
            if let Some(m) = caps.get(1) {
                return m.as_str();
            }
        }
    }
    text.trim()
}

/// Fix the two escaping mistakes models make inside string values: raw
/// control characters (actual newlines/tabs in `content` fields) and lone
/// backslashes that are not part of a valid escape sequence.
fn repair_json(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }
        match c {
            '\\' => match chars.peek() {
                Some(&next) if matches!(next, '"' | '\\' | '/' | 'n' | 'r' | 't' | 'b' | 'f' | 'u') => {
                    out.push('\\');
                    out.push(next);
                    chars.next();
                }
                _ => out.push_str("\\\\"),
            },
            '"' => {
                in_string = false;
                out.push('"');
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("\\n", "\n").replace("\\\"", "\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::AgentAction;

    #[test]
    fn clean_fenced_reply_parses() {
        let raw = r#"Here you go:
```json
{"thinking": "simple page", "actions": [{"type": "create_file", "path": "index.html", "content": "<h1>hi</h1>"}], "message": "done", "completed": true}
```"#;
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.message, "done");
        assert!(reply.completed);
        assert_eq!(reply.actions.len(), 1);
        assert!(matches!(&reply.actions[0], AgentAction::CreateFile { path, .. } if path == "index.html"));
    }

    #[test]
    fn unfenced_reply_parses() {
        let raw = r#"{"thinking": "", "actions": [], "message": "ok", "completed": false}"#;
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.message, "ok");
        assert!(!reply.completed);
    }

    #[test]
    fn raw_newlines_inside_content_are_repaired() {
        let raw = "{\"thinking\": \"\", \"actions\": [{\"type\": \"create_file\", \"path\": \"a.css\", \"content\": \"body {\n  margin: 0;\n}\"}], \"message\": \"ok\", \"completed\": true}";
        let reply = parse_reply(raw).unwrap();
        let AgentAction::CreateFile { content, .. } = &reply.actions[0] else {
            panic!("expected create_file");
        };
        assert!(content.contains("margin: 0;"));
        assert!(content.contains('\n'));
    }

    #[test]
    fn stray_backslash_is_repaired() {
        let raw = r#"{"thinking": "", "actions": [], "message": "use C:\Users\me", "completed": true}"#;
        let reply = parse_reply(raw).unwrap();
        assert!(reply.message.contains("Users"));
    }

    #[test]
    fn hopeless_reply_salvages_message_field() {
        // Truncated JSON — actions cut off mid-array.
        let raw = r#"{"thinking": "plan", "message": "built your landing page", "actions": [{"type": "create_fi"#;
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.message, "built your landing page");
        assert_eq!(reply.thinking, "plan");
        assert!(reply.actions.is_empty());
    }

    #[test]
    fn garbage_is_an_external_service_error() {
        let err = parse_reply("I cannot help with that.").unwrap_err();
        assert!(matches!(err, HostError::ExternalService(_)));
    }

    #[test]
    fn missing_fields_default() {
        let reply = parse_reply(r#"{"message": "hi"}"#).unwrap();
        assert!(reply.actions.is_empty());
        assert!(!reply.completed);
        assert_eq!(reply.thinking, "");
    }
}
