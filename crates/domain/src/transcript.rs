//! Canonical transcript model.
//!
//! Both agent loops assemble their conversation into this one shape; the
//! result store converts it to the persisted `messages.json` format at the
//! disk boundary. A transcript is prefix-closed: truncating trailing
//! messages always leaves a valid transcript.

use serde::{Deserialize, Serialize};

/// One message in an agent execution transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptMessage {
    SystemText { text: String },
    UserText { text: String },
    AssistantText { text: String },
    /// The assistant requested a tool invocation. `arguments` is the
    /// JSON-encoded argument object exactly as the model produced it.
    AssistantToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    /// The result of a tool invocation, keyed back to its call.
    ToolResult { call_id: String, text: String },
}

impl TranscriptMessage {
    pub fn system(text: impl Into<String>) -> Self {
        TranscriptMessage::SystemText { text: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        TranscriptMessage::UserText { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        TranscriptMessage::AssistantText { text: text.into() }
    }

    pub fn tool_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        TranscriptMessage::AssistantToolCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        TranscriptMessage::ToolResult {
            call_id: call_id.into(),
            text: text.into(),
        }
    }
}

/// Check that every tool call in `messages` is answered by at most one
/// result with the same `call_id`, and that results never precede their
/// calls. A trailing unanswered call is legal (the loop may have been cut
/// off mid-turn).
pub fn tool_calls_well_formed(messages: &[TranscriptMessage]) -> bool {
    let mut open: Vec<&str> = Vec::new();
    let mut answered: Vec<&str> = Vec::new();
    for msg in messages {
        match msg {
            TranscriptMessage::AssistantToolCall { call_id, .. } => {
                if open.contains(&call_id.as_str()) || answered.contains(&call_id.as_str()) {
                    return false;
                }
                open.push(call_id);
            }
            TranscriptMessage::ToolResult { call_id, .. } => {
                match open.iter().position(|id| *id == call_id.as_str()) {
                    Some(pos) => {
                        open.remove(pos);
                        answered.push(call_id);
                    }
                    None => return false,
                }
            }
            _ => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_call_result_pairs() {
        let t = vec![
            TranscriptMessage::user("do the thing"),
            TranscriptMessage::tool_call("call_1", "read_file", r#"{"path":"a.txt"}"#),
            TranscriptMessage::tool_result("call_1", "contents"),
            TranscriptMessage::assistant("done"),
        ];
        assert!(tool_calls_well_formed(&t));
    }

    #[test]
    fn trailing_unanswered_call_is_legal() {
        let t = vec![
            TranscriptMessage::user("go"),
            TranscriptMessage::tool_call("call_1", "write_file", "{}"),
        ];
        assert!(tool_calls_well_formed(&t));
    }

    #[test]
    fn duplicate_result_rejected() {
        let t = vec![
            TranscriptMessage::tool_call("call_1", "x", "{}"),
            TranscriptMessage::tool_result("call_1", "a"),
            TranscriptMessage::tool_result("call_1", "b"),
        ];
        assert!(!tool_calls_well_formed(&t));
    }

    #[test]
    fn orphan_result_rejected() {
        let t = vec![TranscriptMessage::tool_result("call_9", "ghost")];
        assert!(!tool_calls_well_formed(&t));
    }

    #[test]
    fn prefixes_stay_well_formed() {
        let t = vec![
            TranscriptMessage::user("go"),
            TranscriptMessage::tool_call("c1", "a", "{}"),
            TranscriptMessage::tool_result("c1", "ok"),
            TranscriptMessage::tool_call("c2", "b", "{}"),
            TranscriptMessage::tool_result("c2", "ok"),
        ];
        for n in 0..=t.len() {
            assert!(tool_calls_well_formed(&t[..n]));
        }
    }

    #[test]
    fn serde_tagging() {
        let msg = TranscriptMessage::tool_call("c1", "query", r#"{"sql":"select 1"}"#);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""kind":"assistant_tool_call""#));
        let back: TranscriptMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
