//! Transcript Reader - parses session transcripts written by the host
//!
//! A transcript is newline-delimited JSON, one entry per line. Malformed
//! lines are skipped individually; a missing or unreadable file is treated
//! as an empty transcript so capture never fails the surrounding session.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

use crate::types::Role;

/// Default number of most recent entries kept from a transcript
pub const DEFAULT_MAX_ENTRIES: usize = 200;

/// A single transcript entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptEntry {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default, deserialize_with = "lenient_tool_use")]
    pub tool_use: Option<ToolUse>,
}

impl TranscriptEntry {
    /// Build a plain text entry
    pub fn text(role: Role, content: &str) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.to_string()),
            tool_use: None,
        }
    }

    /// Build an entry carrying a tool invocation
    pub fn tool(role: Role, tool_use: ToolUse) -> Self {
        Self {
            role,
            content: MessageContent::default(),
            tool_use: Some(tool_use),
        }
    }

    /// Concatenated text of the entry
    pub fn text_content(&self) -> String {
        self.content.text()
    }

    /// The tool invocation, if it carries any data
    pub fn tool_call(&self) -> Option<&ToolUse> {
        self.tool_use.as_ref().filter(|t| !t.is_empty())
    }
}

/// Message content: a plain string or a list of typed blocks
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<Value>),
    Other(Value),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl MessageContent {
    /// Plain text of the content; non-text blocks are ignored
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| {
                    let obj = block.as_object()?;
                    if obj.get("type").and_then(Value::as_str) != Some("text") {
                        return None;
                    }
                    Some(obj.get("text").and_then(Value::as_str).unwrap_or(""))
                })
                .collect::<Vec<_>>()
                .join(" "),
            MessageContent::Other(_) => String::new(),
        }
    }
}

/// A tool invocation recorded in the transcript
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolUse {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Value,
}

impl ToolUse {
    /// Create a tool invocation with the given name
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Value::String(error.to_string());
        self
    }

    pub fn with_result(mut self, result: &str) -> Self {
        self.result = Value::String(result.to_string());
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Tool name, or an empty string when absent
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// True when the invocation carries no data at all
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.input.is_null() && self.result.is_null() && self.error.is_null()
    }

    /// The error text, when the invocation failed
    pub fn error_text(&self) -> Option<String> {
        if !is_truthy(&self.error) {
            return None;
        }
        match &self.error {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Whether a search result means "nothing found"
    pub fn result_is_empty(&self) -> bool {
        match &self.result {
            Value::Null | Value::Bool(false) => true,
            Value::String(s) => s.is_empty() || s.trim() == "[]" || s.contains("No matches"),
            Value::Array(items) => items.is_empty() || self.result.to_string().contains("No matches"),
            other => other.to_string().contains("No matches"),
        }
    }

    /// File paths referenced by the tool input
    pub fn touched_files(&self) -> Vec<String> {
        let Some(input) = self.input.as_object() else {
            return Vec::new();
        };
        ["file_path", "path", "file"]
            .iter()
            .filter_map(|key| input.get(*key))
            .filter(|v| is_truthy(v))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

/// A user-authored message with its position in the transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    pub index: usize,
    pub text: String,
}

/// Extract non-empty user messages in transcript order
pub fn user_messages(entries: &[TranscriptEntry]) -> Vec<UserMessage> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.role == Role::User)
        .filter_map(|(index, entry)| {
            let text = entry.text_content();
            (!text.is_empty()).then_some(UserMessage { index, text })
        })
        .collect()
}

/// Parse transcript lines, skipping blank and malformed ones
pub fn parse_lines<R: BufRead>(reader: R) -> Vec<TranscriptEntry> {
    let mut entries = Vec::new();
    let mut skipped = 0usize;

    for line in reader.lines() {
        let Ok(line) = line else {
            skipped += 1;
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<TranscriptEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!("Skipped {} malformed transcript lines", skipped);
    }
    entries
}

/// Read a transcript file, keeping only the last `max_entries` entries
pub fn read_transcript(path: &Path, max_entries: usize) -> Vec<TranscriptEntry> {
    if !path.exists() {
        debug!("Transcript {} does not exist", path.display());
        return Vec::new();
    }

    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Failed to open transcript {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let mut entries = parse_lines(BufReader::new(file));
    if entries.len() > max_entries {
        entries.drain(..entries.len() - max_entries);
    }
    entries
}

fn lenient_tool_use<'de, D>(deserializer: D) -> Result<Option<ToolUse>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value::<ToolUse>(v).ok()))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_skips_malformed_lines() {
        let input = "{\"role\": \"user\", \"content\": \"hello\"}\nnot json\n\n{\"role\": \"assistant\", \"content\": \"hi there\"}\n";
        let entries = parse_lines(input.as_bytes());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[1].text_content(), "hi there");
    }

    #[test]
    fn test_block_content_joins_text_blocks() {
        let line = json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "first"},
                {"type": "image", "source": "..."},
                {"type": "text", "text": "second"}
            ]
        })
        .to_string();
        let entries = parse_lines(line.as_bytes());
        assert_eq!(entries[0].text_content(), "first second");
    }

    #[test]
    fn test_non_object_tool_use_is_ignored() {
        let line = json!({"role": "assistant", "tool_use": "Bash"}).to_string();
        let entries = parse_lines(line.as_bytes());
        assert_eq!(entries.len(), 1);
        assert!(entries[0].tool_call().is_none());
    }

    #[test]
    fn test_error_text_truthiness() {
        assert!(ToolUse::named("Bash").error_text().is_none());
        assert!(ToolUse::named("Bash").with_error("").error_text().is_none());
        assert_eq!(
            ToolUse::named("Bash").with_error("exit 1").error_text().as_deref(),
            Some("exit 1")
        );
    }

    #[test]
    fn test_result_is_empty() {
        assert!(ToolUse::named("Grep").result_is_empty());
        assert!(ToolUse::named("Grep").with_result(" [] ").result_is_empty());
        assert!(ToolUse::named("Grep").with_result("No matches found").result_is_empty());
        assert!(!ToolUse::named("Grep").with_result("src/main.rs").result_is_empty());
    }

    #[test]
    fn test_touched_files() {
        let tool = ToolUse::named("Edit").with_input(json!({"file_path": "src/lib.rs", "path": ""}));
        assert_eq!(tool.touched_files(), vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn test_user_messages_skip_empty() {
        let entries = vec![
            TranscriptEntry::text(Role::User, ""),
            TranscriptEntry::text(Role::Assistant, "ok"),
            TranscriptEntry::text(Role::User, "do it"),
        ];
        let messages = user_messages(&entries);
        assert_eq!(messages, vec![UserMessage { index: 2, text: "do it".to_string() }]);
    }

    #[test]
    fn test_read_transcript_bounds_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.jsonl");
        let lines: Vec<String> = (0..10)
            .map(|i| json!({"role": "user", "content": format!("message {}", i)}).to_string())
            .collect();
        std::fs::write(&path, lines.join("\n")).unwrap();

        let entries = read_transcript(&path, 3);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].text_content(), "message 7");
        assert_eq!(entries[2].text_content(), "message 9");
    }

    #[test]
    fn test_read_missing_transcript() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_transcript(&dir.path().join("missing.jsonl"), DEFAULT_MAX_ENTRIES).is_empty());
    }
}
