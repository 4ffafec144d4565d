//! Session Aggregator - one low-confidence summary signal per finished session

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

use super::signal::{SignalDraft, SignalSource, SignalType};
use crate::transcript::TranscriptEntry;
use crate::truncate_chars;

/// Hook name recorded on summary signals
pub const SUMMARY_HOOK: &str = "SessionEnd";

const MAX_TOOLS: usize = 10;
const MAX_FILES: usize = 20;
const FILES_IN_CONTENT: usize = 5;
const CONTENT_LIMIT: usize = 200;
const CONTEXT_LIMIT: usize = 500;

/// Lightweight metadata about a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// User and assistant entries
    pub turn_count: usize,
    /// Most used tools, highest count first
    #[serde(serialize_with = "ordered_counts")]
    pub tools_used: Vec<(String, usize)>,
    /// Sorted distinct file paths from tool inputs
    pub files_touched: Vec<String>,
}

fn ordered_counts<S: Serializer>(counts: &[(String, usize)], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(counts.iter().map(|(k, v)| (k, v)))
}

/// Aggregate turn, tool and file statistics over a transcript
pub fn summarize(transcript: &[TranscriptEntry]) -> SessionSummary {
    let mut turn_count = 0;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();
    let mut files = BTreeSet::new();

    for entry in transcript {
        if entry.role.is_turn() {
            turn_count += 1;
        }
        let Some(tool) = entry.tool_use.as_ref() else {
            continue;
        };
        let name = tool.name();
        if name.is_empty() {
            continue;
        }
        let count = counts.entry(name).or_insert(0);
        if *count == 0 {
            first_seen.push(name);
        }
        *count += 1;
        files.extend(tool.touched_files());
    }

    let mut tools_used: Vec<(String, usize)> = first_seen
        .into_iter()
        .map(|name| (name.to_string(), counts[name]))
        .collect();
    // Stable sort keeps first-seen order among ties
    tools_used.sort_by(|a, b| b.1.cmp(&a.1));
    tools_used.truncate(MAX_TOOLS);

    SessionSummary {
        turn_count,
        tools_used,
        files_touched: files.into_iter().take(MAX_FILES).collect(),
    }
}

impl SessionSummary {
    /// One-line human readable form used as signal content
    pub fn content(&self) -> String {
        let tools = self
            .tools_used
            .iter()
            .map(|(name, count)| format!("{}({})", name, count))
            .collect::<Vec<_>>()
            .join(", ");

        let mut files = self
            .files_touched
            .iter()
            .take(FILES_IN_CONTENT)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if self.files_touched.len() > FILES_IN_CONTENT {
            files.push_str(&format!(" (+{} more)", self.files_touched.len() - FILES_IN_CONTENT));
        }

        format!("Session: {} turns. Tools: {}. Files: {}", self.turn_count, tools, files)
    }

    /// Summary as a draft ready for the store
    ///
    /// Content and context are capped; `meta` keeps the full summary.
    pub fn to_draft(&self, session_id: &str) -> SignalDraft {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        let meta = match &value {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        SignalDraft::captured(
            SignalType::Summary,
            1,
            SignalSource::hook(SUMMARY_HOOK),
            truncate_chars(&self.content(), CONTENT_LIMIT),
            truncate_chars(&value.to_string(), CONTEXT_LIMIT),
            session_id,
        )
        .with_meta(meta)
    }
}

/// Summary draft for a transcript, `None` when there is nothing to summarize
pub fn summary_signal(transcript: &[TranscriptEntry], session_id: &str) -> Option<SignalDraft> {
    if transcript.is_empty() {
        return None;
    }
    Some(summarize(transcript).to_draft(session_id))
}
