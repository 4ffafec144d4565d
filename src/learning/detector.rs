//! Signal Detector - heuristic extraction of learning signals from transcripts
//!
//! Each detector is an independent pure function over the transcript and the
//! user messages pulled out of it. Detectors own their pattern tables so they
//! can be tuned without touching one another.

use regex::Regex;
use serde_json::{json, Map};
use std::sync::LazyLock;
use tracing::debug;

use super::signal::{SignalDraft, SignalSource, SignalType};
use crate::transcript::{user_messages, TranscriptEntry, UserMessage};
use crate::truncate_chars;
use crate::types::Role;

/// Hook name recorded on signals extracted from a transcript
pub const CAPTURE_HOOK: &str = "PreCompact";

/// Maximum characters of a message kept as signal content
const CONTENT_LIMIT: usize = 200;
/// Maximum characters of a message kept as signal context
const CONTEXT_LIMIT: usize = 500;
/// Maximum characters of a message quoted in a positive reinforcement signal
const POSITIVE_QUOTE_LIMIT: usize = 150;
/// Maximum backtick commands captured per message
const MAX_COMMANDS_PER_MESSAGE: usize = 3;
/// How many entries back to look for the assistant action being praised
const POSITIVE_LOOKBACK: usize = 4;
/// Assistant text longer than this counts as a substantive reply
const SUBSTANTIVE_REPLY_CHARS: usize = 20;
/// Consecutive empty searches that count as thrashing
const SEARCH_THRASH_THRESHOLD: usize = 3;
/// Tools whose empty results indicate search friction
const SEARCH_TOOLS: &[&str] = &["Glob", "Grep"];

/// Patterns that indicate the user is correcting the assistant
static CORRECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\bno,\s",
        r"\bnope\b",
        r"\bwrong\b",
        r"\bincorrect\b",
        r"that['’]s not right",
        r"not quite",
        r"\bactually[,\s]",
        r"\binstead\b",
        r"\brather\b",
        r"should be\b",
        r"supposed to be",
        r"meant to\b",
        r"\bi meant\b",
        r"don['’]t use\b",
        r"stop using\b",
        r"switch to\b",
        r"prefer \w+ over",
        r"we don['’]t do that",
        r"that['’]s outdated",
        r"that changed",
        r"not anymore",
        r"\bdeprecated\b",
    ])
});

/// "use X instead of Y" names both the rejected and the accepted tool
static WORKFLOW_CORRECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)use\s+(\w+)\s+instead\s+of\s+(\w+)").unwrap());

/// Patterns that declare a project convention
static CONVENTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"always use\b",
        r"never use\b",
        r"we prefer\b",
        r"our convention",
        r"our standard",
        r"the convention is",
        r"the pattern is",
        r"in this project",
        r"in this repo",
        r"in this codebase",
        r"around here",
        r"on this team",
        r"naming convention",
        r"file structure",
        r"folder structure",
        r"we put \w+ in",
        r"\w+ goes? in\b",
        r"we keep \w+ in",
        r"we follow\b",
        r"we stick to\b",
        r"house rule",
        r"code style",
        r"our approach",
    ])
});

static BACKTICK_SPAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());

static RUN_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\brun\b").unwrap());

static POSITIVE_STRONG: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\bperfect\b",
        r"\bexactly\b",
        r"exactly right",
        r"that['’]s it\b",
        r"nailed it",
        r"spot on",
        r"love it",
    ])
});

static POSITIVE_MODERATE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\bgreat\b",
        r"\bnice\b",
        r"looks good",
        r"that works\b",
        r"that['’]s correct",
        r"yes that['’]s right",
        r"good approach",
        r"\bawesome\b",
        r"\bbrilliant\b",
        r"\bexcellent\b",
        r"well done",
        r"much better",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
        .collect()
}

fn matches_any(text: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

/// Everything a detector may look at
pub struct DetectionInput<'a> {
    pub transcript: &'a [TranscriptEntry],
    pub messages: &'a [UserMessage],
    pub session_id: &'a str,
    pub hook: &'a str,
}

impl DetectionInput<'_> {
    fn message_source(&self, message: &UserMessage) -> SignalSource {
        SignalSource::at_turn(self.hook, message.index)
    }
}

/// A detector turns a transcript into zero or more drafts
pub type DetectorFn = fn(&DetectionInput<'_>) -> Vec<SignalDraft>;

/// All detectors, evaluated independently and in this order
pub const DETECTORS: &[(&str, DetectorFn)] = &[
    ("correction", detect_corrections),
    ("convention", detect_conventions),
    ("command", detect_commands),
    ("positive_reinforcement", detect_positive_reinforcement),
    ("repeated_failure", detect_repeated_failures),
    ("search_thrashing", detect_search_thrashing),
];

/// Runs every detector over a transcript
pub struct SignalExtractor {
    hook: String,
}

impl Default for SignalExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalExtractor {
    /// Create an extractor tagging signals with the capture hook name
    pub fn new() -> Self {
        Self {
            hook: CAPTURE_HOOK.to_string(),
        }
    }

    /// Extract signal drafts from an ordered transcript
    pub fn extract(&self, transcript: &[TranscriptEntry], session_id: &str) -> Vec<SignalDraft> {
        let messages = user_messages(transcript);
        let input = DetectionInput {
            transcript,
            messages: &messages,
            session_id,
            hook: &self.hook,
        };

        let mut drafts = Vec::new();
        for (name, detector) in DETECTORS {
            let found = detector(&input);
            if !found.is_empty() {
                debug!("Detector '{}' produced {} signals", name, found.len());
            }
            drafts.extend(found);
        }
        drafts
    }
}

/// Extract signals with the default capture hook
pub fn extract_signals(transcript: &[TranscriptEntry], session_id: &str) -> Vec<SignalDraft> {
    SignalExtractor::new().extract(transcript, session_id)
}

/// User corrections; "use X instead of Y" is the strongest form
pub fn detect_corrections(input: &DetectionInput<'_>) -> Vec<SignalDraft> {
    input
        .messages
        .iter()
        .filter(|m| matches_any(&m.text, &CORRECTION_PATTERNS))
        .map(|m| {
            let confidence = if WORKFLOW_CORRECTION.is_match(&m.text) { 3 } else { 2 };
            SignalDraft::captured(
                SignalType::Correction,
                confidence,
                input.message_source(m),
                truncate_chars(&m.text, CONTENT_LIMIT),
                truncate_chars(&m.text, CONTEXT_LIMIT),
                input.session_id,
            )
        })
        .collect()
}

/// Declared project conventions
pub fn detect_conventions(input: &DetectionInput<'_>) -> Vec<SignalDraft> {
    input
        .messages
        .iter()
        .filter(|m| matches_any(&m.text, &CONVENTION_PATTERNS))
        .map(|m| {
            SignalDraft::captured(
                SignalType::Convention,
                2,
                input.message_source(m),
                truncate_chars(&m.text, CONTENT_LIMIT),
                truncate_chars(&m.text, CONTEXT_LIMIT),
                input.session_id,
            )
        })
        .collect()
}

/// Backtick commands the user asks to run
pub fn detect_commands(input: &DetectionInput<'_>) -> Vec<SignalDraft> {
    let mut drafts = Vec::new();
    for m in input.messages {
        if !RUN_WORD.is_match(&m.text) {
            continue;
        }
        for cap in BACKTICK_SPAN.captures_iter(&m.text).take(MAX_COMMANDS_PER_MESSAGE) {
            drafts.push(SignalDraft::captured(
                SignalType::Command,
                2,
                input.message_source(m),
                &cap[1],
                truncate_chars(&m.text, CONTEXT_LIMIT),
                input.session_id,
            ));
        }
    }
    drafts
}

/// Praise that follows a substantive assistant action
pub fn detect_positive_reinforcement(input: &DetectionInput<'_>) -> Vec<SignalDraft> {
    input
        .messages
        .iter()
        .filter(|m| follows_assistant_action(input.transcript, m.index))
        .filter(|m| matches_any(&m.text, &POSITIVE_STRONG) || matches_any(&m.text, &POSITIVE_MODERATE))
        .map(|m| {
            SignalDraft::captured(
                SignalType::Pattern,
                1,
                input.message_source(m),
                format!(
                    "Positive reinforcement: {}",
                    truncate_chars(&m.text, POSITIVE_QUOTE_LIMIT)
                ),
                truncate_chars(&m.text, CONTEXT_LIMIT),
                input.session_id,
            )
        })
        .collect()
}

/// Whether one of the few entries before `index` is a substantive assistant action
fn follows_assistant_action(transcript: &[TranscriptEntry], index: usize) -> bool {
    let start = index.saturating_sub(POSITIVE_LOOKBACK);
    transcript[start..index.min(transcript.len())]
        .iter()
        .rev()
        .filter(|entry| entry.role == Role::Assistant)
        .any(|entry| {
            entry.tool_call().is_some()
                || entry.text_content().chars().count() > SUBSTANTIVE_REPLY_CHARS
        })
}

/// A run of consecutive failures of the same tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRun {
    pub tool: String,
    pub count: usize,
    pub first_error: String,
}

/// Collect runs of two or more consecutive failures of the same tool
pub fn failure_runs(transcript: &[TranscriptEntry]) -> Vec<FailureRun> {
    let mut runs = Vec::new();
    let mut current: Option<FailureRun> = None;

    for entry in transcript {
        let failed = entry.tool_call().and_then(|tool| {
            let error = tool.error_text()?;
            let name = if tool.name().is_empty() { "unknown" } else { tool.name() };
            Some((name.to_string(), error))
        });

        let Some((name, error)) = failed else {
            close_run(&mut current, &mut runs);
            continue;
        };

        if let Some(run) = current.as_mut() {
            if run.tool == name {
                run.count += 1;
                continue;
            }
        }
        close_run(&mut current, &mut runs);
        current = Some(FailureRun {
            tool: name,
            count: 1,
            first_error: error,
        });
    }

    close_run(&mut current, &mut runs);
    runs
}

fn close_run(current: &mut Option<FailureRun>, runs: &mut Vec<FailureRun>) {
    if let Some(done) = current.take().filter(|r| r.count >= 2) {
        runs.push(done);
    }
}

/// The same tool failing two or more times in a row
pub fn detect_repeated_failures(input: &DetectionInput<'_>) -> Vec<SignalDraft> {
    failure_runs(input.transcript)
        .into_iter()
        .map(|run| {
            let error = truncate_chars(&run.first_error, CONTENT_LIMIT);
            SignalDraft::captured(
                SignalType::Failure,
                2,
                SignalSource::hook(input.hook),
                format!(
                    "{} failed {} times consecutively: {}",
                    run.tool,
                    run.count,
                    truncate_chars(&error, 100)
                ),
                error,
                input.session_id,
            )
            .with_tags(vec![run.tool])
        })
        .collect()
}

/// Length of the first run of empty searches reaching the threshold
pub fn search_thrashing_run(transcript: &[TranscriptEntry]) -> Option<usize> {
    let mut empty_searches = 0usize;

    for entry in transcript {
        let search = entry
            .tool_call()
            .filter(|tool| SEARCH_TOOLS.contains(&tool.name()));
        match search {
            Some(tool) if tool.result_is_empty() => empty_searches += 1,
            _ => {
                if empty_searches >= SEARCH_THRASH_THRESHOLD {
                    return Some(empty_searches);
                }
                empty_searches = 0;
            }
        }
    }

    (empty_searches >= SEARCH_THRASH_THRESHOLD).then_some(empty_searches)
}

/// Repeated empty searches suggest the project layout is confusing
pub fn detect_search_thrashing(input: &DetectionInput<'_>) -> Vec<SignalDraft> {
    let Some(run) = search_thrashing_run(input.transcript) else {
        return Vec::new();
    };

    let mut meta = Map::new();
    meta.insert("empty_searches".to_string(), json!(run));

    vec![SignalDraft::captured(
        SignalType::ProjectFriction,
        1,
        SignalSource::hook(input.hook),
        "Multiple search attempts before finding target: possible structural confusion",
        format!(
            "{}+ {} calls with empty results before locating the file",
            SEARCH_THRASH_THRESHOLD,
            SEARCH_TOOLS.join("/")
        ),
        input.session_id,
    )
    .with_meta(meta)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::ToolUse;

    fn user(text: &str) -> TranscriptEntry {
        TranscriptEntry::text(Role::User, text)
    }

    fn assistant(text: &str) -> TranscriptEntry {
        TranscriptEntry::text(Role::Assistant, text)
    }

    fn tool(tool_use: ToolUse) -> TranscriptEntry {
        TranscriptEntry::tool(Role::Assistant, tool_use)
    }

    fn of_type(drafts: &[SignalDraft], signal_type: SignalType) -> Vec<SignalDraft> {
        drafts.iter().filter(|d| d.signal_type == signal_type).cloned().collect()
    }

    #[test]
    fn test_detects_no_correction() {
        let transcript = vec![
            assistant("I'll use npm to install."),
            user("No, use pnpm not npm in this project"),
        ];
        let drafts = extract_signals(&transcript, "test-sess");
        let corrections = of_type(&drafts, SignalType::Correction);
        assert_eq!(corrections.len(), 1);
        assert!(corrections[0].context.contains("pnpm"));
        assert_eq!(corrections[0].confidence, 2);
        assert_eq!(corrections[0].source, SignalSource::at_turn(CAPTURE_HOOK, 1));
    }

    #[test]
    fn test_one_message_yields_correction_and_convention() {
        let transcript = vec![user("No, use pnpm not npm in this project")];
        let drafts = extract_signals(&transcript, "s");
        assert_eq!(of_type(&drafts, SignalType::Correction).len(), 1);
        assert_eq!(of_type(&drafts, SignalType::Convention).len(), 1);
    }

    #[test]
    fn test_detects_actually_correction() {
        let transcript = vec![
            assistant("The config is in /opt."),
            user("Actually, the config file is in /etc"),
        ];
        let drafts = extract_signals(&transcript, "s");
        assert!(!of_type(&drafts, SignalType::Correction).is_empty());
    }

    #[test]
    fn test_workflow_correction_high_confidence() {
        let transcript = vec![
            assistant("Running grep to search."),
            user("Use rg instead of grep, it's faster"),
        ];
        let drafts = extract_signals(&transcript, "s");
        let corrections = of_type(&drafts, SignalType::Correction);
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].confidence, 3);
    }

    #[test]
    fn test_assistant_text_never_triggers_message_detectors() {
        let transcript = vec![assistant("No, that's wrong. We always use tabs in this project.")];
        let drafts = extract_signals(&transcript, "s");
        assert!(drafts.is_empty());
    }

    #[test]
    fn test_correction_truncates_by_characters() {
        let long = format!("Actually, {}", "é".repeat(600));
        let drafts = extract_signals(&[user(&long)], "s");
        let correction = &of_type(&drafts, SignalType::Correction)[0];
        assert_eq!(correction.content.chars().count(), 200);
        assert_eq!(correction.context.chars().count(), 500);
    }

    #[test]
    fn test_detects_conventions() {
        let drafts = extract_signals(&[user("We always use absolute imports in this project")], "s");
        assert_eq!(of_type(&drafts, SignalType::Convention).len(), 1);

        let drafts = extract_signals(&[user("Our naming convention is camelCase for files")], "s");
        assert_eq!(of_type(&drafts, SignalType::Convention).len(), 1);
    }

    #[test]
    fn test_detects_backtick_command() {
        let drafts = extract_signals(&[user("Run `pnpm test:unit` to run the tests")], "s");
        let commands = of_type(&drafts, SignalType::Command);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].content, "pnpm test:unit");
        assert_eq!(commands[0].context, "Run `pnpm test:unit` to run the tests");
    }

    #[test]
    fn test_commands_capped_at_three() {
        let drafts = extract_signals(&[user("run `a` then `b` then `c` then `d`")], "s");
        let commands: Vec<String> = of_type(&drafts, SignalType::Command)
            .into_iter()
            .map(|d| d.content)
            .collect();
        assert_eq!(commands, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_backticks_without_run_are_ignored() {
        let drafts = extract_signals(&[user("the file `main.rs` is running fine")], "s");
        assert!(of_type(&drafts, SignalType::Command).is_empty());
    }

    #[test]
    fn test_strong_positive_after_action() {
        let transcript = vec![
            tool(ToolUse::named("Edit")),
            user("Perfect, that's exactly what I wanted"),
        ];
        let drafts = extract_signals(&transcript, "s");
        let patterns = of_type(&drafts, SignalType::Pattern);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].confidence, 1);
        assert!(patterns[0].content.starts_with("Positive reinforcement: Perfect"));
    }

    #[test]
    fn test_moderate_positive_after_substantive_reply() {
        let transcript = vec![
            assistant("I've refactored the auth module."),
            user("nice, looks good"),
        ];
        let drafts = extract_signals(&transcript, "s");
        assert_eq!(of_type(&drafts, SignalType::Pattern).len(), 1);
    }

    #[test]
    fn test_positive_without_action_is_ignored() {
        let transcript = vec![assistant("Hi!"), user("Great")];
        assert!(of_type(&extract_signals(&transcript, "s"), SignalType::Pattern).is_empty());

        let transcript = vec![user("Perfect")];
        assert!(of_type(&extract_signals(&transcript, "s"), SignalType::Pattern).is_empty());
    }

    #[test]
    fn test_positive_lookback_is_bounded() {
        let transcript = vec![
            assistant("I've refactored the whole auth module for you."),
            user("ok"),
            user("ok"),
            user("ok"),
            user("ok"),
            user("Perfect"),
        ];
        assert!(of_type(&extract_signals(&transcript, "s"), SignalType::Pattern).is_empty());
    }

    #[test]
    fn test_repeated_failures() {
        let transcript = vec![
            tool(ToolUse::named("Bash").with_error("exit 1")),
            tool(ToolUse::named("Bash").with_error("exit 2")),
        ];
        let drafts = extract_signals(&transcript, "s");
        let failures = of_type(&drafts, SignalType::Failure);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].content, "Bash failed 2 times consecutively: exit 1");
        assert_eq!(failures[0].tags, vec!["Bash".to_string()]);
        assert_eq!(failures[0].source.turn, None);
    }

    #[test]
    fn test_non_consecutive_failures_do_not_merge() {
        let transcript = vec![
            tool(ToolUse::named("Bash").with_error("exit 1")),
            tool(ToolUse::named("Read").with_result("ok")),
            tool(ToolUse::named("Bash").with_error("exit 1")),
        ];
        assert!(failure_runs(&transcript).is_empty());
    }

    #[test]
    fn test_failure_runs_split_on_tool_change() {
        let transcript = vec![
            tool(ToolUse::named("Bash").with_error("a")),
            tool(ToolUse::named("Bash").with_error("b")),
            tool(ToolUse::named("Bash").with_error("c")),
            tool(ToolUse::named("Edit").with_error("d")),
            tool(ToolUse::named("Edit").with_error("e")),
        ];
        let runs = failure_runs(&transcript);
        assert_eq!(runs.len(), 2);
        assert_eq!((runs[0].tool.as_str(), runs[0].count), ("Bash", 3));
        assert_eq!((runs[1].tool.as_str(), runs[1].count), ("Edit", 2));
        assert_eq!(runs[1].first_error, "d");
    }

    #[test]
    fn test_search_thrashing() {
        let transcript = vec![
            tool(ToolUse::named("Glob").with_result("[]")),
            tool(ToolUse::named("Grep").with_result("No matches found")),
            tool(ToolUse::named("Grep")),
        ];
        let drafts = extract_signals(&transcript, "s");
        let friction = of_type(&drafts, SignalType::ProjectFriction);
        assert_eq!(friction.len(), 1);
        assert_eq!(friction[0].confidence, 1);
        assert_eq!(friction[0].meta["empty_searches"], 3);
    }

    #[test]
    fn test_search_thrashing_reported_once() {
        let mut transcript = Vec::new();
        for _ in 0..2 {
            for _ in 0..3 {
                transcript.push(tool(ToolUse::named("Grep").with_result("")));
            }
            transcript.push(tool(ToolUse::named("Grep").with_result("src/lib.rs")));
        }
        let drafts = extract_signals(&transcript, "s");
        assert_eq!(of_type(&drafts, SignalType::ProjectFriction).len(), 1);
    }

    #[test]
    fn test_search_run_broken_before_threshold() {
        let transcript = vec![
            tool(ToolUse::named("Grep")),
            tool(ToolUse::named("Grep")),
            tool(ToolUse::named("Read").with_result("contents")),
            tool(ToolUse::named("Grep")),
        ];
        assert_eq!(search_thrashing_run(&transcript), None);
    }

    #[test]
    fn test_empty_transcript_produces_nothing() {
        assert!(extract_signals(&[], "s").is_empty());
    }
}
