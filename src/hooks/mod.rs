//! Lifecycle Hooks - entry points invoked by the host session
//!
//! The host runs a hook with a JSON payload on stdin. `PreCompact` extracts
//! signals from the transcript before context is compacted; `SessionEnd`
//! records a one-line session summary. Hooks fail open: a bad payload or a
//! missing transcript is a successful no-op, so capture never disrupts the
//! session itself.

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::learning::detector::{SignalExtractor, CAPTURE_HOOK};
use crate::learning::signal::SignalDraft;
use crate::learning::store::SignalStore;
use crate::learning::summary::{summary_signal, SUMMARY_HOOK};
use crate::learning::writer::SignalWriter;
use crate::transcript::read_transcript;

/// Points in the session lifecycle with a capture hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    PreCompact,
    SessionEnd,
}

impl HookEvent {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            CAPTURE_HOOK => Some(HookEvent::PreCompact),
            SUMMARY_HOOK => Some(HookEvent::SessionEnd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreCompact => CAPTURE_HOOK,
            HookEvent::SessionEnd => SUMMARY_HOOK,
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload the host passes on stdin
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub transcript_path: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub hook_event_name: Option<String>,
    /// Why the session ended (SessionEnd only)
    #[serde(default)]
    pub reason: Option<String>,
}

impl HookInput {
    /// Parse a payload; anything unusable is `None`
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str::<HookInput>(raw) {
            Ok(input) if input.is_actionable() => Some(input),
            Ok(_) => {
                debug!("Hook payload without session_id or transcript_path");
                None
            }
            Err(e) => {
                debug!("Ignoring malformed hook payload: {}", e);
                None
            }
        }
    }

    /// Both a session id and a transcript path are present
    pub fn is_actionable(&self) -> bool {
        !self.session_id.is_empty() && !self.transcript_path.is_empty()
    }

    pub fn transcript_path(&self) -> PathBuf {
        PathBuf::from(&self.transcript_path)
    }

    /// Event named by the payload itself
    pub fn event(&self) -> Option<HookEvent> {
        self.hook_event_name.as_deref().and_then(HookEvent::from_name)
    }
}

/// Drafts a hook would produce for the given transcript
pub fn collect_drafts(
    event: HookEvent,
    transcript_path: &Path,
    session_id: &str,
    max_entries: usize,
) -> Vec<SignalDraft> {
    match event {
        HookEvent::PreCompact => {
            let transcript = read_transcript(transcript_path, max_entries);
            SignalExtractor::new().extract(&transcript, session_id)
        }
        HookEvent::SessionEnd => {
            let transcript = read_transcript(transcript_path, usize::MAX);
            summary_signal(&transcript, session_id).into_iter().collect()
        }
    }
}

/// Handle a raw stdin payload end to end
///
/// `event` overrides the payload's `hook_event_name`. Everything short of a
/// failed store write is a successful no-op.
pub async fn run_hook_payload(
    raw: &str,
    event: Option<HookEvent>,
    config: &Config,
    base_dir: Option<&Path>,
) -> Result<usize> {
    let Some(input) = HookInput::parse(raw) else {
        return Ok(0);
    };
    let Some(event) = event.or_else(|| input.event()) else {
        debug!("No capture hook for event {:?}", input.hook_event_name);
        return Ok(0);
    };

    let store = match config.open_store(base_dir) {
        Ok(store) => store,
        Err(e) => {
            warn!("Skipping {} hook, no signal store: {:#}", event, e);
            return Ok(0);
        }
    };
    run_hook(event, &input, store, config.capture.max_transcript_entries).await
}

/// Run a hook, returning how many signals were stored
pub async fn run_hook(
    event: HookEvent,
    input: &HookInput,
    store: SignalStore,
    max_entries: usize,
) -> Result<usize> {
    if !input.is_actionable() {
        return Ok(0);
    }
    debug!(
        "{} hook for session {} (cwd: {:?}, reason: {:?})",
        event, input.session_id, input.cwd, input.reason
    );

    let drafts = collect_drafts(event, &input.transcript_path(), &input.session_id, max_entries);
    if drafts.is_empty() {
        debug!("{} hook found nothing to capture for {}", event, input.session_id);
        return Ok(0);
    }

    let (writer, handle) = SignalWriter::spawn(store);
    let mut stored = 0;
    for draft in drafts {
        writer.append(draft).await?;
        stored += 1;
    }
    drop(writer);
    if let Err(e) = handle.await {
        warn!("Signal writer task failed: {}", e);
    }

    info!("{} hook stored {} signals for session {}", event, stored, input.session_id);
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_transcript(dir: &Path, lines: &[&str]) -> PathBuf {
        let path = dir.join("transcript.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    fn input(session_id: &str, transcript: &Path) -> HookInput {
        HookInput {
            session_id: session_id.to_string(),
            transcript_path: transcript.display().to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(HookEvent::from_name("PreCompact"), Some(HookEvent::PreCompact));
        assert_eq!(HookEvent::from_name("SessionEnd"), Some(HookEvent::SessionEnd));
        assert_eq!(HookEvent::from_name("PostToolUse"), None);
    }

    #[test]
    fn test_parse_fails_open() {
        assert!(HookInput::parse("").is_none());
        assert!(HookInput::parse("not json").is_none());
        assert!(HookInput::parse(r#"{"session_id": "s1"}"#).is_none());
        assert!(HookInput::parse(r#"{"transcript_path": "/tmp/t.jsonl"}"#).is_none());

        let parsed = HookInput::parse(
            r#"{"session_id": "s1", "transcript_path": "/tmp/t.jsonl", "hook_event_name": "SessionEnd", "cwd": "/repo", "reason": "logout"}"#,
        )
        .unwrap();
        assert_eq!(parsed.event(), Some(HookEvent::SessionEnd));
        assert_eq!(parsed.cwd.as_deref(), Some("/repo"));
        assert_eq!(parsed.reason.as_deref(), Some("logout"));
    }

    #[tokio::test]
    async fn test_pre_compact_stores_signals() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = write_transcript(
            dir.path(),
            &[
                r#"{"role": "user", "content": "No, use pnpm instead of npm"}"#,
                r#"{"role": "assistant", "content": "Switching to pnpm."}"#,
            ],
        );
        let store = SignalStore::new(dir.path().join("store"));

        let stored = run_hook(HookEvent::PreCompact, &input("s1", &transcript), store.clone(), 200)
            .await
            .unwrap();
        assert!(stored >= 1);
        let signals = store.all().unwrap();
        assert_eq!(signals.len(), stored);
        assert!(signals.iter().all(|s| s.session_id == "s1"));
        assert!(signals.iter().all(|s| s.source.hook == "PreCompact"));
    }

    #[tokio::test]
    async fn test_session_end_stores_summary() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = write_transcript(
            dir.path(),
            &[
                r#"{"role": "user", "content": "read the config"}"#,
                r#"{"role": "assistant", "content": "", "tool_use": {"name": "Read", "input": {"file_path": "src/config.rs"}}}"#,
            ],
        );
        let store = SignalStore::new(dir.path().join("store"));

        let stored = run_hook(HookEvent::SessionEnd, &input("s2", &transcript), store.clone(), 200)
            .await
            .unwrap();
        assert_eq!(stored, 1);
        let signal = &store.all().unwrap()[0];
        assert_eq!(signal.content, "Session: 2 turns. Tools: Read(1). Files: src/config.rs");
        assert_eq!(signal.source.hook, "SessionEnd");
    }

    #[tokio::test]
    async fn test_unreadable_config_still_captures() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[store\nretention_days = ").unwrap();
        let config = Config::load_or_default_from(&config_path);

        let transcript = write_transcript(
            dir.path(),
            &[r#"{"role": "user", "content": "No, use pnpm instead of npm"}"#],
        );
        let store_dir = dir.path().join("store");
        let payload = serde_json::json!({
            "session_id": "s1",
            "transcript_path": transcript.display().to_string(),
            "hook_event_name": "PreCompact",
        })
        .to_string();

        let stored = run_hook_payload(&payload, None, &config, Some(&store_dir)).await.unwrap();
        assert_eq!(stored, 1);
        assert_eq!(SignalStore::new(store_dir.clone()).all().unwrap().len(), 1);

        for raw in ["{}", "", "not json"] {
            assert_eq!(run_hook_payload(raw, None, &config, Some(&store_dir)).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_payload_without_known_event_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = write_transcript(dir.path(), &[r#"{"role": "user", "content": "No, wrong file"}"#]);
        let store_dir = dir.path().join("store");
        let payload = serde_json::json!({
            "session_id": "s1",
            "transcript_path": transcript.display().to_string(),
            "hook_event_name": "PostToolUse",
        })
        .to_string();

        let config = Config::default();
        assert_eq!(run_hook_payload(&payload, None, &config, Some(&store_dir)).await.unwrap(), 0);
        assert_eq!(
            run_hook_payload(&payload, Some(HookEvent::PreCompact), &config, Some(&store_dir))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_transcript_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignalStore::new(dir.path().join("store"));
        let missing = dir.path().join("missing.jsonl");

        for event in [HookEvent::PreCompact, HookEvent::SessionEnd] {
            let stored = run_hook(event, &input("s1", &missing), store.clone(), 200).await.unwrap();
            assert_eq!(stored, 0);
        }
        assert!(!store.signals_path().exists());
    }
}
