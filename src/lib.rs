//! Session Reflect - learning capture for coding-assistant sessions
//!
//! Reads session transcripts at lifecycle hooks, extracts candidate learning
//! signals with keyword heuristics, and keeps them in a local store:
//! - append-only JSONL signal log with sequential `SIG-YYYYMMDD-NNNN` ids
//! - query, update, archive and stats over the log
//! - promotion of reviewed signals into a category-grouped LEARNINGS.md
//!
//! # Example
//!
//! ```ignore
//! use session_reflect::learning::{extract_signals, SignalStore};
//! use session_reflect::transcript::read_transcript;
//!
//! let transcript = read_transcript(Path::new("session.jsonl"), 200);
//! let store = SignalStore::new(PathBuf::from("/tmp/reflections"));
//! for draft in extract_signals(&transcript, "session-1") {
//!     store.append(draft)?;
//! }
//! ```

pub mod types;
pub mod transcript;
pub mod learning;
pub mod config;
pub mod hooks;
pub mod cli;

pub use config::Config;

pub use learning::{
    extract_signals,
    LearningsIndex,
    Signal,
    SignalDraft,
    SignalExtractor,
    SignalQuery,
    SignalStatus,
    SignalStore,
    SignalType,
    SignalUpdate,
    SignalWriter,
};

pub use hooks::{run_hook, HookEvent, HookInput};

/// First `max_chars` characters of `s`
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
