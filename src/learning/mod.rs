//! Session Learning System
//!
//! Captures learning signals (corrections, conventions, commands, praise,
//! repeated failures, search thrashing, session summaries) from session
//! transcripts, stores them in an append-only JSONL log, and promotes
//! reviewed signals into a category-grouped learnings index.

pub mod detector;
pub mod index;
pub mod persist;
pub mod signal;
pub mod store;
pub mod summary;
pub mod writer;

pub use detector::{extract_signals, SignalExtractor};
pub use index::LearningsIndex;
pub use signal::{Signal, SignalDraft, SignalSource, SignalStatus, SignalType, SignalUpdate};
pub use store::{SignalQuery, SignalStats, SignalStore, StatsFormat, StatsReport, StoreOptions};
pub use summary::{summarize, summary_signal, SessionSummary};
pub use writer::SignalWriter;
