//! Signal Store - append-only log of captured learning signals
//!
//! Signals live one JSON object per line in `<base_dir>/signals.jsonl`, in
//! append order. Promoted signals are also written to the learnings index
//! under `<base_dir>/learnings/LEARNINGS.md`.
//!
//! Every read-modify-write (id assignment, update, archive, promote) runs under
//! an exclusive lock on `<base_dir>/.signals.lock`, and full rewrites replace
//! the log atomically.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::index::{category_title, format_entry, LearningsIndex};
use super::persist::{write_atomic, FileLock};
use super::signal::{Signal, SignalDraft, SignalStatus, SignalType, SignalUpdate, SIGNAL_ID_PREFIX};

/// Signal log file name
pub const SIGNALS_FILE: &str = "signals.jsonl";

/// Directory holding the learnings index
pub const LEARNINGS_DIR: &str = "learnings";

/// Lock file guarding read-modify-write sequences
const LOCK_FILE: &str = ".signals.lock";

/// Default retention window for opportunistic archival
pub const DEFAULT_RETENTION_DAYS: u32 = 14;

/// Log size at which appends start archiving old signals
pub const DEFAULT_PRUNE_THRESHOLD_BYTES: u64 = 50_000;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// ISO-8601 UTC timestamp with second precision and a `Z` suffix
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// Tunables for the store's housekeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub retention_days: u32,
    pub prune_threshold_bytes: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            prune_threshold_bytes: DEFAULT_PRUNE_THRESHOLD_BYTES,
        }
    }
}

/// Conjunctive filters for [`SignalStore::query`]
#[derive(Debug, Clone, Default)]
pub struct SignalQuery {
    pub status: Option<SignalStatus>,
    pub signal_type: Option<SignalType>,
    pub session_id: Option<String>,
    /// Matches when the signal carries any of these tags
    pub tags: Vec<String>,
    /// Inclusive lower bound, compared lexicographically with `timestamp`
    pub since: Option<String>,
}

impl SignalQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: SignalStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn signal_type(mut self, signal_type: SignalType) -> Self {
        self.signal_type = Some(signal_type);
        self
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn since(mut self, since: &str) -> Self {
        self.since = Some(since.to_string());
        self
    }

    /// Whether a signal passes every filter that is set
    pub fn matches(&self, signal: &Signal) -> bool {
        if self.status.is_some_and(|s| s != signal.status) {
            return false;
        }
        if self.signal_type.is_some_and(|t| t != signal.signal_type) {
            return false;
        }
        if let Some(session_id) = &self.session_id {
            if !session_id.is_empty() && *session_id != signal.session_id {
                return false;
            }
        }
        if !self.tags.is_empty() && !signal.has_any_tag(&self.tags) {
            return false;
        }
        if let Some(since) = &self.since {
            if signal.timestamp.as_str() < since.as_str() {
                return false;
            }
        }
        true
    }
}

/// Output shape of [`SignalStore::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsFormat {
    #[default]
    Full,
    /// Compact pending count for status lines
    StatusLine,
}

/// Aggregate counts over the whole log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignalStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

impl SignalStats {
    pub fn from_signals(signals: &[Signal]) -> Self {
        let mut stats = SignalStats {
            total: signals.len(),
            ..Default::default()
        };
        for signal in signals {
            *stats.by_status.entry(signal.status.to_string()).or_insert(0) += 1;
            *stats.by_type.entry(signal.signal_type.to_string()).or_insert(0) += 1;
            *stats.by_category.entry(signal.category.clone()).or_insert(0) += 1;
        }
        stats
    }

    /// Signals still waiting for review (captured + analyzed)
    pub fn pending(&self) -> usize {
        self.by_status
            .iter()
            .filter(|(status, _)| status.parse::<SignalStatus>().is_ok_and(|s| s.is_pending()))
            .map(|(_, count)| count)
            .sum()
    }

    /// Compact summary, empty when nothing is pending
    pub fn status_line(&self) -> String {
        match self.pending() {
            0 => String::new(),
            pending => format!("reflect: {} pending", pending),
        }
    }
}

/// Result of [`SignalStore::stats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatsReport {
    Full(SignalStats),
    StatusLine(String),
}

/// A line of the log: a parsed signal, or text kept verbatim on rewrite
#[derive(Debug, Clone)]
enum StoredLine {
    Record(Signal),
    Unparsed(String),
}

impl StoredLine {
    fn to_line(&self) -> Result<String> {
        match self {
            StoredLine::Record(signal) => {
                serde_json::to_string(signal).context("Failed to serialize signal")
            }
            StoredLine::Unparsed(raw) => Ok(raw.clone()),
        }
    }
}

#[derive(Deserialize)]
struct IdOnly {
    #[serde(default)]
    id: String,
}

/// Persistent signal store backed by a JSONL file
#[derive(Debug, Clone)]
pub struct SignalStore {
    base_dir: PathBuf,
    signals_path: PathBuf,
    lock_path: PathBuf,
    index: LearningsIndex,
    options: StoreOptions,
}

impl SignalStore {
    /// Create a store rooted at `base_dir` with default options
    pub fn new(base_dir: PathBuf) -> Self {
        Self::with_options(base_dir, StoreOptions::default())
    }

    /// Create a store with custom housekeeping options
    pub fn with_options(base_dir: PathBuf, options: StoreOptions) -> Self {
        Self {
            signals_path: base_dir.join(SIGNALS_FILE),
            lock_path: base_dir.join(LOCK_FILE),
            index: LearningsIndex::new(&base_dir.join(LEARNINGS_DIR)),
            base_dir,
            options,
        }
    }

    /// Get the base directory path
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the signal log
    pub fn signals_path(&self) -> &Path {
        &self.signals_path
    }

    /// The learnings index promoted signals are written to
    pub fn index(&self) -> &LearningsIndex {
        &self.index
    }

    /// Append a draft, completing it with id, version and timestamp
    pub fn append(&self, draft: SignalDraft) -> Result<Signal> {
        self.append_at(draft, Utc::now())
    }

    pub(crate) fn append_at(&self, draft: SignalDraft, now: DateTime<Utc>) -> Result<Signal> {
        draft.validate()?;
        std::fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("Failed to create {}", self.base_dir.display()))?;
        let _lock = self.lock()?;

        let id = self.next_id(now)?;
        let signal = Signal::from_draft(draft, id, format_timestamp(now));

        self.prune_if_needed(now)?;

        let line = serde_json::to_string(&signal).context("Failed to serialize signal")?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.signals_path)
            .with_context(|| format!("Failed to open {}", self.signals_path.display()))?;
        writeln!(file, "{}", line)
            .with_context(|| format!("Failed to append to {}", self.signals_path.display()))?;

        info!("Captured signal {} ({})", signal.id, signal.signal_type);
        Ok(signal)
    }

    /// Fetch a single signal by id
    pub fn get(&self, id: &str) -> Result<Option<Signal>> {
        Ok(self.read_all()?.into_iter().find(|s| s.id == id))
    }

    /// Signals matching every set filter, oldest first
    pub fn query(&self, query: &SignalQuery) -> Result<Vec<Signal>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|s| query.matches(s))
            .collect())
    }

    /// Every stored signal in append order
    pub fn all(&self) -> Result<Vec<Signal>> {
        self.read_all()
    }

    /// Change the mutable fields of a signal; `None` when the id is unknown
    pub fn update(&self, id: &str, update: SignalUpdate) -> Result<Option<Signal>> {
        update.validate()?;
        let _lock = self.lock()?;
        self.update_unlocked(id, update)
    }

    /// Remove signals older than `days`, never touching promoted or confirmed ones
    ///
    /// With `status_filter`, only signals in that status are eligible.
    pub fn archive(&self, days: u32, status_filter: Option<SignalStatus>) -> Result<usize> {
        let _lock = self.lock()?;
        self.archive_unlocked(days, status_filter, Utc::now())
    }

    #[cfg(test)]
    fn archive_at(&self, days: u32, status_filter: Option<SignalStatus>, now: DateTime<Utc>) -> Result<usize> {
        let _lock = self.lock()?;
        self.archive_unlocked(days, status_filter, now)
    }

    /// Aggregate counts, or a compact pending line
    pub fn stats(&self, format: StatsFormat) -> Result<StatsReport> {
        let stats = SignalStats::from_signals(&self.read_all()?);
        Ok(match format {
            StatsFormat::Full => StatsReport::Full(stats),
            StatsFormat::StatusLine => StatsReport::StatusLine(stats.status_line()),
        })
    }

    /// Mark a signal promoted and record it in the learnings index
    pub fn promote(&self, id: &str, target: &str, content: &str) -> Result<Option<Signal>> {
        let _lock = self.lock()?;

        let update = SignalUpdate {
            status: Some(SignalStatus::Promoted),
            promoted_to: Some(Some(target.to_string())),
            ..Default::default()
        };
        let Some(updated) = self.update_unlocked(id, update)? else {
            return Ok(None);
        };

        let section = category_title(&updated.category);
        let line = format_entry(&updated.learning_id(), content, target);
        self.index.add_entry(&section, &line)?;

        info!("Promoted {} to {} under '{}'", updated.id, target, section);
        Ok(Some(updated))
    }

    // --- File I/O ---

    fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(&self.lock_path)
    }

    fn update_unlocked(&self, id: &str, update: SignalUpdate) -> Result<Option<Signal>> {
        let mut lines = self.read_lines()?;

        let target = lines.iter_mut().find_map(|line| match line {
            StoredLine::Record(signal) if signal.id == id => Some(signal),
            _ => None,
        });
        let Some(signal) = target else {
            debug!("Signal {} not found for update", id);
            return Ok(None);
        };
        if update.is_empty() {
            return Ok(Some(signal.clone()));
        }
        signal.apply(update);
        let updated = signal.clone();

        self.write_lines(&lines)?;
        debug!("Updated signal {}", id);
        Ok(Some(updated))
    }

    fn archive_unlocked(
        &self,
        days: u32,
        status_filter: Option<SignalStatus>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        // A window reaching past the representable range keeps everything
        let Some(cutoff) = Duration::try_days(i64::from(days))
            .and_then(|window| now.checked_sub_signed(window))
            .map(format_timestamp)
        else {
            debug!("Archive window of {} days predates every signal", days);
            return Ok(0);
        };
        let lines = self.read_lines()?;
        let before = lines.len();

        let kept: Vec<StoredLine> = lines
            .into_iter()
            .filter(|line| match line {
                StoredLine::Unparsed(_) => true,
                StoredLine::Record(signal) => {
                    if signal.status.is_protected() {
                        return true;
                    }
                    if status_filter.is_some_and(|s| s != signal.status) {
                        return true;
                    }
                    signal.timestamp >= cutoff
                }
            })
            .collect();

        let removed = before - kept.len();
        if removed > 0 {
            self.write_lines(&kept)?;
            info!("Archived {} signals older than {} days", removed, days);
        }
        Ok(removed)
    }

    /// Archive old signals once the log has grown past the threshold
    fn prune_if_needed(&self, now: DateTime<Utc>) -> Result<()> {
        let Ok(metadata) = std::fs::metadata(&self.signals_path) else {
            return Ok(());
        };
        if metadata.len() < self.options.prune_threshold_bytes {
            return Ok(());
        }
        self.archive_unlocked(self.options.retention_days, None, now)?;
        Ok(())
    }

    /// Next `SIG-YYYYMMDD-NNNN` id for the UTC date of `now`
    fn next_id(&self, now: DateTime<Utc>) -> Result<String> {
        let prefix = format!("{}-{}-", SIGNAL_ID_PREFIX, now.format("%Y%m%d"));
        let mut max_seq: u32 = 0;

        for raw in self.read_raw_lines()? {
            let Ok(entry) = serde_json::from_str::<IdOnly>(&raw) else {
                continue;
            };
            if let Some(seq) = entry
                .id
                .strip_prefix(&prefix)
                .and_then(|s| s.parse::<u32>().ok())
            {
                max_seq = max_seq.max(seq);
            }
        }

        Ok(format!("{}{:04}", prefix, max_seq + 1))
    }

    fn read_raw_lines(&self) -> Result<Vec<String>> {
        if !self.signals_path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.signals_path)
            .with_context(|| format!("Failed to read {}", self.signals_path.display()))?;

        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("Failed to read {}", self.signals_path.display()))?;
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        Ok(lines)
    }

    fn read_lines(&self) -> Result<Vec<StoredLine>> {
        let lines: Vec<StoredLine> = self
            .read_raw_lines()?
            .into_iter()
            .map(|raw| match serde_json::from_str::<Signal>(&raw) {
                Ok(signal) => StoredLine::Record(signal),
                Err(_) => StoredLine::Unparsed(raw),
            })
            .collect();

        let unparsed = lines
            .iter()
            .filter(|l| matches!(l, StoredLine::Unparsed(_)))
            .count();
        if unparsed > 0 {
            warn!("Skipped {} unreadable lines in {}", unparsed, self.signals_path.display());
        }
        Ok(lines)
    }

    fn read_all(&self) -> Result<Vec<Signal>> {
        Ok(self
            .read_lines()?
            .into_iter()
            .filter_map(|line| match line {
                StoredLine::Record(signal) => Some(signal),
                StoredLine::Unparsed(_) => None,
            })
            .collect())
    }

    fn write_lines(&self, lines: &[StoredLine]) -> Result<()> {
        let mut content = String::with_capacity(lines.len() * 256);
        for line in lines {
            content.push_str(&line.to_line()?);
            content.push('\n');
        }
        write_atomic(&self.signals_path, content.as_bytes())
    }
}
