//! Signal records - the unit of captured learning
//!
//! A [`SignalDraft`] is what detectors produce; the store completes it into a
//! [`Signal`] by assigning an id, version, timestamp and defaults.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Prefix of stored signal ids
pub const SIGNAL_ID_PREFIX: &str = "SIG";

/// Prefix used for promoted learnings in the index
pub const LEARNING_ID_PREFIX: &str = "LRN";

/// Current record schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Confidence scale, 1 (weak hint) to 4 (explicitly confirmed)
pub const CONFIDENCE_RANGE: RangeInclusive<u8> = 1..=4;

/// Error parsing or validating signal fields
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseSignalError {
    #[error("unknown signal type: {0}")]
    UnknownType(String),
    #[error("unknown signal status: {0}")]
    UnknownStatus(String),
    #[error("confidence {0} is outside 1..=4")]
    InvalidConfidence(u8),
}

fn check_confidence(confidence: u8) -> Result<(), ParseSignalError> {
    if CONFIDENCE_RANGE.contains(&confidence) {
        Ok(())
    } else {
        Err(ParseSignalError::InvalidConfidence(confidence))
    }
}

/// Kind of observation a signal captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Correction,
    Convention,
    Command,
    Pattern,
    Failure,
    ProjectFriction,
    Summary,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Correction => "correction",
            SignalType::Convention => "convention",
            SignalType::Command => "command",
            SignalType::Pattern => "pattern",
            SignalType::Failure => "failure",
            SignalType::ProjectFriction => "project_friction",
            SignalType::Summary => "summary",
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = ParseSignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "correction" => Ok(SignalType::Correction),
            "convention" => Ok(SignalType::Convention),
            "command" => Ok(SignalType::Command),
            "pattern" => Ok(SignalType::Pattern),
            "failure" => Ok(SignalType::Failure),
            "project_friction" => Ok(SignalType::ProjectFriction),
            "summary" => Ok(SignalType::Summary),
            other => Err(ParseSignalError::UnknownType(other.to_string())),
        }
    }
}

/// Lifecycle status of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Captured,
    Analyzed,
    Promoted,
    Confirmed,
    Rejected,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Captured => "captured",
            SignalStatus::Analyzed => "analyzed",
            SignalStatus::Promoted => "promoted",
            SignalStatus::Confirmed => "confirmed",
            SignalStatus::Rejected => "rejected",
        }
    }

    /// Promoted and confirmed signals are durable knowledge and never archived
    pub fn is_protected(&self) -> bool {
        matches!(self, SignalStatus::Promoted | SignalStatus::Confirmed)
    }

    /// Captured and analyzed signals still await review
    pub fn is_pending(&self) -> bool {
        matches!(self, SignalStatus::Captured | SignalStatus::Analyzed)
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SignalStatus {
    type Err = ParseSignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "captured" => Ok(SignalStatus::Captured),
            "analyzed" => Ok(SignalStatus::Analyzed),
            "promoted" => Ok(SignalStatus::Promoted),
            "confirmed" => Ok(SignalStatus::Confirmed),
            "rejected" => Ok(SignalStatus::Rejected),
            other => Err(ParseSignalError::UnknownStatus(other.to_string())),
        }
    }
}

/// Provenance of a signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSource {
    /// Hook or detector that produced the signal
    pub hook: String,
    /// Index of the triggering entry in the transcript
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<usize>,
}

impl SignalSource {
    pub fn hook(hook: &str) -> Self {
        Self {
            hook: hook.to_string(),
            turn: None,
        }
    }

    pub fn at_turn(hook: &str, turn: usize) -> Self {
        Self {
            hook: hook.to_string(),
            turn: Some(turn),
        }
    }
}

/// A signal candidate before the store assigns identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDraft {
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub status: SignalStatus,
    pub confidence: u8,
    pub source: SignalSource,
    pub content: String,
    pub context: String,
    pub session_id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub related: Vec<String>,
    #[serde(default)]
    pub promoted_to: Option<String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl SignalDraft {
    /// Create a freshly captured draft with default optional fields
    pub fn captured(
        signal_type: SignalType,
        confidence: u8,
        source: SignalSource,
        content: impl Into<String>,
        context: impl Into<String>,
        session_id: &str,
    ) -> Self {
        Self {
            signal_type,
            status: SignalStatus::Captured,
            confidence,
            source,
            content: content.into(),
            context: context.into(),
            session_id: session_id.to_string(),
            category: String::new(),
            tags: Vec::new(),
            related: Vec::new(),
            promoted_to: None,
            meta: Map::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    pub fn validate(&self) -> Result<(), ParseSignalError> {
        check_confidence(self.confidence)
    }
}

/// A persisted signal record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub status: SignalStatus,
    pub confidence: u8,
    pub source: SignalSource,
    pub content: String,
    pub context: String,
    pub session_id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub related: Vec<String>,
    #[serde(default)]
    pub promoted_to: Option<String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

fn default_version() -> u32 {
    SCHEMA_VERSION
}

impl Signal {
    /// Complete a draft with the identity assigned by the store
    pub fn from_draft(draft: SignalDraft, id: String, timestamp: String) -> Self {
        let mut tags: Vec<String> = Vec::with_capacity(draft.tags.len());
        for tag in draft.tags {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        Self {
            id,
            version: SCHEMA_VERSION,
            timestamp,
            signal_type: draft.signal_type,
            status: draft.status,
            confidence: draft.confidence,
            source: draft.source,
            content: draft.content,
            context: draft.context,
            session_id: draft.session_id,
            category: draft.category,
            tags,
            related: draft.related,
            promoted_to: draft.promoted_to,
            meta: draft.meta,
        }
    }

    /// Whether any of `tags` is attached to this signal
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }

    /// Id used for this signal once it lands in the learnings index
    pub fn learning_id(&self) -> String {
        learning_id(&self.id)
    }

    /// Apply an update, overwriting only the fields it sets
    pub fn apply(&mut self, update: SignalUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(confidence) = update.confidence {
            self.confidence = confidence;
        }
        if let Some(category) = update.category {
            self.category = category;
        }
        if let Some(tags) = update.tags {
            self.tags = tags;
        }
        if let Some(related) = update.related {
            self.related = related;
        }
        if let Some(promoted_to) = update.promoted_to {
            self.promoted_to = promoted_to;
        }
        if let Some(meta) = update.meta {
            self.meta = meta;
        }
    }
}

/// Fields a stored signal may change after capture
///
/// Identity fields (`id`, `version`, `timestamp`) and the captured payload
/// are not part of this set and cannot be rewritten. An explicit
/// `"promoted_to": null` clears the promotion target; an absent key keeps it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SignalStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub promoted_to: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

/// Distinguish a present `null` (`Some(None)`) from an absent key (`None`)
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl SignalUpdate {
    pub fn status(status: SignalStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// True when applying the update would change nothing
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), ParseSignalError> {
        match self.confidence {
            Some(confidence) => check_confidence(confidence),
            None => Ok(()),
        }
    }
}

/// Replace the `SIG` prefix of a signal id with `LRN`
pub fn learning_id(signal_id: &str) -> String {
    match signal_id.strip_prefix(SIGNAL_ID_PREFIX) {
        Some(rest) => format!("{}{}", LEARNING_ID_PREFIX, rest),
        None => signal_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Signal {
        let draft = SignalDraft::captured(
            SignalType::Correction,
            2,
            SignalSource::at_turn("PreCompact", 4),
            "Use pnpm",
            "No, use pnpm not npm",
            "s1",
        )
        .with_tags(vec!["npm".into(), "pnpm".into(), "npm".into()]);
        Signal::from_draft(draft, "SIG-20260101-0001".into(), "2026-01-01T00:00:00Z".into())
    }

    #[test]
    fn test_from_draft_dedups_tags() {
        let signal = sample();
        assert_eq!(signal.tags, vec!["npm".to_string(), "pnpm".to_string()]);
        assert_eq!(signal.version, 1);
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["type"], "correction");
        assert_eq!(value["status"], "captured");
        assert_eq!(value["source"], json!({"hook": "PreCompact", "turn": 4}));
        assert_eq!(value["promoted_to"], Value::Null);
        assert_eq!(value["category"], "");
        assert_eq!(value["meta"], json!({}));
    }

    #[test]
    fn test_draft_optional_fields_default() {
        let draft: SignalDraft = serde_json::from_value(json!({
            "type": "failure",
            "status": "captured",
            "confidence": 1,
            "source": {"hook": "PostToolUseFailure"},
            "content": "Bash: npm test failed",
            "context": "exit code 1",
            "session_id": "test-session"
        }))
        .unwrap();
        assert!(draft.tags.is_empty());
        assert!(draft.promoted_to.is_none());
        assert_eq!(draft.source.turn, None);
    }

    #[test]
    fn test_update_rejects_identity_fields() {
        let result = serde_json::from_value::<SignalUpdate>(json!({"id": "SIG-1"}));
        assert!(result.is_err());
        let update: SignalUpdate = serde_json::from_value(json!({"status": "analyzed"})).unwrap();
        assert_eq!(update.status, Some(SignalStatus::Analyzed));
    }

    #[test]
    fn test_apply_keeps_unset_fields() {
        let mut signal = sample();
        let before = signal.clone();
        signal.apply(SignalUpdate {
            category: Some("package-manager".into()),
            ..Default::default()
        });
        assert_eq!(signal.category, "package-manager");
        assert_eq!(signal.status, before.status);
        assert_eq!(signal.tags, before.tags);
        assert_eq!(signal.timestamp, before.timestamp);
    }

    #[test]
    fn test_promoted_to_null_clears_target() {
        let mut signal = sample();
        signal.promoted_to = Some("CLAUDE.md".into());

        let keep: SignalUpdate = serde_json::from_value(json!({"status": "confirmed"})).unwrap();
        assert_eq!(keep.promoted_to, None);
        signal.apply(keep);
        assert_eq!(signal.promoted_to.as_deref(), Some("CLAUDE.md"));

        let clear: SignalUpdate = serde_json::from_value(json!({"promoted_to": null})).unwrap();
        assert_eq!(clear.promoted_to, Some(None));
        assert!(!clear.is_empty());
        signal.apply(clear);
        assert_eq!(signal.promoted_to, None);
    }

    #[test]
    fn test_confidence_range() {
        let mut draft = SignalDraft::captured(
            SignalType::Pattern,
            1,
            SignalSource::hook("PreCompact"),
            "c",
            "c",
            "s1",
        );
        assert!(draft.validate().is_ok());
        draft.confidence = 4;
        assert!(draft.validate().is_ok());
        for bad in [0, 5, 9] {
            draft.confidence = bad;
            assert_eq!(draft.validate(), Err(ParseSignalError::InvalidConfidence(bad)));
        }

        let update: SignalUpdate = serde_json::from_value(json!({"confidence": 0})).unwrap();
        assert!(update.validate().is_err());
        assert!(SignalUpdate::status(SignalStatus::Rejected).validate().is_ok());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("project_friction".parse::<SignalType>(), Ok(SignalType::ProjectFriction));
        assert_eq!(
            "bogus".parse::<SignalStatus>(),
            Err(ParseSignalError::UnknownStatus("bogus".into()))
        );
        assert!(SignalStatus::Confirmed.is_protected());
        assert!(SignalStatus::Analyzed.is_pending());
    }

    #[test]
    fn test_learning_id() {
        assert_eq!(learning_id("SIG-20260101-0003"), "LRN-20260101-0003");
        assert_eq!(learning_id("OTHER-1"), "OTHER-1");
    }
}
