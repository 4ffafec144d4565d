//! Shared types used across modules
//!
//! This module contains types that are used by both the transcript
//! reader and the detectors to avoid circular dependencies.

use serde::{Deserialize, Serialize};

/// Role of a transcript entry's author
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    /// Anything else the host writes (tool results, progress markers, ...)
    #[default]
    #[serde(other)]
    Other,
}

impl Role {
    /// Convert to the transcript's role string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Other => "other",
        }
    }

    /// Whether entries with this role count as a conversational turn
    pub fn is_turn(&self) -> bool {
        matches!(self, Role::User | Role::Assistant)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
