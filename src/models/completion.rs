//! Completion records summarizing a drained OCR processing run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Acknowledgement state of a completion record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    Unread,
    Dismissed,
}

impl CompletionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unread" => Some(Self::Unread),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

/// Durable one-shot summary written when a processing run fully drains.
///
/// Shown by the UI as a "processing finished" banner until dismissed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Unique identifier.
    pub id: String,
    /// Pages touched during the run (completed + failed).
    pub total_pages: u32,
    /// Pages that finished with text blocks persisted.
    pub completed: u32,
    /// Pages that failed recognition.
    pub failed: u32,
    /// When the run drained.
    pub finished_at: DateTime<Utc>,
    /// Whether the UI has dismissed the banner.
    pub state: CompletionState,
}

impl CompletionRecord {
    /// Create a new unread completion record.
    pub fn new(completed: u32, failed: u32, finished_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            total_pages: completed + failed,
            completed,
            failed,
            finished_at,
            state: CompletionState::Unread,
        }
    }
}
