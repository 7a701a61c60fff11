//! Conversation transcript
//!
//! Entries are appended in arrival order and collapsed on `(speaker, text)`:
//! the transport may re-deliver an utterance, and a genuine repeat from the
//! same speaker cannot be told apart from a re-delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Who produced an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// A single utterance in the transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "HandoffEntry", try_from = "HandoffEntry")]
pub struct TranscriptEntry {
    pub id: String,
    pub text: String,
    pub speaker: Speaker,
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    /// Returns `None` when the text is blank.
    pub fn new(
        id: impl Into<String>,
        speaker: Speaker,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }
        Some(Self {
            id: id.into(),
            text,
            speaker,
            created_at,
        })
    }

    pub fn is_user(&self) -> bool {
        self.speaker == Speaker::User
    }
}

/// Wire shape of the hand-off: `{id, text, isUser, timestamp}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandoffEntry {
    id: String,
    text: String,
    is_user: bool,
    timestamp: DateTime<Utc>,
}

impl From<TranscriptEntry> for HandoffEntry {
    fn from(entry: TranscriptEntry) -> Self {
        Self {
            is_user: entry.is_user(),
            id: entry.id,
            text: entry.text,
            timestamp: entry.created_at,
        }
    }
}

impl TryFrom<HandoffEntry> for TranscriptEntry {
    type Error = String;

    fn try_from(raw: HandoffEntry) -> Result<Self, Self::Error> {
        let speaker = if raw.is_user {
            Speaker::User
        } else {
            Speaker::Assistant
        };
        TranscriptEntry::new(raw.id.clone(), speaker, raw.text, raw.timestamp)
            .ok_or_else(|| format!("transcript entry {} has empty text", raw.id))
    }
}

/// Append-only, deduplicated utterance log of one active session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    seen: HashSet<(Speaker, String)>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless the same speaker already said exactly this text.
    /// Returns whether the entry was stored.
    pub fn push(&mut self, entry: TranscriptEntry) -> bool {
        if !self.seen.insert((entry.speaker, entry.text.clone())) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
