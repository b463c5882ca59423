use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a submitted message.
///
/// `Pending` is the initial state; a completed moderation result moves the
/// message to exactly one of the terminal states and nothing moves it back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Approved,
    Flagged,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModerationResult {
    pub is_toxic: bool,
    pub confidence: f64,
    pub categories: Vec<String>,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    True,
    False,
    Mixed,
    Unverified,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub author_id: String,
    pub author_display_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    /// Attached once by the lifecycle manager, immutable afterwards.
    pub moderation: Option<ModerationResult>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FactCheck {
    pub id: String,
    /// Normalized claim text; keys the registry.
    pub claim: String,
    pub verdict: Verdict,
    pub sources: Vec<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Events carried over the dispatch channel and the local event bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RoomEvent {
    MessageCreated {
        message: Message,
    },
    MessageStatusChanged {
        message_id: String,
        status: MessageStatus,
        moderation: ModerationResult,
    },
    FactCheckAdded {
        fact_check: FactCheck,
    },
    /// The channel dropped buffered events; subscribers should resync.
    GapDetected {
        dropped: usize,
    },
}
