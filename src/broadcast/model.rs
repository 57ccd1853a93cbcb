use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered chat as seen by the broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub chat_id: i64,
    pub blocked: bool,
    pub live: bool,
}

impl Destination {
    pub fn live(chat_id: i64) -> Self {
        Self {
            chat_id,
            blocked: false,
            live: true,
        }
    }

    /// Only live, unblocked chats receive broadcasts.
    pub fn is_eligible(&self) -> bool {
        self.live && !self.blocked
    }
}

/// Reference to an existing Telegram message that will be copied verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub from_chat: i64,
    pub message_id: i32,
}

/// Payload of a broadcast run. Fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOperation {
    SendText(String),
    CopyMessage(MessageRef),
}

impl DeliveryOperation {
    pub fn mode(&self) -> BroadcastMode {
        match self {
            DeliveryOperation::SendText(_) => BroadcastMode::Text,
            DeliveryOperation::CopyMessage(_) => BroadcastMode::Copy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastMode {
    Text,
    Copy,
}

impl BroadcastMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastMode::Text => "text",
            BroadcastMode::Copy => "copy",
        }
    }

    pub fn parse_mode(s: &str) -> Option<Self> {
        match s {
            "text" => Some(BroadcastMode::Text),
            "copy" => Some(BroadcastMode::Copy),
            _ => None,
        }
    }
}

/// Result of one attempted delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub chat_id: i64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn delivered(chat_id: i64) -> Self {
        Self {
            chat_id,
            ok: true,
            error: None,
        }
    }

    pub fn failed(chat_id: i64, error: impl Into<String>) -> Self {
        Self {
            chat_id,
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Immutable record of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: BroadcastMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success_count: u64,
    pub failure_count: u64,
    /// Last outcomes in completion order, capped at [`RECENT_OUTCOMES_CAP`](super::RECENT_OUTCOMES_CAP).
    pub recent_outcomes: Vec<DeliveryOutcome>,
}

impl RunSummary {
    pub fn attempted(&self) -> u64 {
        self.success_count + self.failure_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Created,
    Enumerating,
    Dispatching,
    Aggregating,
    Recorded,
    RecordFailed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Recorded | RunPhase::RecordFailed)
    }
}
