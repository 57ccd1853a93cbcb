//! Row models returned by repositories.
//!
//! Keep these focused on what the queries return; command logic lives in
//! `handlers`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broadcast::{BroadcastMode, DeliveryOutcome};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "private" => Some(ChatKind::Private),
            "group" => Some(ChatKind::Group),
            "supergroup" => Some(ChatKind::Supergroup),
            "channel" => Some(ChatKind::Channel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub id: i64,
    pub kind: Option<ChatKind>,
    pub title: Option<String>,
    pub username: Option<String>,
    pub blocked: bool,
    pub left_at: Option<DateTime<Utc>>,
}

/// Counts over chats the bot is still a member of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatStats {
    pub total: i64,
    pub groups: i64,
    pub channels: i64,
    pub blocked: i64,
}

/// A stored broadcast run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastLog {
    pub id: i64,
    pub run_id: Uuid,
    pub mode: Option<BroadcastMode>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: i64,
    pub failed: i64,
    pub details: Vec<DeliveryOutcome>,
}
