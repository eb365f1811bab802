use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conversation shape: a two-party thread or a team-wide group thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Team,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Team => "team",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "direct" => Some(ConversationKind::Direct),
            "team" => Some(ConversationKind::Team),
            _ => None,
        }
    }
}

/// Conversation row as stored. A team conversation carries exactly one
/// backing `team_id` and is unique per team.
#[derive(Clone, Debug)]
pub struct ConversationRecord {
    pub id: String,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub team_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Snapshot of the newest non-deleted message, for listing rows.
#[derive(Clone, Debug)]
pub struct LastMessage {
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender_name: String,
}

/// A conversation as presented to the requesting user: participants exclude
/// the requester, the name of a direct conversation is derived from the other
/// party, and the unread count is computed server-side for this user.
#[derive(Clone, Debug)]
pub struct ConversationSummary {
    pub id: String,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub participants: Vec<Participant>,
    pub last_message: Option<LastMessage>,
    pub unread_count: i64,
}

/// Message row as stored. Immutable after creation except for `is_deleted`.
/// `seq` is assigned by the store and breaks ties between equal timestamps.
#[derive(Clone, Debug)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub seq: i64,
    pub is_deleted: bool,
}

/// Message enriched with sender profile fields at read time.
#[derive(Clone, Debug)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub seq: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TeamMembership {
    pub team_id: String,
    pub team_name: String,
}

#[derive(Clone, Debug)]
pub struct PresenceRecord {
    pub user_id: String,
    pub is_online: bool,
    pub last_seen_at: DateTime<Utc>,
}

impl PresenceRecord {
    /// The timestamp is authoritative; the stored boolean is only a hint.
    pub fn is_recent(&self, recency_secs: u64, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_seen_at)
            <= chrono::Duration::seconds(recency_secs as i64)
    }
}

/// Row-change event from the store's presence table, used to invalidate
/// cached lookups.
#[derive(Clone, Debug)]
pub struct PresenceChange {
    pub user_id: String,
    pub is_online: bool,
    pub last_seen_at: DateTime<Utc>,
}

/// Optimistic-send entry. A pending message carries a client-generated
/// correlation id; the confirmed write replaces it by that id, never by
/// content equality.
#[derive(Clone, Debug)]
pub enum OutgoingMessage {
    Pending {
        correlation_id: Uuid,
        content: String,
        queued_at: DateTime<Utc>,
    },
    Confirmed(Message),
}

impl OutgoingMessage {
    pub fn is_pending(&self) -> bool {
        matches!(self, OutgoingMessage::Pending { .. })
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            OutgoingMessage::Pending { correlation_id, .. } => Some(*correlation_id),
            OutgoingMessage::Confirmed(_) => None,
        }
    }
}

/// Client-side send queue for optimistic UI. Entries keep their append order,
/// so a confirmed message stays where its pending placeholder was.
#[derive(Debug, Default)]
pub struct Outbox {
    entries: Vec<OutgoingMessage>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a pending message and return its correlation id.
    pub fn push_pending(&mut self, content: impl Into<String>) -> Uuid {
        let correlation_id = Uuid::new_v4();
        self.entries.push(OutgoingMessage::Pending {
            correlation_id,
            content: content.into(),
            queued_at: Utc::now(),
        });
        correlation_id
    }

    /// Replace the pending entry matching `correlation_id` with the confirmed
    /// message. Returns false when no pending entry matches (e.g. it was
    /// already reconciled).
    pub fn confirm(&mut self, correlation_id: Uuid, message: Message) -> bool {
        for entry in self.entries.iter_mut() {
            if entry.correlation_id() == Some(correlation_id) {
                *entry = OutgoingMessage::Confirmed(message);
                return true;
            }
        }
        false
    }

    pub fn entries(&self) -> &[OutgoingMessage] {
        &self.entries
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }
}
