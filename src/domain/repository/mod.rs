//! Store boundary.
//!
//! The backing store (tables, server-side counts, presence channel) is an
//! external collaborator; these traits are everything the domain services are
//! allowed to ask of it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::domain::model::{
    ConversationRecord, MessageRecord, PresenceChange, PresenceRecord, Profile, TeamMembership,
};
use crate::error::StoreResult;

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Ids of every conversation the user participates in.
    async fn conversation_ids_for_user(&self, user_id: &str) -> StoreResult<Vec<String>>;

    async fn conversations_by_ids(&self, ids: &[String]) -> StoreResult<Vec<ConversationRecord>>;

    async fn find_team_conversation(&self, team_id: &str)
    -> StoreResult<Option<ConversationRecord>>;

    /// Inserting a second team conversation for the same team fails with
    /// `StoreError::Conflict`.
    async fn create_conversation(&self, record: &ConversationRecord) -> StoreResult<()>;

    async fn participant_ids(&self, conversation_id: &str) -> StoreResult<Vec<String>>;

    async fn add_participants(&self, conversation_id: &str, user_ids: &[String])
    -> StoreResult<()>;

    /// Upsert the user's read marker to `at`.
    async fn mark_read(
        &self,
        conversation_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Server-side count of non-deleted messages newer than the user's read
    /// marker, excluding the user's own messages.
    async fn unread_count(&self, conversation_id: &str, user_id: &str) -> StoreResult<i64>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Non-deleted messages of a conversation, ascending by (created_at, seq).
    async fn messages(&self, conversation_id: &str) -> StoreResult<Vec<MessageRecord>>;

    async fn last_message(&self, conversation_id: &str) -> StoreResult<Option<MessageRecord>>;

    async fn insert_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> StoreResult<MessageRecord>;

    /// Set the soft-delete flag. Messages are never hard-deleted here.
    async fn soft_delete_message(&self, message_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Batched profile lookup; unknown ids are simply absent from the map.
    async fn profiles_by_ids(&self, user_ids: &[String])
    -> StoreResult<HashMap<String, Profile>>;
}

#[async_trait]
pub trait TeamRepository: Send + Sync {
    async fn membership_for_user(&self, user_id: &str) -> StoreResult<Option<TeamMembership>>;

    /// User ids of members with confirmed status.
    async fn confirmed_member_ids(&self, team_id: &str) -> StoreResult<Vec<String>>;
}

#[async_trait]
pub trait PresenceRepository: Send + Sync {
    async fn update_presence(
        &self,
        user_id: &str,
        is_online: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn presence(&self, user_id: &str) -> StoreResult<Option<PresenceRecord>>;

    /// Row-change feed for the presence table.
    fn subscribe_changes(&self) -> broadcast::Receiver<PresenceChange>;
}

/// Explicit context handed to every service at construction: the store seam
/// plus the authenticated user the calls act on behalf of. Replaces ambient
/// client singletons.
pub struct ClientContext {
    pub user_id: String,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub teams: Arc<dyn TeamRepository>,
    pub presence: Arc<dyn PresenceRepository>,
}

impl ClientContext {
    pub fn new(
        user_id: impl Into<String>,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        profiles: Arc<dyn ProfileRepository>,
        teams: Arc<dyn TeamRepository>,
        presence: Arc<dyn PresenceRepository>,
    ) -> Arc<Self> {
        Arc::new(Self {
            user_id: user_id.into(),
            conversations,
            messages,
            profiles,
            teams,
            presence,
        })
    }

    /// Convenience for backends that implement the whole store surface on one
    /// type, like the bundled Postgres and in-memory stores.
    pub fn from_store<S>(user_id: impl Into<String>, store: Arc<S>) -> Arc<Self>
    where
        S: ConversationRepository
            + MessageRepository
            + ProfileRepository
            + TeamRepository
            + PresenceRepository
            + 'static,
    {
        Arc::new(Self {
            user_id: user_id.into(),
            conversations: store.clone(),
            messages: store.clone(),
            profiles: store.clone(),
            teams: store.clone(),
            presence: store,
        })
    }
}
