//! In-memory store implementation.
//!
//! Backs the test suite and lightweight embedding. Behaves like the Postgres
//! store where the contracts care: team conversation uniqueness is enforced
//! as a conflict, message order is (created_at, seq), unread counts are
//! computed against the read marker. Presence changes are published on a
//! broadcast channel, standing in for the managed realtime feed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use crate::domain::model::{
    ConversationKind, ConversationRecord, MessageRecord, PresenceChange, PresenceRecord, Profile,
    TeamMembership,
};
use crate::domain::repository::{
    ConversationRepository, MessageRepository, PresenceRepository, ProfileRepository,
    TeamRepository,
};
use crate::error::{StoreError, StoreResult};

pub struct InMemoryStore {
    conversations: RwLock<HashMap<String, ConversationRecord>>,
    /// conversation_id -> participant user ids, insertion order preserved
    participants: RwLock<HashMap<String, Vec<String>>>,
    /// (conversation_id, user_id) -> last_read_at
    read_markers: RwLock<HashMap<(String, String), DateTime<Utc>>>,
    messages: RwLock<Vec<MessageRecord>>,
    profiles: RwLock<HashMap<String, Profile>>,
    /// user_id -> team membership
    memberships: RwLock<HashMap<String, TeamMembership>>,
    /// team_id -> confirmed member user ids
    confirmed_members: RwLock<HashMap<String, Vec<String>>>,
    presence: RwLock<HashMap<String, PresenceRecord>>,
    presence_tx: broadcast::Sender<PresenceChange>,
    next_seq: AtomicI64,
    presence_writes: AtomicU64,
    /// Failure injection knobs for tests.
    failing_unread: RwLock<HashSet<String>>,
    failing_teams: RwLock<HashSet<String>>,
    failing_presence: AtomicBool,
    /// Team ids whose next conversation lookup misses, to simulate a lost
    /// creation race.
    hidden_team_lookups: RwLock<HashSet<String>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (presence_tx, _) = broadcast::channel(64);
        Self {
            conversations: RwLock::new(HashMap::new()),
            participants: RwLock::new(HashMap::new()),
            read_markers: RwLock::new(HashMap::new()),
            messages: RwLock::new(Vec::new()),
            profiles: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
            confirmed_members: RwLock::new(HashMap::new()),
            presence: RwLock::new(HashMap::new()),
            presence_tx,
            next_seq: AtomicI64::new(1),
            presence_writes: AtomicU64::new(0),
            failing_unread: RwLock::new(HashSet::new()),
            failing_teams: RwLock::new(HashSet::new()),
            failing_presence: AtomicBool::new(false),
            hidden_team_lookups: RwLock::new(HashSet::new()),
        }
    }

    // ----- seeding helpers -----

    pub async fn add_profile(&self, user_id: &str, display_name: &str, avatar_url: Option<&str>) {
        self.profiles.write().await.insert(
            user_id.to_string(),
            Profile {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                avatar_url: avatar_url.map(str::to_string),
            },
        );
    }

    pub async fn set_membership(&self, user_id: &str, team_id: &str, team_name: &str) {
        self.memberships.write().await.insert(
            user_id.to_string(),
            TeamMembership {
                team_id: team_id.to_string(),
                team_name: team_name.to_string(),
            },
        );
    }

    pub async fn add_confirmed_member(&self, team_id: &str, user_id: &str) {
        self.confirmed_members
            .write()
            .await
            .entry(team_id.to_string())
            .or_default()
            .push(user_id.to_string());
    }

    /// Insert a direct conversation between two users and return its id.
    pub async fn add_direct_conversation(&self, user_a: &str, user_b: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let record = ConversationRecord {
            id: id.clone(),
            kind: ConversationKind::Direct,
            name: None,
            team_id: None,
            created_by: user_a.to_string(),
            created_at: Utc::now(),
        };
        self.conversations.write().await.insert(id.clone(), record);
        self.participants
            .write()
            .await
            .insert(id.clone(), vec![user_a.to_string(), user_b.to_string()]);
        id
    }

    /// Insert a message with an explicit timestamp, for test scenarios that
    /// need controlled ordering.
    pub async fn add_message_at(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> MessageRecord {
        let record = MessageRecord {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            is_deleted: false,
        };
        self.messages.write().await.push(record.clone());
        record
    }

    pub async fn set_presence_at(&self, user_id: &str, is_online: bool, at: DateTime<Utc>) {
        self.presence.write().await.insert(
            user_id.to_string(),
            PresenceRecord {
                user_id: user_id.to_string(),
                is_online,
                last_seen_at: at,
            },
        );
    }

    // ----- failure injection (tests) -----

    pub async fn fail_unread_count_for(&self, conversation_id: &str) {
        self.failing_unread
            .write()
            .await
            .insert(conversation_id.to_string());
    }

    pub async fn fail_team_queries_for(&self, team_id: &str) {
        self.failing_teams.write().await.insert(team_id.to_string());
    }

    pub async fn clear_team_failures(&self) {
        self.failing_teams.write().await.clear();
    }

    pub fn fail_presence_writes(&self, failing: bool) {
        self.failing_presence.store(failing, Ordering::Relaxed);
    }

    /// Make the next `find_team_conversation` for this team miss, as if the
    /// conversation were inserted concurrently between the existence check
    /// and the insert.
    pub async fn hide_team_conversation_once(&self, team_id: &str) {
        self.hidden_team_lookups
            .write()
            .await
            .insert(team_id.to_string());
    }

    // ----- inspection helpers (tests) -----

    pub fn presence_write_count(&self) -> u64 {
        self.presence_writes.load(Ordering::Relaxed)
    }

    pub async fn team_conversation_count(&self, team_id: &str) -> usize {
        self.conversations
            .read()
            .await
            .values()
            .filter(|c| c.kind == ConversationKind::Team && c.team_id.as_deref() == Some(team_id))
            .count()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryStore {
    async fn conversation_ids_for_user(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let participants = self.participants.read().await;
        let mut ids: Vec<String> = participants
            .iter()
            .filter(|(_, users)| users.iter().any(|u| u == user_id))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn conversations_by_ids(&self, ids: &[String]) -> StoreResult<Vec<ConversationRecord>> {
        let conversations = self.conversations.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| conversations.get(id).cloned())
            .collect())
    }

    async fn find_team_conversation(
        &self,
        team_id: &str,
    ) -> StoreResult<Option<ConversationRecord>> {
        if self.hidden_team_lookups.write().await.remove(team_id) {
            return Ok(None);
        }
        let conversations = self.conversations.read().await;
        Ok(conversations
            .values()
            .find(|c| c.kind == ConversationKind::Team && c.team_id.as_deref() == Some(team_id))
            .cloned())
    }

    async fn create_conversation(&self, record: &ConversationRecord) -> StoreResult<()> {
        let mut conversations = self.conversations.write().await;
        if record.kind == ConversationKind::Team {
            let team_id = record.team_id.as_deref().ok_or_else(|| {
                StoreError::Validation("team conversation requires a team_id".to_string())
            })?;
            let duplicate = conversations
                .values()
                .any(|c| c.kind == ConversationKind::Team && c.team_id.as_deref() == Some(team_id));
            if duplicate {
                return Err(StoreError::Conflict(format!(
                    "team conversation for {team_id} already exists"
                )));
            }
        }
        conversations.insert(record.id.clone(), record.clone());
        self.participants
            .write()
            .await
            .entry(record.id.clone())
            .or_default();
        Ok(())
    }

    async fn participant_ids(&self, conversation_id: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .participants
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_participants(
        &self,
        conversation_id: &str,
        user_ids: &[String],
    ) -> StoreResult<()> {
        let mut participants = self.participants.write().await;
        let entry = participants
            .entry(conversation_id.to_string())
            .or_default();
        for user_id in user_ids {
            if !entry.contains(user_id) {
                entry.push(user_id.clone());
            }
        }
        Ok(())
    }

    async fn mark_read(
        &self,
        conversation_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.read_markers
            .write()
            .await
            .insert((conversation_id.to_string(), user_id.to_string()), at);
        Ok(())
    }

    async fn unread_count(&self, conversation_id: &str, user_id: &str) -> StoreResult<i64> {
        if self.failing_unread.read().await.contains(conversation_id) {
            return Err(StoreError::PermissionDenied(
                "row-level security rejection".to_string(),
            ));
        }
        let marker = self
            .read_markers
            .read()
            .await
            .get(&(conversation_id.to_string(), user_id.to_string()))
            .copied();
        let messages = self.messages.read().await;
        let count = messages
            .iter()
            .filter(|m| {
                m.conversation_id == conversation_id
                    && !m.is_deleted
                    && m.sender_id != user_id
                    && marker.is_none_or(|at| m.created_at > at)
            })
            .count();
        Ok(count as i64)
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn messages(&self, conversation_id: &str) -> StoreResult<Vec<MessageRecord>> {
        let messages = self.messages.read().await;
        let mut result: Vec<MessageRecord> = messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && !m.is_deleted)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
        Ok(result)
    }

    async fn last_message(&self, conversation_id: &str) -> StoreResult<Option<MessageRecord>> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && !m.is_deleted)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)))
            .cloned())
    }

    async fn insert_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> StoreResult<MessageRecord> {
        let record = MessageRecord {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            is_deleted: false,
        };
        self.messages.write().await.push(record.clone());
        Ok(record)
    }

    async fn soft_delete_message(&self, message_id: &str) -> StoreResult<()> {
        let mut messages = self.messages.write().await;
        match messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.is_deleted = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("message {message_id}"))),
        }
    }
}

#[async_trait]
impl ProfileRepository for InMemoryStore {
    async fn profiles_by_ids(
        &self,
        user_ids: &[String],
    ) -> StoreResult<HashMap<String, Profile>> {
        let profiles = self.profiles.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| profiles.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }
}

#[async_trait]
impl TeamRepository for InMemoryStore {
    async fn membership_for_user(&self, user_id: &str) -> StoreResult<Option<TeamMembership>> {
        Ok(self.memberships.read().await.get(user_id).cloned())
    }

    async fn confirmed_member_ids(&self, team_id: &str) -> StoreResult<Vec<String>> {
        if self.failing_teams.read().await.contains(team_id) {
            return Err(StoreError::transient(anyhow::anyhow!(
                "team member query failed"
            )));
        }
        Ok(self
            .confirmed_members
            .read()
            .await
            .get(team_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl PresenceRepository for InMemoryStore {
    async fn update_presence(
        &self,
        user_id: &str,
        is_online: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        if self.failing_presence.load(Ordering::Relaxed) {
            return Err(StoreError::transient(anyhow::anyhow!(
                "presence write failed"
            )));
        }
        let record = PresenceRecord {
            user_id: user_id.to_string(),
            is_online,
            last_seen_at: at,
        };
        self.presence
            .write()
            .await
            .insert(user_id.to_string(), record.clone());
        self.presence_writes.fetch_add(1, Ordering::Relaxed);
        let _ = self.presence_tx.send(PresenceChange {
            user_id: record.user_id,
            is_online: record.is_online,
            last_seen_at: record.last_seen_at,
        });
        Ok(())
    }

    async fn presence(&self, user_id: &str) -> StoreResult<Option<PresenceRecord>> {
        Ok(self.presence.read().await.get(user_id).cloned())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<PresenceChange> {
        self.presence_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team_conversation(id: &str, team_id: &str) -> ConversationRecord {
        ConversationRecord {
            id: id.to_string(),
            kind: ConversationKind::Team,
            name: Some("Team Test".to_string()),
            team_id: Some(team_id.to_string()),
            created_by: "alice".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn second_team_conversation_for_the_same_team_conflicts() {
        let store = InMemoryStore::new();
        store
            .create_conversation(&team_conversation("c1", "t1"))
            .await
            .expect("first insert");

        let err = store
            .create_conversation(&team_conversation("c2", "t1"))
            .await
            .expect_err("duplicate must conflict");
        assert!(matches!(err, StoreError::Conflict(_)));

        // a different team is unaffected
        store
            .create_conversation(&team_conversation("c3", "t2"))
            .await
            .expect("other team inserts fine");
    }

    #[tokio::test]
    async fn unread_count_ignores_own_and_deleted_messages() {
        let store = InMemoryStore::new();
        let conversation = store.add_direct_conversation("alice", "bob").await;
        store
            .add_message_at(&conversation, "alice", "mine", Utc::now())
            .await;
        let spam = store
            .add_message_at(&conversation, "bob", "spam", Utc::now())
            .await;
        store
            .add_message_at(&conversation, "bob", "real", Utc::now())
            .await;
        store.soft_delete_message(&spam.id).await.expect("delete");

        let unread = store.unread_count(&conversation, "alice").await.expect("count");
        assert_eq!(unread, 1);
    }

    #[tokio::test]
    async fn hidden_team_conversation_misses_exactly_once() {
        let store = InMemoryStore::new();
        store
            .create_conversation(&team_conversation("c1", "t1"))
            .await
            .expect("insert");

        store.hide_team_conversation_once("t1").await;
        assert!(store.find_team_conversation("t1").await.expect("query").is_none());
        let found = store
            .find_team_conversation("t1")
            .await
            .expect("query")
            .expect("visible again");
        assert_eq!(found.id, "c1");
    }

    #[tokio::test]
    async fn presence_updates_are_published_to_subscribers() {
        let store = InMemoryStore::new();
        let mut changes = store.subscribe_changes();
        store
            .update_presence("alice", true, Utc::now())
            .await
            .expect("update");

        let change = changes.recv().await.expect("change event");
        assert_eq!(change.user_id, "alice");
        assert!(change.is_online);
    }
}
