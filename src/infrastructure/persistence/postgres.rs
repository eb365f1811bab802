//! PostgreSQL store implementation.
//!
//! Schema lives in `migrations/0001_messaging.sql`. Team conversation
//! uniqueness is a partial unique index on `team_id`; the resulting
//! unique-violation surfaces as `StoreError::Conflict`. Unread counts are
//! computed server-side so listings never pull full histories.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::broadcast;
use tracing::info;
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

pub struct PostgresStore {
    pool: PgPool,
    // Change fan-out for cache invalidation. A deployment with database-side
    // notifications would publish into the same channel from a LISTEN task.
    presence_tx: broadcast::Sender<PresenceChange>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        let (presence_tx, _) = broadcast::channel(256);
        Self { pool, presence_tx }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        info!("connected to postgres store");
        Ok(Self::new(pool))
    }

    fn map_conversation_row(row: &sqlx::postgres::PgRow) -> StoreResult<ConversationRecord> {
        let kind: String = row.get("kind");
        let kind = ConversationKind::parse(&kind)
            .ok_or_else(|| StoreError::Validation(format!("unknown conversation kind {kind}")))?;
        Ok(ConversationRecord {
            id: row.get("id"),
            kind,
            name: row.get("name"),
            team_id: row.get("team_id"),
            created_by: row.get("created_by"),
            created_at: row.get("created_at"),
        })
    }

    fn map_message_row(row: &sqlx::postgres::PgRow) -> MessageRecord {
        MessageRecord {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            sender_id: row.get("sender_id"),
            content: row.get("content"),
            created_at: row.get("created_at"),
            seq: row.get("seq"),
            is_deleted: row.get("is_deleted"),
        }
    }
}

#[async_trait]
impl ConversationRepository for PostgresStore {
    async fn conversation_ids_for_user(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT conversation_id
            FROM conversation_participants
            WHERE user_id = $1
            ORDER BY conversation_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("conversation_id")).collect())
    }

    async fn conversations_by_ids(&self, ids: &[String]) -> StoreResult<Vec<ConversationRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT id, kind, name, team_id, created_by, created_at
            FROM conversations
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_conversation_row).collect()
    }

    async fn find_team_conversation(
        &self,
        team_id: &str,
    ) -> StoreResult<Option<ConversationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, kind, name, team_id, created_by, created_at
            FROM conversations
            WHERE kind = 'team' AND team_id = $1
            LIMIT 1
            "#,
        )
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Self::map_conversation_row(&row)?))
    }

    async fn create_conversation(&self, record: &ConversationRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, kind, name, team_id, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.id)
        .bind(record.kind.as_str())
        .bind(&record.name)
        .bind(&record.team_id)
        .bind(&record.created_by)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        info!(conversation_id = %record.id, kind = record.kind.as_str(), "conversation created");
        Ok(())
    }

    async fn participant_ids(&self, conversation_id: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id
            FROM conversation_participants
            WHERE conversation_id = $1
            ORDER BY joined_at
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("user_id")).collect())
    }

    async fn add_participants(
        &self,
        conversation_id: &str,
        user_ids: &[String],
    ) -> StoreResult<()> {
        if user_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id)
            SELECT $1, unnest($2::text[])
            ON CONFLICT (conversation_id, user_id) DO NOTHING
            "#,
        )
        .bind(conversation_id)
        .bind(user_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_read(
        &self,
        conversation_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id, last_read_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (conversation_id, user_id)
            DO UPDATE SET last_read_at = EXCLUDED.last_read_at
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn unread_count(&self, conversation_id: &str, user_id: &str) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM messages m
            WHERE m.conversation_id = $1
              AND m.is_deleted = FALSE
              AND m.sender_id <> $2
              AND m.created_at > COALESCE(
                  (SELECT p.last_read_at
                   FROM conversation_participants p
                   WHERE p.conversation_id = $1 AND p.user_id = $2),
                  'epoch'::timestamptz)
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[async_trait]
impl MessageRepository for PostgresStore {
    async fn messages(&self, conversation_id: &str) -> StoreResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, sender_id, content, created_at, seq, is_deleted
            FROM messages
            WHERE conversation_id = $1 AND is_deleted = FALSE
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_message_row).collect())
    }

    async fn last_message(&self, conversation_id: &str) -> StoreResult<Option<MessageRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_id, sender_id, content, created_at, seq, is_deleted
            FROM messages
            WHERE conversation_id = $1 AND is_deleted = FALSE
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::map_message_row))
    }

    async fn insert_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> StoreResult<MessageRecord> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, created_at, is_deleted)
            VALUES ($1, $2, $3, $4, $5, FALSE)
            RETURNING seq
            "#,
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(MessageRecord {
            id,
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at,
            seq,
            is_deleted: false,
        })
    }

    async fn soft_delete_message(&self, message_id: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE messages SET is_deleted = TRUE WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("message {message_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileRepository for PostgresStore {
    async fn profiles_by_ids(
        &self,
        user_ids: &[String],
    ) -> StoreResult<HashMap<String, Profile>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT user_id, display_name, avatar_url
            FROM profiles
            WHERE user_id = ANY($1)
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let profile = Profile {
                    user_id: row.get("user_id"),
                    display_name: row.get("display_name"),
                    avatar_url: row.get("avatar_url"),
                };
                (profile.user_id.clone(), profile)
            })
            .collect())
    }
}

#[async_trait]
impl TeamRepository for PostgresStore {
    async fn membership_for_user(&self, user_id: &str) -> StoreResult<Option<TeamMembership>> {
        let row = sqlx::query(
            r#"
            SELECT tm.team_id, t.name AS team_name
            FROM team_members tm
            INNER JOIN teams t ON t.id = tm.team_id
            WHERE tm.user_id = $1 AND tm.status = 'confirmed'
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| TeamMembership {
            team_id: row.get("team_id"),
            team_name: row.get("team_name"),
        }))
    }

    async fn confirmed_member_ids(&self, team_id: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id
            FROM team_members
            WHERE team_id = $1 AND status = 'confirmed'
            "#,
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("user_id")).collect())
    }
}

#[async_trait]
impl PresenceRepository for PostgresStore {
    async fn update_presence(
        &self,
        user_id: &str,
        is_online: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_presence (user_id, is_online, last_seen_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET is_online = EXCLUDED.is_online, last_seen_at = EXCLUDED.last_seen_at
            "#,
        )
        .bind(user_id)
        .bind(is_online)
        .bind(at)
        .execute(&self.pool)
        .await?;

        let _ = self.presence_tx.send(PresenceChange {
            user_id: user_id.to_string(),
            is_online,
            last_seen_at: at,
        });
        Ok(())
    }

    async fn presence(&self, user_id: &str) -> StoreResult<Option<PresenceRecord>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, is_online, last_seen_at
            FROM user_presence
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| PresenceRecord {
            user_id: row.get("user_id"),
            is_online: row.get("is_online"),
            last_seen_at: row.get("last_seen_at"),
        }))
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<PresenceChange> {
        self.presence_tx.subscribe()
    }
}
