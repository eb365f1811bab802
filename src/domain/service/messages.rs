//! Message store access: fetch, send, mark-read and soft delete, with sender
//! profiles joined in one batched lookup per unique sender.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::domain::model::{Message, MessageRecord, Profile};
use crate::domain::repository::ClientContext;
use crate::error::{StoreError, StoreResult};

pub struct MessageService {
    ctx: Arc<ClientContext>,
}

impl MessageService {
    pub fn new(ctx: Arc<ClientContext>) -> Self {
        Self { ctx }
    }

    /// Full history of a conversation, ascending by creation time with the
    /// store-assigned sequence as tiebreak. Soft-deleted messages are
    /// excluded; messages are never reordered after fetch.
    pub async fn get_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        let records = self.ctx.messages.messages(conversation_id).await?;

        let mut sender_ids: Vec<String> = Vec::new();
        for record in &records {
            if !sender_ids.contains(&record.sender_id) {
                sender_ids.push(record.sender_id.clone());
            }
        }
        let profiles = self.ctx.profiles.profiles_by_ids(&sender_ids).await?;

        Ok(records
            .into_iter()
            .map(|record| enrich(record, &profiles))
            .collect())
    }

    /// Send on behalf of the context user. Empty or whitespace-only content
    /// is rejected before any store call.
    pub async fn send_message(&self, conversation_id: &str, content: &str) -> StoreResult<Message> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(StoreError::Validation(
                "message content must not be empty".to_string(),
            ));
        }

        let record = self
            .ctx
            .messages
            .insert_message(conversation_id, &self.ctx.user_id, trimmed)
            .await?;

        let sender_ids = vec![record.sender_id.clone()];
        let profiles = self.ctx.profiles.profiles_by_ids(&sender_ids).await?;

        info!(
            conversation_id = %conversation_id,
            message_id = %record.id,
            "message sent"
        );
        Ok(enrich(record, &profiles))
    }

    /// Upsert the context user's read marker to now.
    pub async fn mark_read(&self, conversation_id: &str) -> StoreResult<()> {
        self.ctx
            .conversations
            .mark_read(conversation_id, &self.ctx.user_id, Utc::now())
            .await?;
        debug!(conversation_id = %conversation_id, "conversation marked read");
        Ok(())
    }

    /// Soft-delete; the row stays for ordering and audit.
    pub async fn delete_message(&self, message_id: &str) -> StoreResult<()> {
        self.ctx.messages.soft_delete_message(message_id).await?;
        info!(message_id = %message_id, "message deleted");
        Ok(())
    }
}

fn enrich(record: MessageRecord, profiles: &HashMap<String, Profile>) -> Message {
    let (sender_name, sender_avatar) = match profiles.get(&record.sender_id) {
        Some(profile) => (profile.display_name.clone(), profile.avatar_url.clone()),
        None => (record.sender_id.clone(), None),
    };
    Message {
        id: record.id,
        conversation_id: record.conversation_id,
        sender_id: record.sender_id,
        sender_name,
        sender_avatar,
        content: record.content,
        created_at: record.created_at,
        seq: record.seq,
    }
}
