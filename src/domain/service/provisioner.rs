//! Team conversation provisioning.
//!
//! Every team gets exactly one group conversation, created lazily the first
//! time a member's conversation list is requested. Safe to call repeatedly:
//! the existence check short-circuits, a storage-level uniqueness conflict is
//! treated as "already exists, re-fetch", and the confirmed roster is synced
//! on every call (additions only; members who left go implicitly stale).

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::model::{ConversationKind, ConversationRecord};
use crate::domain::repository::ClientContext;
use crate::error::{StoreError, StoreResult};

pub struct TeamConversationProvisioner {
    ctx: Arc<ClientContext>,
    failure_cap: u32,
    consecutive_failures: AtomicU32,
}

impl TeamConversationProvisioner {
    pub fn new(ctx: Arc<ClientContext>, failure_cap: u32) -> Self {
        Self {
            ctx,
            failure_cap,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Idempotently ensure the team's conversation exists with the confirmed
    /// roster as participants.
    ///
    /// After `failure_cap` consecutive failures this becomes a no-op for the
    /// rest of the process lifetime, so a persistently failing dependency is
    /// not hot-looped against on every listing.
    pub async fn ensure_team_conversation(
        &self,
        team_id: &str,
        team_name: &str,
    ) -> StoreResult<()> {
        if self.consecutive_failures.load(Ordering::Relaxed) >= self.failure_cap {
            debug!(
                team_id = %team_id,
                "provisioning disabled after repeated failures"
            );
            return Ok(());
        }

        match self.ensure_inner(team_id, team_name).await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    team_id = %team_id,
                    consecutive_failures = failures,
                    error = %err,
                    "team conversation provisioning attempt failed"
                );
                Err(err)
            }
        }
    }

    async fn ensure_inner(&self, team_id: &str, team_name: &str) -> StoreResult<()> {
        let existing = self
            .ctx
            .conversations
            .find_team_conversation(team_id)
            .await?;

        let conversation = match existing {
            Some(record) => record,
            None => self.create_team_conversation(team_id, team_name).await?,
        };

        // Sync the roster: confirmed members missing from the conversation
        // are added in one batch.
        let confirmed = self.ctx.teams.confirmed_member_ids(team_id).await?;
        let current: HashSet<String> = self
            .ctx
            .conversations
            .participant_ids(&conversation.id)
            .await?
            .into_iter()
            .collect();
        let to_add: Vec<String> = confirmed
            .into_iter()
            .filter(|id| !current.contains(id))
            .collect();

        if !to_add.is_empty() {
            self.ctx
                .conversations
                .add_participants(&conversation.id, &to_add)
                .await?;
            info!(
                conversation_id = %conversation.id,
                team_id = %team_id,
                added = to_add.len(),
                "team roster synchronized"
            );
        }

        Ok(())
    }

    async fn create_team_conversation(
        &self,
        team_id: &str,
        team_name: &str,
    ) -> StoreResult<ConversationRecord> {
        let record = ConversationRecord {
            id: Uuid::new_v4().to_string(),
            kind: ConversationKind::Team,
            name: Some(format!("Team {team_name}")),
            team_id: Some(team_id.to_string()),
            created_by: self.ctx.user_id.clone(),
            created_at: Utc::now(),
        };

        match self.ctx.conversations.create_conversation(&record).await {
            Ok(()) => {
                info!(
                    conversation_id = %record.id,
                    team_id = %team_id,
                    "team conversation created"
                );
                Ok(record)
            }
            // Lost the creation race: another member's listing got there
            // first. Re-fetch and continue with theirs.
            Err(StoreError::Conflict(_)) => {
                debug!(team_id = %team_id, "team conversation already created concurrently");
                self.ctx
                    .conversations
                    .find_team_conversation(team_id)
                    .await?
                    .ok_or_else(|| {
                        StoreError::NotFound(format!(
                            "team conversation for {team_id} missing after conflict"
                        ))
                    })
            }
            Err(err) => Err(err),
        }
    }
}
