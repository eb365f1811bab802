//! Conversation directory: everything the conversation list screen needs in
//! one call, with per-conversation enrichment kept fail-soft.

use std::cmp::Ordering;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::domain::model::{
    ConversationKind, ConversationRecord, ConversationSummary, LastMessage, Participant,
};
use crate::domain::repository::ClientContext;
use crate::domain::service::provisioner::TeamConversationProvisioner;
use crate::error::{StoreError, StoreResult};

pub struct ConversationDirectory {
    ctx: Arc<ClientContext>,
    provisioner: Arc<TeamConversationProvisioner>,
}

impl ConversationDirectory {
    pub fn new(ctx: Arc<ClientContext>, provisioner: Arc<TeamConversationProvisioner>) -> Self {
        Self { ctx, provisioner }
    }

    /// List the context user's conversations, each annotated with the other
    /// participants, the last message and the unread count.
    ///
    /// A user with no conversations gets an empty list, not an error. A
    /// failure enriching one conversation drops that conversation from the
    /// result instead of aborting the listing.
    pub async fn list_conversations(&self) -> StoreResult<Vec<ConversationSummary>> {
        self.provision_team_conversation_if_member().await;

        let ids = self
            .ctx
            .conversations
            .conversation_ids_for_user(&self.ctx.user_id)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.ctx.conversations.conversations_by_ids(&ids).await?;

        let enriched = join_all(records.into_iter().map(|record| self.enrich(record))).await;
        let mut summaries = Vec::with_capacity(enriched.len());
        for result in enriched {
            match result {
                Ok(summary) => summaries.push(summary),
                Err((conversation_id, err)) => warn!(
                    conversation_id = %conversation_id,
                    error = %err,
                    "dropping conversation from listing"
                ),
            }
        }

        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    /// Provisioning must never fail the listing; failures are logged and the
    /// provisioner itself stops retrying after repeated consecutive failures.
    async fn provision_team_conversation_if_member(&self) {
        match self
            .ctx
            .teams
            .membership_for_user(&self.ctx.user_id)
            .await
        {
            Ok(Some(team)) => {
                if let Err(err) = self
                    .provisioner
                    .ensure_team_conversation(&team.team_id, &team.team_name)
                    .await
                {
                    warn!(
                        team_id = %team.team_id,
                        error = %err,
                        "team conversation provisioning failed"
                    );
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "team membership lookup failed"),
        }
    }

    async fn enrich(
        &self,
        record: ConversationRecord,
    ) -> Result<ConversationSummary, (String, StoreError)> {
        let conversation_id = record.id.clone();
        self.enrich_inner(record)
            .await
            .map_err(|err| (conversation_id, err))
    }

    async fn enrich_inner(&self, record: ConversationRecord) -> StoreResult<ConversationSummary> {
        let user_id = &self.ctx.user_id;

        let participant_ids = self.ctx.conversations.participant_ids(&record.id).await?;
        let other_ids: Vec<String> = participant_ids
            .into_iter()
            .filter(|id| id != user_id)
            .collect();

        let last = self.ctx.messages.last_message(&record.id).await?;

        // One batched profile lookup covers the other participants and the
        // last message's sender.
        let mut lookup_ids = other_ids.clone();
        if let Some(msg) = &last {
            if !lookup_ids.contains(&msg.sender_id) {
                lookup_ids.push(msg.sender_id.clone());
            }
        }
        let profiles = self.ctx.profiles.profiles_by_ids(&lookup_ids).await?;

        let participants: Vec<Participant> = other_ids
            .iter()
            .map(|id| match profiles.get(id) {
                Some(profile) => Participant {
                    user_id: id.clone(),
                    display_name: profile.display_name.clone(),
                    avatar_url: profile.avatar_url.clone(),
                },
                None => Participant {
                    user_id: id.clone(),
                    display_name: id.clone(),
                    avatar_url: None,
                },
            })
            .collect();

        let name = match record.kind {
            ConversationKind::Team => record.name.clone(),
            ConversationKind::Direct => participants
                .first()
                .map(|p| p.display_name.clone())
                .or_else(|| record.name.clone()),
        };

        let last_message = last.map(|msg| LastMessage {
            sender_name: profiles
                .get(&msg.sender_id)
                .map(|p| p.display_name.clone())
                .unwrap_or_else(|| msg.sender_id.clone()),
            content: msg.content,
            created_at: msg.created_at,
        });

        let unread_count = self
            .ctx
            .conversations
            .unread_count(&record.id, user_id)
            .await?;

        debug!(
            conversation_id = %record.id,
            unread_count,
            "conversation enriched"
        );

        Ok(ConversationSummary {
            id: record.id,
            kind: record.kind,
            name,
            participants,
            last_message,
            unread_count,
        })
    }
}

/// Unread conversations first; among ties, newest last message first;
/// conversations without any message sort last. `sort_by` is stable, so
/// otherwise-equal entries keep their order.
fn sort_summaries(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| {
        let a_unread = a.unread_count > 0;
        let b_unread = b.unread_count > 0;
        if a_unread != b_unread {
            return b_unread.cmp(&a_unread);
        }
        match (&a.last_message, &b.last_message) {
            (Some(x), Some(y)) => y.created_at.cmp(&x.created_at),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn summary(
        id: &str,
        unread: i64,
        last_message_age_secs: Option<i64>,
    ) -> ConversationSummary {
        ConversationSummary {
            id: id.to_string(),
            kind: ConversationKind::Direct,
            name: None,
            participants: Vec::new(),
            last_message: last_message_age_secs.map(|age| LastMessage {
                content: "hi".to_string(),
                created_at: Utc::now() - Duration::seconds(age),
                sender_name: "Bob".to_string(),
            }),
            unread_count: unread,
        }
    }

    #[test]
    fn unread_conversations_sort_before_read_ones() {
        // C1 unread with an older last message, C2 read but newer
        let mut summaries = vec![summary("c2", 0, Some(10)), summary("c1", 2, Some(600))];
        sort_summaries(&mut summaries);
        assert_eq!(summaries[0].id, "c1");
        assert_eq!(summaries[1].id, "c2");
    }

    #[test]
    fn ties_break_by_last_message_recency() {
        let mut summaries = vec![
            summary("old", 0, Some(3_600)),
            summary("new", 0, Some(60)),
        ];
        sort_summaries(&mut summaries);
        assert_eq!(summaries[0].id, "new");
    }

    #[test]
    fn message_less_conversations_sort_last() {
        let mut summaries = vec![
            summary("empty", 0, None),
            summary("active", 0, Some(120)),
        ];
        sort_summaries(&mut summaries);
        assert_eq!(summaries[0].id, "active");
        assert_eq!(summaries[1].id, "empty");
    }

    #[test]
    fn sort_is_stable_for_equal_entries() {
        let mut summaries = vec![summary("a", 0, None), summary("b", 0, None)];
        sort_summaries(&mut summaries);
        assert_eq!(summaries[0].id, "a");
        assert_eq!(summaries[1].id, "b");
    }
}
