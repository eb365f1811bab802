//! End-to-end flows over the in-memory store: listing, team provisioning,
//! unread accounting and message access.

use std::sync::Arc;

use chrono::{Duration, Utc};
use squad_comms::domain::model::ConversationKind;
use squad_comms::domain::repository::ConversationRepository;
use squad_comms::domain::service::{
    ConversationDirectory, MessageService, TeamConversationProvisioner,
};
use squad_comms::infrastructure::persistence::InMemoryStore;
use squad_comms::{ClientContext, StoreError};

struct Client {
    directory: ConversationDirectory,
    messages: MessageService,
}

fn client_for(user_id: &str, store: &Arc<InMemoryStore>) -> Client {
    let ctx = ClientContext::from_store(user_id, store.clone());
    let provisioner = Arc::new(TeamConversationProvisioner::new(ctx.clone(), 3));
    Client {
        directory: ConversationDirectory::new(ctx.clone(), provisioner),
        messages: MessageService::new(ctx),
    }
}

async fn seed_team(store: &Arc<InMemoryStore>) {
    store.add_profile("alice", "Alice", None).await;
    store.add_profile("bob", "Bob", Some("http://cdn/bob.png")).await;
    store.add_profile("carol", "Carol", None).await;
    store.set_membership("alice", "t1", "Raptors").await;
    store.set_membership("bob", "t1", "Raptors").await;
    store.add_confirmed_member("t1", "alice").await;
    store.add_confirmed_member("t1", "bob").await;
    store.add_confirmed_member("t1", "carol").await;
}

#[tokio::test]
async fn user_with_no_conversations_gets_an_empty_list() {
    let store = Arc::new(InMemoryStore::new());
    store.add_profile("zoe", "Zoe", None).await;
    let zoe = client_for("zoe", &store);

    let listing = zoe.directory.list_conversations().await.expect("listing");
    assert!(listing.is_empty());
}

#[tokio::test]
async fn first_listing_provisions_the_team_conversation() {
    let store = Arc::new(InMemoryStore::new());
    seed_team(&store).await;
    let alice = client_for("alice", &store);

    let listing = alice.directory.list_conversations().await.expect("listing");

    assert_eq!(store.team_conversation_count("t1").await, 1);
    assert_eq!(listing.len(), 1);
    let team = &listing[0];
    assert_eq!(team.kind, ConversationKind::Team);
    assert_eq!(team.name.as_deref(), Some("Team Raptors"));
    // all three confirmed members participate; the requester is excluded
    // from the presented participant set
    let participant_ids = store.participant_ids(&team.id).await.expect("participants");
    assert_eq!(participant_ids.len(), 3);
    assert_eq!(team.participants.len(), 2);
    assert!(team.last_message.is_none());
    assert_eq!(team.unread_count, 0);
}

#[tokio::test]
async fn repeated_listings_keep_exactly_one_team_conversation() {
    let store = Arc::new(InMemoryStore::new());
    seed_team(&store).await;
    let alice = client_for("alice", &store);
    let bob = client_for("bob", &store);

    for _ in 0..3 {
        alice.directory.list_conversations().await.expect("listing");
        bob.directory.list_conversations().await.expect("listing");
    }
    assert_eq!(store.team_conversation_count("t1").await, 1);
}

#[tokio::test]
async fn roster_additions_are_synced_on_the_next_listing() {
    let store = Arc::new(InMemoryStore::new());
    seed_team(&store).await;
    let alice = client_for("alice", &store);

    let listing = alice.directory.list_conversations().await.expect("listing");
    let team_id = listing[0].id.clone();

    store.add_profile("dana", "Dana", None).await;
    store.add_confirmed_member("t1", "dana").await;

    alice.directory.list_conversations().await.expect("listing");
    let participant_ids = store.participant_ids(&team_id).await.expect("participants");
    assert!(participant_ids.contains(&"dana".to_string()));
    assert_eq!(participant_ids.len(), 4);
}

#[tokio::test]
async fn sent_message_appears_last_in_history() {
    let store = Arc::new(InMemoryStore::new());
    store.add_profile("alice", "Alice", None).await;
    store.add_profile("dave", "Dave", None).await;
    let conversation = store.add_direct_conversation("alice", "dave").await;
    let alice = client_for("alice", &store);

    store
        .add_message_at(&conversation, "dave", "first", Utc::now() - Duration::minutes(1))
        .await;
    alice
        .messages
        .send_message(&conversation, "hello")
        .await
        .expect("send");

    let history = alice.messages.get_messages(&conversation).await.expect("history");
    assert_eq!(history.len(), 2);
    let last = history.last().expect("non-empty");
    assert_eq!(last.content, "hello");
    assert_eq!(last.sender_id, "alice");
    assert_eq!(last.sender_name, "Alice");
}

#[tokio::test]
async fn whitespace_only_content_is_rejected_before_any_store_call() {
    let store = Arc::new(InMemoryStore::new());
    store.add_profile("alice", "Alice", None).await;
    store.add_profile("dave", "Dave", None).await;
    let conversation = store.add_direct_conversation("alice", "dave").await;
    let alice = client_for("alice", &store);

    let err = alice
        .messages
        .send_message(&conversation, "   \n\t")
        .await
        .expect_err("must reject");
    assert!(matches!(err, StoreError::Validation(_)));
    let history = alice.messages.get_messages(&conversation).await.expect("history");
    assert!(history.is_empty());
}

#[tokio::test]
async fn messages_are_ascending_with_insertion_order_tiebreak() {
    let store = Arc::new(InMemoryStore::new());
    store.add_profile("alice", "Alice", None).await;
    store.add_profile("dave", "Dave", None).await;
    let conversation = store.add_direct_conversation("alice", "dave").await;
    let alice = client_for("alice", &store);

    let t0 = Utc::now() - Duration::minutes(10);
    let tie = Utc::now() - Duration::minutes(5);
    store.add_message_at(&conversation, "dave", "oldest", t0).await;
    store.add_message_at(&conversation, "dave", "tie-a", tie).await;
    store.add_message_at(&conversation, "alice", "tie-b", tie).await;

    let history = alice.messages.get_messages(&conversation).await.expect("history");
    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["oldest", "tie-a", "tie-b"]);
    assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

#[tokio::test]
async fn mark_read_resets_unread_and_new_messages_raise_it_again() {
    let store = Arc::new(InMemoryStore::new());
    store.add_profile("alice", "Alice", None).await;
    store.add_profile("dave", "Dave", None).await;
    let conversation = store.add_direct_conversation("alice", "dave").await;
    let alice = client_for("alice", &store);
    let dave = client_for("dave", &store);

    dave.messages
        .send_message(&conversation, "ping")
        .await
        .expect("send");
    dave.messages
        .send_message(&conversation, "ping again")
        .await
        .expect("send");

    let listing = alice.directory.list_conversations().await.expect("listing");
    assert_eq!(listing[0].unread_count, 2);

    alice.messages.mark_read(&conversation).await.expect("mark read");
    let listing = alice.directory.list_conversations().await.expect("listing");
    assert_eq!(listing[0].unread_count, 0);

    dave.messages
        .send_message(&conversation, "anyone there?")
        .await
        .expect("send");
    let listing = alice.directory.list_conversations().await.expect("listing");
    assert_eq!(listing[0].unread_count, 1);
}

#[tokio::test]
async fn own_and_deleted_messages_do_not_count_as_unread() {
    let store = Arc::new(InMemoryStore::new());
    store.add_profile("alice", "Alice", None).await;
    store.add_profile("dave", "Dave", None).await;
    let conversation = store.add_direct_conversation("alice", "dave").await;
    let alice = client_for("alice", &store);
    let dave = client_for("dave", &store);

    alice
        .messages
        .send_message(&conversation, "my own message")
        .await
        .expect("send");
    let noisy = dave
        .messages
        .send_message(&conversation, "spam")
        .await
        .expect("send");
    dave.messages.delete_message(&noisy.id).await.expect("delete");

    let listing = alice.directory.list_conversations().await.expect("listing");
    assert_eq!(listing[0].unread_count, 0);
    // the deleted message is also gone from history
    let history = alice.messages.get_messages(&conversation).await.expect("history");
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn unread_conversations_sort_before_recently_active_read_ones() {
    let store = Arc::new(InMemoryStore::new());
    store.add_profile("alice", "Alice", None).await;
    store.add_profile("dave", "Dave", None).await;
    store.add_profile("erin", "Erin", None).await;
    let with_dave = store.add_direct_conversation("alice", "dave").await;
    let with_erin = store.add_direct_conversation("alice", "erin").await;
    let alice = client_for("alice", &store);

    // older unread message from dave, newer already-read one from erin
    store
        .add_message_at(&with_dave, "dave", "unread", Utc::now() - Duration::hours(2))
        .await;
    store
        .add_message_at(&with_erin, "erin", "read", Utc::now() - Duration::minutes(1))
        .await;
    alice.messages.mark_read(&with_erin).await.expect("mark read");

    let listing = alice.directory.list_conversations().await.expect("listing");
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].id, with_dave);
    assert_eq!(listing[1].id, with_erin);
}

#[tokio::test]
async fn enrichment_failure_drops_only_the_affected_conversation() {
    let store = Arc::new(InMemoryStore::new());
    store.add_profile("alice", "Alice", None).await;
    store.add_profile("dave", "Dave", None).await;
    store.add_profile("erin", "Erin", None).await;
    let poisoned = store.add_direct_conversation("alice", "dave").await;
    let healthy = store.add_direct_conversation("alice", "erin").await;
    store.fail_unread_count_for(&poisoned).await;
    let alice = client_for("alice", &store);

    let listing = alice.directory.list_conversations().await.expect("listing");
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].id, healthy);
}

#[tokio::test]
async fn lost_creation_race_adopts_the_existing_team_conversation() {
    let store = Arc::new(InMemoryStore::new());
    seed_team(&store).await;

    // another member's listing already created the conversation
    let bob = client_for("bob", &store);
    bob.directory.list_conversations().await.expect("listing");
    let existing = store
        .find_team_conversation("t1")
        .await
        .expect("query")
        .expect("conversation exists");

    // alice's existence check misses, her insert conflicts, and she must
    // re-fetch and continue with the winner's conversation
    store.hide_team_conversation_once("t1").await;
    let alice = client_for("alice", &store);
    let listing = alice.directory.list_conversations().await.expect("listing");

    assert_eq!(store.team_conversation_count("t1").await, 1);
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].id, existing.id);
}

#[tokio::test]
async fn provisioning_failures_never_fail_the_listing_and_stop_after_the_cap() {
    let store = Arc::new(InMemoryStore::new());
    seed_team(&store).await;
    store.fail_team_queries_for("t1").await;
    let alice = client_for("alice", &store);

    // three failing attempts, listing succeeds each time
    for _ in 0..3 {
        alice.directory.list_conversations().await.expect("listing");
    }
    // the conversation itself was created on the first attempt, before the
    // roster query failed
    assert_eq!(store.team_conversation_count("t1").await, 1);

    // dependency recovers, but the provisioner has hit its cap and stays off
    store.clear_team_failures().await;
    alice.directory.list_conversations().await.expect("listing");
    let team = store
        .find_team_conversation("t1")
        .await
        .expect("query")
        .expect("conversation exists");
    let participant_ids = store.participant_ids(&team.id).await.expect("participants");
    assert!(participant_ids.is_empty());
}

#[tokio::test]
async fn direct_conversation_is_named_after_the_other_participant() {
    let store = Arc::new(InMemoryStore::new());
    store.add_profile("alice", "Alice", None).await;
    store.add_profile("bob", "Bob", Some("http://cdn/bob.png")).await;
    let conversation = store.add_direct_conversation("alice", "bob").await;
    store
        .add_message_at(&conversation, "bob", "hey", Utc::now())
        .await;
    let alice = client_for("alice", &store);

    let listing = alice.directory.list_conversations().await.expect("listing");
    let direct = &listing[0];
    assert_eq!(direct.name.as_deref(), Some("Bob"));
    assert_eq!(direct.participants.len(), 1);
    assert_eq!(direct.participants[0].user_id, "bob");
    assert_eq!(
        direct.participants[0].avatar_url.as_deref(),
        Some("http://cdn/bob.png")
    );
    let last = direct.last_message.as_ref().expect("last message");
    assert_eq!(last.sender_name, "Bob");
    assert_eq!(last.content, "hey");
}
