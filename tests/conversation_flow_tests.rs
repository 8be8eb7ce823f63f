//! End-to-end conversation flow over in-memory transports
//!
//! Exercises the pieces together the way a chat backend uses them: inbox
//! views subscribe category-wide, open conversations subscribe on their
//! entity, and message events reach both.

use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use unichat::realtime::testing::{MockPeer, mock_pair};
use unichat::{
    ConnectionRegistry, Conversation, ConversationEvent, EntityScope, LivenessProbe,
    RealtimeConfig, UserId,
};

const WAIT: Duration = Duration::from_millis(500);

fn registry() -> Arc<ConnectionRegistry> {
    let config = RealtimeConfig::builder()
        .probe_timeout(Duration::from_millis(50))
        .unwrap()
        .close_timeout(Duration::from_millis(100))
        .unwrap()
        .build();
    Arc::new(ConnectionRegistry::new(config))
}

async fn subscribe(registry: &ConnectionRegistry, scope: EntityScope, user: i64) -> MockPeer {
    let (transport, mut peer) = mock_pair();
    registry
        .register("Conversation", scope, UserId::new(user), transport)
        .await
        .unwrap();
    assert_eq!(peer.next_frame(WAIT).await.as_deref(), Some("hello there"));
    peer
}

fn users(ids: &[i64]) -> HashSet<UserId> {
    ids.iter().copied().map(UserId::new).collect()
}

async fn next_envelope(peer: &mut MockPeer) -> Option<Value> {
    let frame = peer.next_frame(WAIT).await?;
    serde_json::from_str(&frame).ok()
}

#[tokio::test]
async fn test_message_reaches_open_conversation_and_inboxes() {
    let registry = registry();
    let mut alice_open = subscribe(&registry, EntityScope::Entity(42), 1).await;
    let mut alice_inbox = subscribe(&registry, EntityScope::None, 1).await;
    let mut bob_inbox = subscribe(&registry, EntityScope::None, 2).await;
    let mut carol_inbox = subscribe(&registry, EntityScope::None, 3).await;

    let participants = users(&[1, 2]);
    let message = json!({"conversationId": 42, "text": "hi"});
    let started = registry
        .context::<Conversation>(Some(UserId::new(2)))
        .send_to_entity_and_users(42, &participants, ConversationEvent::NewMessage, Some(&message));
    assert_eq!(started, 3);

    let expected = json!({"Event": "NewMessage", "Data": message});
    assert_eq!(next_envelope(&mut alice_open).await, Some(expected.clone()));
    assert_eq!(next_envelope(&mut alice_inbox).await, Some(expected.clone()));
    assert_eq!(next_envelope(&mut bob_inbox).await, Some(expected));
    assert!(carol_inbox.next_frame(Duration::from_millis(50)).await.is_none());
}

#[tokio::test]
async fn test_unsent_message_skips_sender() {
    let registry = registry();
    let mut alice = subscribe(&registry, EntityScope::Entity(8), 1).await;
    let mut bob = subscribe(&registry, EntityScope::Entity(8), 2).await;

    let started = registry
        .context::<Conversation>(Some(UserId::new(1)))
        .send_to_others(
            EntityScope::Entity(8),
            &users(&[1, 2]),
            ConversationEvent::MessageUnsent,
            Some(&json!({"messageId": 5})),
        );
    assert_eq!(started, 1);

    let envelope = next_envelope(&mut bob).await.unwrap();
    assert_eq!(envelope["Event"], "MessageUnsent");
    assert!(alice.next_frame(Duration::from_millis(50)).await.is_none());
}

#[tokio::test]
async fn test_dead_inbox_is_swept_then_logout_clears_the_rest() {
    let registry = registry();
    let mut alive = subscribe(&registry, EntityScope::Entity(3), 5).await;
    let mut dead = subscribe(&registry, EntityScope::None, 6).await;
    let other = subscribe(&registry, EntityScope::None, 5).await;
    alive.auto_reply();
    other.auto_reply();
    dead.hang_up();

    let report = LivenessProbe::new(Arc::clone(&registry)).sweep_once().await;
    assert_eq!(report.probed, 3);
    assert_eq!(report.alive, 2);
    assert_eq!(report.evicted, 1);
    assert!(dead.is_closed());
    assert_eq!(registry.connection_count(), 2);

    let closed = registry.remove_user_everywhere(UserId::new(5)).await;
    assert_eq!(closed, 2);
    assert_eq!(registry.connection_count(), 0);

    let stats = registry.stats();
    assert_eq!(stats.evicted_total, 1);
    assert_eq!(stats.removed_total, 2);
    assert_eq!(stats.categories, 0);

    let started = registry.context::<Conversation>(None).notify(
        EntityScope::Entity(3),
        &users(&[5]),
        ConversationEvent::ConversationClosed,
    );
    assert_eq!(started, 0);
    // Only the heartbeat was sent before logout.
    assert_eq!(alive.drain().len(), 1);
}
