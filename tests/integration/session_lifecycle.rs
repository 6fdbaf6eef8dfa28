//! Session lifecycle tests: opening, switching, and closing conversations.
//!
//! Switching correspondents must leave the old conversation's channel,
//! clear local state, and keep late deliveries for the old conversation out
//! of the new session's list. Repeated open/close cycles must not
//! accumulate subscriptions.

use std::time::Duration;

use shopchat::backend::memory::InMemoryBackend;
use shopchat::channel::loopback::LoopbackChannel;
use shopchat::session::{Correspondent, SessionEvent, SessionManager};
use shopchat_proto::message::{
    ChatMessage, ConversationId, MessageId, SenderRole, Timestamp,
};

use tokio::sync::mpsc;

fn setup() -> (
    SessionManager<InMemoryBackend, LoopbackChannel>,
    mpsc::Receiver<SessionEvent>,
    shopchat::channel::loopback::LoopbackPublisher,
) {
    let (channel, publisher) = LoopbackChannel::create(32);
    let (manager, events) =
        SessionManager::new(InMemoryBackend::new(), channel, SenderRole::Customer, 32);
    (manager, events, publisher)
}

fn correspondent(name: &str) -> Correspondent {
    Correspondent {
        display_name: name.to_string(),
        role: SenderRole::Partner,
    }
}

fn inbound(conversation_id: &ConversationId, body: &str) -> ChatMessage {
    ChatMessage {
        id: MessageId::server(),
        conversation_id: conversation_id.clone(),
        body: body.to_string(),
        sender_role: SenderRole::Partner,
        created_at: Timestamp::now(),
    }
}

#[tokio::test]
async fn switching_conversations_swaps_subscription() {
    let (manager, _events, publisher) = setup();
    let first = ConversationId::new();
    let second = ConversationId::new();

    manager
        .open(first.clone(), correspondent("Aurora Footwear"))
        .await
        .unwrap();
    assert!(publisher.is_joined(&first));

    manager
        .open(second.clone(), correspondent("Peak Runners"))
        .await
        .unwrap();

    assert!(!publisher.is_joined(&first));
    assert!(publisher.is_joined(&second));
    assert_eq!(publisher.joined_count(), 1);
    assert_eq!(
        manager.correspondent().map(|c| c.display_name),
        Some("Peak Runners".to_string())
    );
}

#[tokio::test]
async fn late_event_for_old_conversation_is_not_merged() {
    let (manager, _events, publisher) = setup();
    let first = ConversationId::new();
    let second = ConversationId::new();

    manager
        .open(first.clone(), correspondent("Aurora Footwear"))
        .await
        .unwrap();
    manager
        .open(second.clone(), correspondent("Peak Runners"))
        .await
        .unwrap();

    // A shared channel may still deliver an event for the old conversation.
    publisher.publish(inbound(&first, "late reply")).await;
    manager.pump_one().await.unwrap();

    assert!(manager.messages().is_empty());

    // Events for the new conversation merge normally.
    publisher.publish(inbound(&second, "fresh reply")).await;
    manager.pump_one().await.unwrap();

    let messages = manager.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "fresh reply");
}

#[tokio::test]
async fn repeated_open_close_cycles_leave_no_subscriptions() {
    let (manager, _events, publisher) = setup();

    for i in 0..10 {
        let conversation = ConversationId::new();
        manager
            .open(conversation, correspondent(&format!("Seller {i}")))
            .await
            .unwrap();
        manager.close().await;
    }

    assert_eq!(publisher.joined_count(), 0);
    assert!(manager.conversation_id().is_none());
}

#[tokio::test]
async fn close_then_reopen_starts_clean() {
    let (manager, _events, publisher) = setup();
    let first = ConversationId::new();

    manager
        .open(first.clone(), correspondent("Aurora Footwear"))
        .await
        .unwrap();
    manager.send("remember me?").await.unwrap();
    assert_eq!(manager.messages().len(), 1);

    manager.close().await;
    assert!(manager.messages().is_empty());

    let second = ConversationId::new();
    manager
        .open(second.clone(), correspondent("Peak Runners"))
        .await
        .unwrap();

    assert!(manager.messages().is_empty());
    assert!(publisher.is_joined(&second));
    assert!(!publisher.is_joined(&first));
}

#[tokio::test]
async fn open_emits_lifecycle_events() {
    let (manager, mut events, _publisher) = setup();
    let conversation = ConversationId::new();

    manager
        .open(conversation.clone(), correspondent("Aurora Footwear"))
        .await
        .unwrap();
    manager.close().await;

    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::ConversationOpened {
            conversation_id: conversation.clone()
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::ConversationClosed {
            conversation_id: conversation
        }
    );
}

#[tokio::test]
async fn events_queued_before_switch_are_guarded_after_it() {
    let (manager, _events, publisher) = setup();
    let first = ConversationId::new();

    manager
        .open(first.clone(), correspondent("Aurora Footwear"))
        .await
        .unwrap();

    // Queue an event for the first conversation, but only pump it after
    // switching — the guard, not the subscription, protects the new list.
    publisher.publish(inbound(&first, "queued before switch")).await;

    let second = ConversationId::new();
    manager
        .open(second, correspondent("Peak Runners"))
        .await
        .unwrap();
    manager.pump_one().await.unwrap();

    assert!(manager.messages().is_empty());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(manager.messages().is_empty());
}
