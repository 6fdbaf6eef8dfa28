//! Integration tests for the optimistic send pipeline.
//!
//! Covers the end-to-end postconditions of a send against an in-process
//! backend and channel:
//!
//! 1. The provisional entry is visible immediately, before the submission
//!    resolves, and carries a local identifier.
//! 2. Whichever confirmation path wins the race — direct response or
//!    realtime echo — exactly one entry remains, authoritative, at the
//!    provisional entry's original position.
//! 3. A failed submission removes the provisional entry and surfaces an
//!    observable failure event; unrelated concurrent messages survive.
//! 4. Rapid sends with identical text reconcile independently.

use std::sync::Arc;
use std::time::Duration;

use shopchat::backend::memory::InMemoryBackend;
use shopchat::channel::loopback::LoopbackChannel;
use shopchat::session::{Correspondent, SendError, SessionEvent, SessionManager};
use shopchat_proto::message::{ChatMessage, ConversationId, MessageId, SenderRole, Timestamp};

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Manager = SessionManager<InMemoryBackend, LoopbackChannel>;

/// Create a manager with an open conversation, echo wired from the backend
/// into the loopback channel.
async fn open_session() -> (
    Arc<Manager>,
    mpsc::Receiver<SessionEvent>,
    shopchat::channel::loopback::LoopbackPublisher,
    ConversationId,
) {
    let (channel, publisher) = LoopbackChannel::create(64);
    let backend = InMemoryBackend::new();
    backend.set_echo(publisher.clone());

    let (manager, mut events) =
        SessionManager::new(backend, channel, SenderRole::Customer, 64);
    let conversation_id = ConversationId::new();
    manager
        .open(
            conversation_id.clone(),
            Correspondent {
                display_name: "Aurora Footwear".to_string(),
                role: SenderRole::Partner,
            },
        )
        .await
        .unwrap();
    let _ = events.try_recv(); // ConversationOpened

    (Arc::new(manager), events, publisher, conversation_id)
}

/// Poll until `predicate` holds or the deadline passes.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(predicate(), "condition not reached before deadline");
}

fn partner_message(conversation_id: &ConversationId, body: &str) -> ChatMessage {
    ChatMessage {
        id: MessageId::server(),
        conversation_id: conversation_id.clone(),
        body: body.to_string(),
        sender_role: SenderRole::Partner,
        created_at: Timestamp::now(),
    }
}

// ===========================================================================
// Postcondition 1+2: immediate visibility, single entry after confirmation
// ===========================================================================

/// Send "Hello": one provisional entry immediately, then exactly one
/// authoritative entry once the submission resolves.
#[tokio::test]
async fn send_shows_provisional_then_reconciles() {
    let (manager, _events, _publisher, _conversation) = open_session().await;
    manager.backend().hold();

    let sender = Arc::clone(&manager);
    let send_task = tokio::spawn(async move { sender.send("Hello").await });

    wait_until(|| manager.messages().len() == 1).await;
    {
        let messages = manager.messages();
        assert!(messages[0].is_provisional());
        assert_eq!(messages[0].body, "Hello");
    }

    manager.backend().release();
    let local_id = send_task.await.unwrap().unwrap();

    let messages = manager.messages();
    assert_eq!(messages.len(), 1);
    assert!(!messages[0].is_provisional());
    assert_ne!(messages[0].id, local_id);
    assert_eq!(messages[0].body, "Hello");
}

/// Direct response arrives first (no realtime pump running): one entry.
#[tokio::test]
async fn direct_response_first_yields_one_entry() {
    let (manager, _events, _publisher, _conversation) = open_session().await;

    manager.send("Hi").await.unwrap();

    // The echo is still queued on the channel; merging it afterwards must
    // not create a second entry.
    manager.pump_one().await.unwrap();

    let messages = manager.messages();
    assert_eq!(messages.len(), 1);
    assert!(!messages[0].is_provisional());
}

/// Realtime echo arrives first; the direct response is idempotent.
#[tokio::test]
async fn echo_first_yields_one_entry() {
    let (manager, _events, _publisher, _conversation) = open_session().await;
    manager.backend().hold();

    let sender = Arc::clone(&manager);
    let send_task = tokio::spawn(async move { sender.send("Hi").await });

    // The echo was published before the gate; merge it while the direct
    // response is still held.
    manager.pump_one().await.unwrap();
    let reconciled_id = {
        let messages = manager.messages();
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].is_provisional());
        messages[0].id.clone()
    };

    manager.backend().release();
    send_task.await.unwrap().unwrap();

    let messages = manager.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, reconciled_id);
}

/// Reconciliation replaces in place: an inbound message arriving during the
/// send lands after the provisional entry and stays there.
#[tokio::test]
async fn reconciliation_preserves_position() {
    let (manager, _events, publisher, conversation) = open_session().await;
    manager.backend().hold();

    let sender = Arc::clone(&manager);
    let send_task = tokio::spawn(async move { sender.send("mine").await });
    wait_until(|| manager.messages().len() == 1).await;

    // A partner reply lands while the send is in flight.
    publisher
        .publish(partner_message(&conversation, "theirs"))
        .await;
    manager.pump_one().await.unwrap(); // echo of "mine" (published first)
    manager.pump_one().await.unwrap(); // partner reply

    manager.backend().release();
    send_task.await.unwrap().unwrap();

    let messages = manager.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].body, "mine");
    assert_eq!(messages[1].body, "theirs");
    assert!(messages.iter().all(|m| !m.is_provisional()));
}

// ===========================================================================
// Postcondition 3: failure cleanup
// ===========================================================================

/// A failed submission removes the provisional entry and emits SendFailed.
#[tokio::test]
async fn failed_send_cleans_up_and_surfaces_error() {
    let (manager, mut events, _publisher, _conversation) = open_session().await;
    manager.backend().set_failing(true);

    let result = manager.send("Test").await;

    assert!(matches!(result, Err(SendError::Backend(_))));
    assert!(manager.messages().is_empty());

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::SendFailed { reason, .. } = event {
            assert!(!reason.is_empty());
            saw_failure = true;
        }
    }
    assert!(saw_failure, "SendFailed event not emitted");
}

/// Failure cleanup removes only the failed entry; a concurrent inbound
/// message is untouched.
#[tokio::test]
async fn failure_cleanup_spares_concurrent_inbound() {
    let (manager, _events, publisher, conversation) = open_session().await;

    publisher
        .publish(partner_message(&conversation, "welcome to the store"))
        .await;
    manager.pump_one().await.unwrap();

    manager.backend().set_failing(true);
    let _ = manager.send("will fail").await;

    let messages = manager.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "welcome to the store");
}

// ===========================================================================
// Postcondition 4: rapid identical sends
// ===========================================================================

/// Two rapid sends of "Hi" carry distinct local ids, and each reconciles
/// against its own confirmation even when the echoes win the race.
#[tokio::test]
async fn rapid_identical_sends_reconcile_independently() {
    let (manager, _events, _publisher, _conversation) = open_session().await;
    manager.backend().hold();

    let first_sender = Arc::clone(&manager);
    let first_task = tokio::spawn(async move { first_sender.send("Hi").await });
    wait_until(|| manager.messages().len() == 1).await;

    let second_sender = Arc::clone(&manager);
    let second_task = tokio::spawn(async move { second_sender.send("Hi").await });
    wait_until(|| manager.messages().len() == 2).await;

    {
        let messages = manager.messages();
        assert!(messages[0].is_provisional());
        assert!(messages[1].is_provisional());
        assert_ne!(messages[0].id, messages[1].id);
    }

    // Both echoes arrived before either direct response; merge them.
    manager.pump_one().await.unwrap();
    manager.pump_one().await.unwrap();

    manager.backend().release();
    let first_id = first_task.await.unwrap().unwrap();
    let second_id = second_task.await.unwrap().unwrap();
    assert_ne!(first_id, second_id);

    let messages = manager.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| !m.is_provisional()));
    assert_ne!(messages[0].id, messages[1].id);
}
