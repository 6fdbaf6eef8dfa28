//! End-to-end tests against a real relay server.
//!
//! Two sessions — a customer and a partner — connect over WebSocket to an
//! in-process relay. The submitting session receives the same authoritative
//! message twice (direct `Accepted` response and broadcast `Event` echo);
//! the reconciliation must collapse the pair to a single entry while the
//! other session sees the message exactly once.

use std::sync::Arc;
use std::time::Duration;

use shopchat::relay_client::RelayClient;
use shopchat::session::{Correspondent, SessionManager};
use shopchat_proto::message::{ConversationId, SenderRole};

type RelaySession = SessionManager<Arc<RelayClient>, Arc<RelayClient>>;

/// Start an in-process relay and return its ws:// URL.
async fn start_relay() -> (String, tokio::task::JoinHandle<()>) {
    let (addr, handle) = shopchat_relay::relay::start_server("127.0.0.1:0")
        .await
        .unwrap();
    (format!("ws://{addr}/ws"), handle)
}

/// Connect a session for `role`, open `conversation_id`, and start pumping
/// realtime events.
async fn open_session(
    url: &str,
    role: SenderRole,
    conversation_id: &ConversationId,
    correspondent_name: &str,
) -> (Arc<RelaySession>, tokio::task::JoinHandle<()>) {
    let client = Arc::new(RelayClient::connect(url, role).await.unwrap());
    let (manager, _events) =
        SessionManager::new(Arc::clone(&client), client, role, 64);
    let manager = Arc::new(manager);
    manager
        .open(
            conversation_id.clone(),
            Correspondent {
                display_name: correspondent_name.to_string(),
                role: SenderRole::Partner,
            },
        )
        .await
        .unwrap();
    let pump = manager.spawn_realtime_task();
    (manager, pump)
}

/// Poll until `predicate` holds or the deadline passes.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(predicate(), "condition not reached before deadline");
}

#[tokio::test]
async fn sender_sees_exactly_one_entry_despite_echo() {
    let (url, _relay) = start_relay().await;
    let conversation = ConversationId::new();

    let (customer, _pump) =
        open_session(&url, SenderRole::Customer, &conversation, "Aurora Footwear").await;

    customer.send("are these true to size?").await.unwrap();

    // The broadcast echo arrives asynchronously; give it time to be merged,
    // then assert it did not duplicate the entry.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let messages = customer.messages();
    assert_eq!(messages.len(), 1);
    assert!(!messages[0].is_provisional());
    assert_eq!(messages[0].body, "are these true to size?");
}

#[tokio::test]
async fn both_sides_converge_on_the_same_message() {
    let (url, _relay) = start_relay().await;
    let conversation = ConversationId::new();

    let (customer, _customer_pump) =
        open_session(&url, SenderRole::Customer, &conversation, "Aurora Footwear").await;
    let (partner, _partner_pump) =
        open_session(&url, SenderRole::Partner, &conversation, "Jo Shopper").await;

    // Give the Join frames a moment to register on the relay side.
    tokio::time::sleep(Duration::from_millis(50)).await;

    customer.send("do you restock on fridays?").await.unwrap();

    wait_until(|| partner.messages().len() == 1).await;

    let customer_view = customer.messages();
    let partner_view = partner.messages();
    assert_eq!(customer_view.len(), 1);
    assert_eq!(customer_view[0].id, partner_view[0].id);
    assert_eq!(partner_view[0].body, "do you restock on fridays?");
    assert_eq!(partner_view[0].sender_role, SenderRole::Customer);
}

#[tokio::test]
async fn conversation_stays_duplicate_free_under_traffic() {
    let (url, _relay) = start_relay().await;
    let conversation = ConversationId::new();

    let (customer, _customer_pump) =
        open_session(&url, SenderRole::Customer, &conversation, "Aurora Footwear").await;
    let (partner, _partner_pump) =
        open_session(&url, SenderRole::Partner, &conversation, "Jo Shopper").await;

    // Give the Join frames a moment to register on the relay side.
    tokio::time::sleep(Duration::from_millis(50)).await;

    for i in 0..5 {
        customer.send(&format!("question {i}")).await.unwrap();
        partner.send(&format!("answer {i}")).await.unwrap();
    }

    wait_until(|| customer.messages().len() == 10 && partner.messages().len() == 10).await;

    for manager in [&customer, &partner] {
        let messages = manager.messages();
        assert_eq!(messages.len(), 10);
        assert!(messages.iter().all(|m| !m.is_provisional()));
        // Every entry distinct.
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a.id, b.id, "duplicate entry survived reconciliation");
            }
        }
    }
}

#[tokio::test]
async fn own_sends_keep_their_positions() {
    let (url, _relay) = start_relay().await;
    let conversation = ConversationId::new();

    let (customer, _pump) =
        open_session(&url, SenderRole::Customer, &conversation, "Aurora Footwear").await;

    for i in 0..5 {
        customer.send(&format!("message {i}")).await.unwrap();
    }

    // Let the echoes drain.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let messages = customer.messages();
    assert_eq!(messages.len(), 5);
    for (i, message) in messages.iter().enumerate() {
        assert_eq!(message.body, format!("message {i}"));
    }
}

#[tokio::test]
async fn oversized_body_never_reaches_the_relay() {
    let (url, _relay) = start_relay().await;
    let conversation = ConversationId::new();

    let (customer, _pump) =
        open_session(&url, SenderRole::Customer, &conversation, "Aurora Footwear").await;

    let huge = "x".repeat(shopchat_proto::message::MAX_BODY_SIZE + 1);
    let result = customer.send(&huge).await;
    assert!(matches!(
        result,
        Err(shopchat::session::SendError::Validation(_))
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(customer.messages().is_empty());
}
