//! Relay server core: shared state, WebSocket handler, and submission
//! handling.
//!
//! The relay accepts WebSocket connections, performs the `Hello`/`Welcome`
//! handshake, and then serves three things per connection: conversation
//! subscriptions (`Join`/`Leave`), message submissions (validated, given a
//! server id and timestamp, answered directly with `Accepted`), and history
//! fetches. Every accepted message is additionally broadcast as an `Event`
//! to all subscribers of its conversation — the submitting connection
//! included, which is the echo the client's reconciliation collapses.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use shopchat_proto::codec;
use shopchat_proto::message::{
    ChatMessage, MessageId, SenderRole, Timestamp, validate_body,
};
use shopchat_proto::wire::{ClientFrame, ServerFrame};

use crate::history::HistoryStore;
use crate::subscriptions::{ConnId, SubscriptionRegistry};

/// Shared relay state: connection registry, subscriptions, and history.
pub struct RelayState {
    /// Maps connection ids to the sender half of their writer channel.
    connections: RwLock<HashMap<ConnId, mpsc::UnboundedSender<Message>>>,
    /// Per-conversation subscriber sets.
    pub subscriptions: SubscriptionRegistry,
    /// Bounded per-conversation message history.
    pub history: HistoryStore,
    /// Next connection id to assign.
    next_conn_id: AtomicU64,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with default history retention.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history(HistoryStore::new())
    }

    /// Creates relay state with a pre-configured history store.
    #[must_use]
    pub fn with_history(history: HistoryStore) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            subscriptions: SubscriptionRegistry::new(),
            history,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Registers a connection's writer channel, returning its id.
    pub async fn add_connection(&self, sender: mpsc::UnboundedSender<Message>) -> ConnId {
        let conn = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(conn, sender);
        conn
    }

    /// Removes a connection and all of its subscriptions.
    pub async fn remove_connection(&self, conn: ConnId) {
        self.connections.write().await.remove(&conn);
        self.subscriptions.remove_connection(conn).await;
    }

    /// Returns a clone of the writer channel for the given connection.
    async fn sender_for(&self, conn: ConnId) -> Option<mpsc::UnboundedSender<Message>> {
        self.connections.read().await.get(&conn).cloned()
    }

    /// Sends a WebSocket Close frame to all connected clients.
    ///
    /// Useful for graceful shutdown and disconnect tests.
    pub async fn close_all_connections(&self) {
        let connections = self.connections.read().await;
        for (conn, sender) in connections.iter() {
            tracing::info!(conn, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection.
///
/// Lifecycle:
/// 1. Wait for a `Hello` frame.
/// 2. Register the connection and send `Welcome`.
/// 3. Run reader/writer tasks until either side ends.
/// 4. Remove the connection and its subscriptions.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(role) = wait_for_hello(&mut ws_receiver).await else {
        tracing::warn!("connection closed before Hello");
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn = state.add_connection(tx).await;
    tracing::info!(conn, role = %role, "client connected");

    if let Err(e) = send_frame(&mut ws_sender, &ServerFrame::Welcome).await {
        tracing::error!(conn, error = %e, "failed to send Welcome");
        state.remove_connection(conn).await;
        return;
    }

    // Writer task: forwards queued frames to the WebSocket.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!("WebSocket write failed");
                break;
            }
        }
    });

    // Reader task: processes frames from this client.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_frame(conn, &data, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(conn, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.remove_connection(conn).await;
    tracing::info!(conn, "client disconnected");
}

/// Waits for the first frame on a new connection, expecting `Hello`.
async fn wait_for_hello(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<SenderRole> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => match codec::decode::<ClientFrame>(&data) {
                Ok(ClientFrame::Hello { role }) => return Some(role),
                Ok(other) => {
                    tracing::warn!(frame = ?other, "expected Hello, got different frame");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode handshake frame");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {
                // Skip non-binary frames during the handshake.
            }
        }
    }
    None
}

/// Handles one binary frame from a registered connection.
async fn handle_binary_frame(conn: ConnId, data: &[u8], state: &Arc<RelayState>) {
    let frame = match codec::decode::<ClientFrame>(data) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(conn, error = %e, "failed to decode frame");
            return;
        }
    };

    match frame {
        ClientFrame::Hello { role } => {
            tracing::warn!(conn, role = %role, "duplicate Hello ignored");
        }
        ClientFrame::Join { conversation_id } => {
            state.subscriptions.join(&conversation_id, conn).await;
            tracing::debug!(conn, conversation_id = %conversation_id, "joined conversation");
        }
        ClientFrame::Leave { conversation_id } => {
            state.subscriptions.leave(&conversation_id, conn).await;
            tracing::debug!(conn, conversation_id = %conversation_id, "left conversation");
        }
        ClientFrame::Submit {
            client_ref,
            conversation_id,
            body,
            sender_role,
        } => {
            handle_submit(conn, client_ref, conversation_id, &body, sender_role, state).await;
        }
        ClientFrame::Fetch {
            client_ref,
            conversation_id,
            limit,
        } => {
            let messages = state
                .history
                .recent(&conversation_id, limit as usize)
                .await;
            let response = ServerFrame::History {
                client_ref,
                conversation_id,
                messages,
            };
            send_to_conn(state, conn, &response).await;
        }
    }
}

/// Validates a submission, stores and confirms it, then broadcasts the echo.
async fn handle_submit(
    conn: ConnId,
    client_ref: u64,
    conversation_id: shopchat_proto::message::ConversationId,
    body: &str,
    sender_role: SenderRole,
    state: &Arc<RelayState>,
) {
    let body = body.trim();
    if let Err(e) = validate_body(body) {
        tracing::debug!(conn, client_ref, error = %e, "submission rejected");
        let rejection = ServerFrame::Rejected {
            client_ref,
            reason: e.to_string(),
        };
        send_to_conn(state, conn, &rejection).await;
        return;
    }

    let message = ChatMessage {
        id: MessageId::server(),
        conversation_id: conversation_id.clone(),
        body: body.to_string(),
        sender_role,
        created_at: Timestamp::now(),
    };

    let history_len = state.history.append(message.clone()).await;
    tracing::debug!(
        conn,
        client_ref,
        message_id = %message.id,
        conversation_id = %conversation_id,
        history_len,
        "message accepted"
    );

    // Direct response first: on the submitter's own connection the
    // Accepted frame precedes the broadcast echo.
    let accepted = ServerFrame::Accepted {
        client_ref,
        message: message.clone(),
    };
    send_to_conn(state, conn, &accepted).await;

    broadcast_event(state, &message).await;
}

/// Broadcasts a message event to every subscriber of its conversation,
/// the submitter's connection included.
async fn broadcast_event(state: &Arc<RelayState>, message: &ChatMessage) {
    let event = ServerFrame::Event {
        message: message.clone(),
    };
    let Ok(bytes) = codec::encode(&event) else {
        tracing::error!(message_id = %message.id, "failed to encode event frame");
        return;
    };

    let subscribers = state.subscriptions.members(&message.conversation_id).await;
    for conn in subscribers {
        if let Some(sender) = state.sender_for(conn).await {
            if sender.send(Message::Binary(bytes.clone().into())).is_err() {
                tracing::warn!(conn, "event delivery failed, dropping connection");
                state.remove_connection(conn).await;
            }
        }
    }
}

/// Encodes a frame and queues it on a connection's writer channel.
async fn send_to_conn(state: &Arc<RelayState>, conn: ConnId, frame: &ServerFrame) {
    if let Some(sender) = state.sender_for(conn).await
        && let Ok(bytes) = codec::encode(frame)
    {
        let _ = sender.send(Message::Binary(bytes.into()));
    }
}

/// Encodes and sends a frame directly on a WebSocket sender.
async fn send_frame(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), String> {
    let bytes = codec::encode(frame).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the relay server on the given address.
///
/// Returns the bound address and a join handle. This is the entry point
/// used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
