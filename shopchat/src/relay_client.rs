//! WebSocket relay client.
//!
//! Implements both collaborator traits over a single connection to the
//! relay: [`MessageBackend`] for submissions and history fetches (correlated
//! to their direct responses by `client_ref`), and [`RealtimeChannel`] for
//! conversation subscriptions and pushed message events.
//!
//! Created via [`RelayClient::connect`], which establishes the WebSocket
//! connection, performs the `Hello`/`Welcome` handshake, and spawns a
//! background reader task that dispatches incoming frames.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use shopchat_proto::codec;
use shopchat_proto::message::{ChatMessage, ConversationId, SenderRole};
use shopchat_proto::wire::{ClientFrame, ServerFrame};

use crate::backend::{BackendError, MessageBackend};
use crate::channel::{ChannelError, RealtimeChannel};
use crate::config::ClientConfig;

/// Type alias for the write half of the relay WebSocket connection.
type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of the relay WebSocket connection.
type WsStream =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Errors that can occur while connecting to the relay.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The relay URL is malformed or uses an unsupported scheme.
    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),

    /// Connecting or waiting for the handshake acknowledgment timed out.
    #[error("relay connect timed out")]
    Timeout,

    /// The WebSocket or protocol handshake failed.
    #[error("relay handshake failed: {0}")]
    Handshake(String),

    /// The relay closed the connection during the handshake.
    #[error("connection closed during handshake")]
    Closed,
}

/// In-flight request/response correlation state shared with the reader task.
#[derive(Default)]
struct PendingReplies {
    /// Submissions awaiting an `Accepted`/`Rejected` frame.
    submits: Mutex<HashMap<u64, oneshot::Sender<Result<ChatMessage, BackendError>>>>,
    /// Fetches awaiting a `History` frame.
    fetches: Mutex<HashMap<u64, oneshot::Sender<Vec<ChatMessage>>>>,
}

impl PendingReplies {
    /// Drops every pending reply sender, failing the waiting requests.
    async fn fail_all(&self) {
        self.submits.lock().await.clear();
        self.fetches.lock().await.clear();
    }
}

/// WebSocket connection to the relay implementing both collaborator traits.
pub struct RelayClient {
    /// Write half of the WebSocket connection.
    ws_sink: Mutex<WsSink>,
    /// Pushed message events from the background reader task.
    events: Mutex<mpsc::Receiver<ChatMessage>>,
    /// Correlation state for in-flight requests.
    pending: Arc<PendingReplies>,
    /// Next `client_ref` value.
    next_ref: AtomicU64,
    /// Whether the relay connection is active.
    connected: Arc<AtomicBool>,
    /// Timeout for direct responses to submissions and fetches.
    reply_timeout: Duration,
    /// Handle to the background reader task (kept for the client's lifetime).
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl RelayClient {
    /// Connect to a relay with default timeouts.
    ///
    /// # Errors
    ///
    /// See [`connect_with`](Self::connect_with).
    pub async fn connect(relay_url: &str, role: SenderRole) -> Result<Self, ConnectError> {
        Self::connect_with(relay_url, role, &ClientConfig::default()).await
    }

    /// Connect to the relay named by the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::InvalidUrl`] if the config has no relay URL,
    /// otherwise see [`connect_with`](Self::connect_with).
    pub async fn from_config(config: &ClientConfig) -> Result<Self, ConnectError> {
        let Some(url) = config.relay_url.clone() else {
            return Err(ConnectError::InvalidUrl(
                "no relay URL configured".to_string(),
            ));
        };
        Self::connect_with(&url, config.sender_role, config).await
    }

    /// Connect to a relay server and perform the protocol handshake.
    ///
    /// Steps:
    /// 1. Validate the URL (ws/wss only).
    /// 2. Establish the WebSocket connection (connect timeout).
    /// 3. Send `Hello` with this client's role.
    /// 4. Wait for `Welcome` (welcome timeout).
    /// 5. Spawn the background reader task.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if any step fails or times out.
    pub async fn connect_with(
        relay_url: &str,
        role: SenderRole,
        config: &ClientConfig,
    ) -> Result<Self, ConnectError> {
        let parsed = Url::parse(relay_url).map_err(|e| ConnectError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ConnectError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        let (ws_stream, _response) =
            tokio::time::timeout(config.connect_timeout, connect_async(relay_url))
                .await
                .map_err(|_| {
                    tracing::warn!(url = relay_url, "relay WebSocket connect timed out");
                    ConnectError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = relay_url, error = %e, "relay WebSocket connect failed");
                    ConnectError::Handshake(e.to_string())
                })?;

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let hello = codec::encode(&ClientFrame::Hello { role })
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;
        ws_sink
            .send(Message::Binary(hello.into()))
            .await
            .map_err(|e| ConnectError::Handshake(format!("failed to send Hello: {e}")))?;

        wait_for_welcome(&mut ws_stream, config.welcome_timeout).await?;
        tracing::info!(url = relay_url, role = %role, "connected to relay");

        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let pending = Arc::new(PendingReplies::default());
        let connected = Arc::new(AtomicBool::new(true));
        let reader_handle = tokio::spawn(reader_loop(
            ws_stream,
            event_tx,
            Arc::clone(&pending),
            Arc::clone(&connected),
        ));

        Ok(Self {
            ws_sink: Mutex::new(ws_sink),
            events: Mutex::new(event_rx),
            pending,
            next_ref: AtomicU64::new(1),
            connected,
            reply_timeout: config.submit_timeout,
            _reader_handle: reader_handle,
        })
    }

    /// Whether the relay connection is still active.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Encodes and sends one frame on the WebSocket.
    async fn send_frame(&self, frame: &ClientFrame) -> Result<(), BackendError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(BackendError::ConnectionClosed);
        }
        let bytes = codec::encode(frame)
            .map_err(|e| BackendError::Io(std::io::Error::other(e.to_string())))?;
        let mut sink = self.ws_sink.lock().await;
        sink.send(Message::Binary(bytes.into())).await.map_err(|e| {
            tracing::warn!(error = %e, "relay send failed");
            self.connected.store(false, Ordering::Relaxed);
            BackendError::ConnectionClosed
        })
    }
}

impl MessageBackend for RelayClient {
    /// Submit a message and wait for the relay's direct response.
    async fn submit(
        &self,
        conversation_id: &ConversationId,
        body: &str,
        sender_role: SenderRole,
    ) -> Result<ChatMessage, BackendError> {
        let client_ref = self.next_ref.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.submits.lock().await.insert(client_ref, tx);

        let frame = ClientFrame::Submit {
            client_ref,
            conversation_id: conversation_id.clone(),
            body: body.to_string(),
            sender_role,
        };
        if let Err(e) = self.send_frame(&frame).await {
            self.pending.submits.lock().await.remove(&client_ref);
            return Err(e);
        }

        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(BackendError::ConnectionClosed),
            Err(_) => {
                self.pending.submits.lock().await.remove(&client_ref);
                Err(BackendError::Timeout)
            }
        }
    }

    /// Fetch recent conversation history through the relay.
    async fn fetch_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError> {
        let client_ref = self.next_ref.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.fetches.lock().await.insert(client_ref, tx);

        let frame = ClientFrame::Fetch {
            client_ref,
            conversation_id: conversation_id.clone(),
            limit: u32::try_from(limit).unwrap_or(u32::MAX),
        };
        if let Err(e) = self.send_frame(&frame).await {
            self.pending.fetches.lock().await.remove(&client_ref);
            return Err(e);
        }

        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(messages)) => Ok(messages),
            Ok(Err(_)) => Err(BackendError::ConnectionClosed),
            Err(_) => {
                self.pending.fetches.lock().await.remove(&client_ref);
                Err(BackendError::Timeout)
            }
        }
    }
}

impl RealtimeChannel for RelayClient {
    async fn join(&self, conversation_id: &ConversationId) -> Result<(), ChannelError> {
        self.send_frame(&ClientFrame::Join {
            conversation_id: conversation_id.clone(),
        })
        .await
        .map_err(into_channel_error)
    }

    async fn leave(&self, conversation_id: &ConversationId) -> Result<(), ChannelError> {
        self.send_frame(&ClientFrame::Leave {
            conversation_id: conversation_id.clone(),
        })
        .await
        .map_err(into_channel_error)
    }

    async fn recv(&self) -> Result<ChatMessage, ChannelError> {
        let mut events = self.events.lock().await;
        events.recv().await.ok_or(ChannelError::Closed)
    }
}

/// Maps a frame-send failure to the channel error space.
fn into_channel_error(e: BackendError) -> ChannelError {
    match e {
        BackendError::ConnectionClosed => ChannelError::Closed,
        BackendError::Timeout => ChannelError::Timeout,
        BackendError::Io(io) => ChannelError::Io(io),
        BackendError::Rejected(reason) => ChannelError::Io(std::io::Error::other(reason)),
    }
}

/// Waits for the relay's `Welcome` frame after `Hello` was sent.
async fn wait_for_welcome(
    ws_stream: &mut WsStream,
    timeout: Duration,
) -> Result<(), ConnectError> {
    let reply = tokio::time::timeout(timeout, ws_stream.next())
        .await
        .map_err(|_| {
            tracing::warn!("relay handshake acknowledgment timed out");
            ConnectError::Timeout
        })?;

    match reply {
        Some(Ok(Message::Binary(data))) => match codec::decode::<ServerFrame>(&data) {
            Ok(ServerFrame::Welcome) => Ok(()),
            Ok(ServerFrame::Error { reason }) => {
                tracing::warn!(reason = %reason, "relay rejected the handshake");
                Err(ConnectError::Handshake(reason))
            }
            Ok(other) => Err(ConnectError::Handshake(format!(
                "unexpected frame during handshake: {other:?}"
            ))),
            Err(e) => Err(ConnectError::Handshake(format!(
                "malformed handshake response: {e}"
            ))),
        },
        Some(Ok(Message::Close(_))) | None => Err(ConnectError::Closed),
        Some(Ok(_)) => Err(ConnectError::Handshake(
            "unexpected non-binary frame during handshake".to_string(),
        )),
        Some(Err(e)) => Err(ConnectError::Handshake(e.to_string())),
    }
}

/// Background task that reads relay frames and dispatches them.
///
/// Direct responses resolve their waiting request through the pending maps;
/// message events flow into the event channel consumed by
/// [`RealtimeChannel::recv`]. Malformed frames are logged and skipped — the
/// task does not disconnect on bad data. When the connection ends, every
/// pending request is failed and the connected flag cleared.
async fn reader_loop(
    mut ws_stream: WsStream,
    event_tx: mpsc::Sender<ChatMessage>,
    pending: Arc<PendingReplies>,
    connected: Arc<AtomicBool>,
) {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Binary(data)) => match codec::decode::<ServerFrame>(&data) {
                Ok(ServerFrame::Accepted {
                    client_ref,
                    message,
                }) => {
                    if let Some(tx) = pending.submits.lock().await.remove(&client_ref) {
                        let _ = tx.send(Ok(message));
                    } else {
                        tracing::debug!(client_ref, "unmatched Accepted frame");
                    }
                }
                Ok(ServerFrame::Rejected { client_ref, reason }) => {
                    if let Some(tx) = pending.submits.lock().await.remove(&client_ref) {
                        let _ = tx.send(Err(BackendError::Rejected(reason)));
                    } else {
                        tracing::debug!(client_ref, "unmatched Rejected frame");
                    }
                }
                Ok(ServerFrame::Event { message }) => {
                    if event_tx.send(message).await.is_err() {
                        // Receiver dropped — the client was dropped, exit.
                        break;
                    }
                }
                Ok(ServerFrame::History {
                    client_ref,
                    messages,
                    ..
                }) => {
                    if let Some(tx) = pending.fetches.lock().await.remove(&client_ref) {
                        let _ = tx.send(messages);
                    } else {
                        tracing::debug!(client_ref, "unmatched History frame");
                    }
                }
                Ok(ServerFrame::Welcome) => {
                    tracing::debug!("unexpected Welcome after handshake");
                }
                Ok(ServerFrame::Error { reason }) => {
                    tracing::warn!(reason = %reason, "relay server error");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed relay frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("relay WebSocket closed by server");
                break;
            }
            Ok(
                Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_),
            ) => {
                // Ignore control and text frames.
            }
            Err(e) => {
                tracing::warn!(error = %e, "relay WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    pending.fail_all().await;
    tracing::info!("relay reader task exiting");
}
