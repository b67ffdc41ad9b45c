//! Gateway core: shared state, WebSocket handler, and message routing.
//!
//! Every connection starts with a `Hello` frame naming the caller's identity
//! and the channel the connection is for. Chat connections relay messages to
//! every chat connection of the room's participants; service connections
//! answer room and message calls.
//!
//! The gateway does not verify the identity in `Hello`: a connection is
//! whoever it claims to be. Overwriting a chat message's sender with the
//! connection's identity only stops a client from speaking as someone else
//! on a connection it opened under its own name. Authentication belongs in
//! front of the gateway, e.g. a proxy that checks credentials before the
//! upgrade.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use lendchat_proto::frame::{self, Channel, ClientFrame, ServerFrame, ServiceCall, ServiceReply};
use lendchat_proto::message::{Identity, MAX_MESSAGE_SIZE, Message};
use tokio::sync::{RwLock, mpsc};

use crate::rooms::RoomDirectory;
use crate::store::MessageLog;

/// Default maximum allowed message body size in bytes (64 KB).
const DEFAULT_MAX_PAYLOAD_SIZE: usize = MAX_MESSAGE_SIZE;

/// A connection that completed the handshake.
struct Registered {
    identity: Identity,
    channel: Channel,
    sender: mpsc::UnboundedSender<WsMessage>,
}

/// Shared gateway state: connection registry, rooms and message history.
pub struct GatewayState {
    /// Live connections keyed by connection id. An identity may hold several.
    connections: RwLock<HashMap<u64, Registered>>,
    next_connection_id: AtomicU64,
    /// Private rooms.
    pub rooms: RoomDirectory,
    /// Room message history.
    pub messages: MessageLog,
    /// Maximum allowed message body size in bytes.
    max_payload_size: usize,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayState {
    /// Creates a gateway state with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_PAYLOAD_SIZE, RoomDirectory::new(), MessageLog::new())
    }

    /// Creates a gateway state with a custom payload limit, room directory
    /// and message log.
    #[must_use]
    pub fn with_config(max_payload_size: usize, rooms: RoomDirectory, messages: MessageLog) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            rooms,
            messages,
            max_payload_size,
        }
    }

    async fn register(
        &self,
        identity: &Identity,
        channel: Channel,
        sender: mpsc::UnboundedSender<WsMessage>,
    ) -> u64 {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(
            id,
            Registered {
                identity: identity.clone(),
                channel,
                sender,
            },
        );
        id
    }

    async fn unregister(&self, connection_id: u64) {
        self.connections.write().await.remove(&connection_id);
    }

    /// Number of chat connections open for `identity`.
    pub async fn chat_connections(&self, identity: &Identity) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.channel == Channel::Chat && &c.identity == identity)
            .count()
    }

    /// Send a WebSocket Close frame to every connection.
    ///
    /// Each writer task forwards the close frame, which the client-side
    /// reader detects as a disconnect. Used for graceful shutdown and tests.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (id, conn) in conns.iter() {
            tracing::info!(connection_id = id, identity = %conn.identity, "sending close frame");
            let _ = conn.sender.send(WsMessage::Close(None));
        }
    }

    /// Deliver `message` to every chat connection of the room's participants.
    async fn fan_out(&self, participants: &[Identity], message: &Message) {
        let text = match frame::encode_server(&ServerFrame::Chat {
            message: message.clone(),
        }) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode chat frame");
                return;
            }
        };

        let conns = self.connections.read().await;
        let mut delivered = 0usize;
        for conn in conns
            .values()
            .filter(|c| c.channel == Channel::Chat && participants.contains(&c.identity))
        {
            if conn.sender.send(WsMessage::Text(text.clone().into())).is_ok() {
                delivered += 1;
            }
        }
        drop(conns);
        tracing::debug!(room_id = %message.room_id, delivered, "message relayed");
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Wait for a `Hello` frame.
/// 2. Register the connection and send `Welcome` back. Frames relayed to the
///    connection in the meantime are queued behind the `Welcome`.
/// 3. Enter the frame loop, relaying chat messages or answering calls.
/// 4. On disconnect, unregister the connection.
pub async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (identity, channel) = match wait_for_hello(&mut ws_receiver).await {
        Ok(hello) => hello,
        Err(Some(reason)) => {
            tracing::warn!(reason = %reason, "handshake rejected");
            let _ = send_frame(&mut ws_sender, &ServerFrame::Error { reason }).await;
            let _ = ws_sender.send(WsMessage::Close(None)).await;
            return;
        }
        Err(None) => {
            tracing::warn!("connection closed before handshake");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let connection_id = state.register(&identity, channel, tx.clone()).await;

    if let Err(e) = send_frame(
        &mut ws_sender,
        &ServerFrame::Welcome {
            identity: identity.clone(),
        },
    )
    .await
    {
        tracing::error!(identity = %identity, error = %e, "failed to send Welcome");
        state.unregister(connection_id).await;
        return;
    }
    tracing::info!(connection_id, identity = %identity, ?channel, "connection registered");

    // Writer task: forwards queued frames to the WebSocket.
    let writer_identity = identity.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(identity = %writer_identity, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Reader task: processes frames from the client.
    let reader_identity = identity.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                WsMessage::Text(text) => {
                    handle_text_frame(&reader_state, &reader_identity, channel, &tx, text.as_str())
                        .await;
                }
                WsMessage::Close(_) => {
                    tracing::info!(identity = %reader_identity, "received close frame");
                    break;
                }
                _ => {
                    // Binary, ping and pong frames carry no protocol data.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(connection_id).await;
    tracing::info!(connection_id, identity = %identity, "connection closed and unregistered");
}

/// Waits for the `Hello` frame.
///
/// The claimed identity is taken as is; only an empty identity is refused.
///
/// Returns `Err(Some(reason))` if the client sent something unacceptable
/// and `Err(None)` if the connection closed first.
async fn wait_for_hello(
    receiver: &mut (impl StreamExt<Item = Result<WsMessage, axum::Error>> + Unpin),
) -> Result<(Identity, Channel), Option<String>> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            WsMessage::Text(text) => {
                return match frame::decode_client(text.as_str()) {
                    Ok(ClientFrame::Hello { identity, .. }) if identity.is_empty() => {
                        Err(Some("identity must not be empty".into()))
                    }
                    Ok(ClientFrame::Hello { identity, channel }) => Ok((identity, channel)),
                    Ok(other) => {
                        tracing::warn!(frame = ?other, "expected Hello, got a different frame");
                        Err(Some("expected Hello".into()))
                    }
                    Err(e) => Err(Some(format!("malformed handshake: {e}"))),
                };
            }
            WsMessage::Close(_) => return Err(None),
            _ => {
                // Skip non-text frames (ping/pong) during the handshake.
            }
        }
    }
    Err(None)
}

/// Handles one text frame from a registered connection.
async fn handle_text_frame(
    state: &Arc<GatewayState>,
    identity: &Identity,
    channel: Channel,
    reply_to: &mpsc::UnboundedSender<WsMessage>,
    text: &str,
) {
    let frame = match frame::decode_client(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(identity = %identity, error = %e, "failed to decode frame");
            reply(reply_to, &ServerFrame::Error {
                reason: format!("malformed frame: {e}"),
            });
            return;
        }
    };

    match (channel, frame) {
        (Channel::Chat, ClientFrame::Chat { message }) => {
            if let Err(reason) = handle_chat(state, identity, message).await {
                tracing::warn!(identity = %identity, reason = %reason, "chat message rejected");
                reply(reply_to, &ServerFrame::Error { reason });
            }
        }
        (Channel::Service, ClientFrame::Call { request_id, call }) => {
            let outcome = handle_call(state, identity, call).await;
            reply(reply_to, &ServerFrame::Reply {
                request_id,
                reply: outcome,
            });
        }
        (_, ClientFrame::Hello { .. }) => {
            tracing::warn!(identity = %identity, "duplicate Hello ignored");
            reply(reply_to, &ServerFrame::Error {
                reason: "already connected".into(),
            });
        }
        (channel, _) => {
            tracing::warn!(identity = %identity, ?channel, "frame not allowed on this channel");
            reply(reply_to, &ServerFrame::Error {
                reason: format!("frame not allowed on {channel:?} channel"),
            });
        }
    }
}

/// Stores and relays a chat message from `identity`.
///
/// The sender identity is taken from the connection, never from the frame.
async fn handle_chat(
    state: &Arc<GatewayState>,
    identity: &Identity,
    mut message: Message,
) -> Result<(), String> {
    if message.body.len() > state.max_payload_size {
        return Err(format!(
            "message too large: {} bytes (max {})",
            message.body.len(),
            state.max_payload_size
        ));
    }
    message.user_id = identity.clone();
    message.validate().map_err(|e| e.to_string())?;

    let room = state
        .rooms
        .get(&message.room_id)
        .await
        .ok_or_else(|| format!("unknown room {}", message.room_id))?;
    if !room.includes(identity) {
        return Err(format!("not a participant of room {}", room.room_id));
    }

    state.messages.append(message.clone()).await;
    state.fan_out(&room.participants, &message).await;
    Ok(())
}

/// Answers a service call made by `identity`.
async fn handle_call(state: &Arc<GatewayState>, identity: &Identity, call: ServiceCall) -> ServiceReply {
    match call {
        ServiceCall::RoomsByPost { post_id } => ServiceReply::Rooms {
            rooms: state.rooms.by_post(&post_id, identity).await,
        },
        ServiceCall::CreatePrivateRoom { user_id, post_id } => {
            match state.rooms.create_private(identity, &user_id, &post_id).await {
                Ok(room_id) => ServiceReply::RoomCreated { room_id },
                Err(e) => ServiceReply::Rejected {
                    reason: e.to_string(),
                },
            }
        }
        ServiceCall::MessagesByRoom { room_id } => match readable_room(state, identity, &room_id).await {
            Ok(()) => ServiceReply::Messages {
                messages: state.messages.by_room(&room_id).await,
            },
            Err(reason) => ServiceReply::Rejected { reason },
        },
        ServiceCall::MessagesByRoomAndUser { room_id, user_id } => {
            match readable_room(state, identity, &room_id).await {
                Ok(()) => ServiceReply::Messages {
                    messages: state.messages.by_room_and_user(&room_id, &user_id).await,
                },
                Err(reason) => ServiceReply::Rejected { reason },
            }
        }
    }
}

/// Checks that `room_id` exists and `identity` takes part in it.
async fn readable_room(
    state: &Arc<GatewayState>,
    identity: &Identity,
    room_id: &lendchat_proto::message::RoomId,
) -> Result<(), String> {
    match state.rooms.get(room_id).await {
        Some(room) if room.includes(identity) => Ok(()),
        Some(_) => Err(format!("not a participant of room {room_id}")),
        None => Err(format!("unknown room {room_id}")),
    }
}

/// Queues a frame on a connection's writer.
fn reply(sender: &mpsc::UnboundedSender<WsMessage>, frame: &ServerFrame) {
    match frame::encode_server(frame) {
        Ok(text) => {
            let _ = sender.send(WsMessage::Text(text.into()));
        }
        Err(e) => tracing::error!(error = %e, "failed to encode frame"),
    }
}

/// Encodes and sends a frame directly on a WebSocket sender.
async fn send_frame(
    ws_sender: &mut (impl SinkExt<WsMessage, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), String> {
    let text = frame::encode_server(frame).map_err(|e| e.to_string())?;
    ws_sender
        .send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the gateway on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(GatewayState::new())).await
}

/// Starts the gateway with a pre-configured [`GatewayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<GatewayState>,
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
            tracing::error!(error = %e, "gateway server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<GatewayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
