//! Services backed by a gateway service connection.
//!
//! [`GatewayServices`] opens a WebSocket connection on the `service`
//! channel and issues [`ServiceCall`]s as request frames. Replies are matched
//! to their callers by `request_id`; a background task reads the connection
//! and completes pending calls. Calls have no timeout: a call that is never
//! answered stays pending until the connection closes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use lendchat_proto::frame::{self, Channel, ClientFrame, ServerFrame, ServiceCall, ServiceReply};
use lendchat_proto::message::{Identity, Message, PostId, RoomId};
use lendchat_proto::room::Room;

use super::{IdentityService, MessageService, RoomService, ServiceError};
use crate::transport::TransportError;
use crate::transport::websocket::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, WsReader, WsSender, handshake,
};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<ServiceReply>>>>;

/// Room, message and identity services provided by a gateway.
pub struct GatewayServices {
    identity: Identity,
    ws_sender: Arc<tokio::sync::Mutex<WsSender>>,
    pending: Pending,
    next_request_id: AtomicU64,
    connected: Arc<AtomicBool>,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl GatewayServices {
    /// Connect to the gateway at `url` as `identity` with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the connection or handshake fails.
    pub async fn connect(url: &str, identity: &Identity) -> Result<Self, TransportError> {
        Self::connect_with_timeouts(
            url,
            identity,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_HANDSHAKE_TIMEOUT,
        )
        .await
    }

    /// Connect to the gateway at `url` as `identity`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the connection or handshake fails.
    pub async fn connect_with_timeouts(
        url: &str,
        identity: &Identity,
        connect_timeout: Duration,
        handshake_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let (ws_sender, ws_reader) = handshake(
            url,
            identity,
            Channel::Service,
            connect_timeout,
            handshake_timeout,
        )
        .await?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(reply_loop(
            ws_reader,
            Arc::clone(&pending),
            Arc::clone(&connected),
        ));

        Ok(Self {
            identity: identity.clone(),
            ws_sender: Arc::new(tokio::sync::Mutex::new(ws_sender)),
            pending,
            next_request_id: AtomicU64::new(1),
            connected,
            _reader_handle: reader_handle,
        })
    }

    /// Whether the service connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Issue `call` and wait for its reply.
    async fn call(&self, call: ServiceCall) -> Result<ServiceReply, ServiceError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let text = frame::encode_client(&ClientFrame::Call { request_id, call })?;

        let (_entry, rx) = PendingEntry::register(&self.pending, request_id);
        // Checked after registering: once the reply task has cleared the
        // map it has also marked the connection down.
        if !self.is_connected() {
            return Err(ServiceError::Disconnected);
        }

        let sent = {
            let mut sender = self.ws_sender.lock().await;
            sender.send(WsMessage::Text(text.into())).await
        };
        if let Err(e) = sent {
            tracing::warn!(request_id, err = %e, "service call send failed");
            return Err(ServiceError::Transport(TransportError::ConnectionClosed));
        }
        tracing::debug!(request_id, "service call sent");

        match rx.await {
            Ok(ServiceReply::Rejected { reason }) => Err(ServiceError::Rejected(reason)),
            Ok(reply) => Ok(reply),
            Err(_) => Err(ServiceError::Disconnected),
        }
    }
}

/// A caller's slot in the pending map, removed when the call finishes or
/// its future is dropped.
struct PendingEntry<'a> {
    pending: &'a Pending,
    request_id: u64,
}

impl<'a> PendingEntry<'a> {
    fn register(pending: &'a Pending, request_id: u64) -> (Self, oneshot::Receiver<ServiceReply>) {
        let (tx, rx) = oneshot::channel();
        pending.lock().insert(request_id, tx);
        (
            Self {
                pending,
                request_id,
            },
            rx,
        )
    }
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.request_id);
    }
}

/// Route replies to their pending callers until the connection ends.
async fn reply_loop(mut ws_reader: WsReader, pending: Pending, connected: Arc<AtomicBool>) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(WsMessage::Text(text)) => match frame::decode_server(&text) {
                Ok(ServerFrame::Reply { request_id, reply }) => {
                    let waiter = pending.lock().remove(&request_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(reply);
                        }
                        None => {
                            tracing::debug!(request_id, "reply for unknown request, ignoring");
                        }
                    }
                }
                Ok(ServerFrame::Error { reason }) => {
                    tracing::warn!(reason = %reason, "gateway reported a service error");
                }
                Ok(other) => {
                    tracing::debug!(?other, "ignoring unexpected frame on service channel");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed gateway frame, skipping");
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(err = %e, "service connection read error");
                break;
            }
        }
    }

    connected.store(false, Ordering::Release);
    // Dropping the senders fails every outstanding call with `Disconnected`.
    pending.lock().clear();
    tracing::info!("service reader task exiting");
}

fn unexpected(reply: &ServiceReply) -> ServiceError {
    tracing::warn!(?reply, "unexpected service reply");
    ServiceError::Rejected("unexpected reply from gateway".into())
}

impl IdentityService for GatewayServices {
    /// The identity the service connection was authenticated as.
    async fn caller_identity(&self) -> Result<Identity, ServiceError> {
        if self.is_connected() {
            Ok(self.identity.clone())
        } else {
            Err(ServiceError::Disconnected)
        }
    }
}

impl RoomService for GatewayServices {
    async fn rooms_by_post(&self, post_id: &PostId) -> Result<Vec<Room>, ServiceError> {
        match self
            .call(ServiceCall::RoomsByPost {
                post_id: post_id.clone(),
            })
            .await?
        {
            ServiceReply::Rooms { rooms } => Ok(rooms),
            other => Err(unexpected(&other)),
        }
    }

    async fn create_private_room(
        &self,
        user_id: &Identity,
        post_id: &PostId,
    ) -> Result<RoomId, ServiceError> {
        match self
            .call(ServiceCall::CreatePrivateRoom {
                user_id: user_id.clone(),
                post_id: post_id.clone(),
            })
            .await?
        {
            ServiceReply::RoomCreated { room_id } => Ok(room_id),
            other => Err(unexpected(&other)),
        }
    }
}

impl MessageService for GatewayServices {
    async fn messages_by_room(&self, room_id: &RoomId) -> Result<Vec<Message>, ServiceError> {
        match self
            .call(ServiceCall::MessagesByRoom {
                room_id: room_id.clone(),
            })
            .await?
        {
            ServiceReply::Messages { messages } => Ok(messages),
            other => Err(unexpected(&other)),
        }
    }

    async fn messages_by_room_and_user(
        &self,
        room_id: &RoomId,
        user_id: &Identity,
    ) -> Result<Vec<Message>, ServiceError> {
        match self
            .call(ServiceCall::MessagesByRoomAndUser {
                room_id: room_id.clone(),
                user_id: user_id.clone(),
            })
            .await?
        {
            ServiceReply::Messages { messages } => Ok(messages),
            other => Err(unexpected(&other)),
        }
    }
}
