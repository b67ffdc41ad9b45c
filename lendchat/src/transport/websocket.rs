//! WebSocket transport to a `LendChat` gateway.
//!
//! Implements [`Connector`] over a WebSocket connection. A connection is
//! authenticated by sending [`ClientFrame::Hello`] with the caller's identity
//! on the `chat` channel and waiting for [`ServerFrame::Welcome`]. After the
//! handshake a background reader task turns inbound frames into
//! [`TransportEvent`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use lendchat_proto::frame::{self, Channel, ClientFrame, ServerFrame};
use lendchat_proto::message::{Identity, Message};

use super::{Connection, Connector, ReadyState, TransportError, TransportEvent};

/// Type alias for the write half of a WebSocket connection.
pub(crate) type WsSender =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, WsMessage>;

/// Type alias for the read half of a WebSocket connection.
pub(crate) type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for establishing the WebSocket connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the `Welcome` acknowledgment.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens chat connections to a gateway URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector for `url` with default timeouts.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Overrides the connect and handshake timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, connect: Duration, handshake: Duration) -> Self {
        self.connect_timeout = connect;
        self.handshake_timeout = handshake;
        self
    }

    /// The gateway URL this connector dials.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// A chat connection to the gateway.
pub struct WsConnection {
    identity: Identity,
    /// Write half of the WebSocket connection.
    ws_sender: Arc<Mutex<WsSender>>,
    /// Shared [`ReadyState`], encoded by [`encode_state`].
    state: Arc<AtomicU8>,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl WsConnection {
    /// Identity this connection was authenticated as.
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl Connector for WsConnector {
    type Conn = WsConnection;

    /// Connect, authenticate and start the reader task.
    ///
    /// Emits [`TransportEvent::Open`] once the gateway has acknowledged the
    /// handshake.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if connecting or the handshake times out.
    /// - [`TransportError::Unreachable`] if the gateway refuses the TCP connection.
    /// - [`TransportError::Rejected`] if the gateway answers with an error frame.
    async fn connect(
        &self,
        identity: &Identity,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<WsConnection, TransportError> {
        let (mut ws_sender, mut ws_reader) = handshake(
            &self.url,
            identity,
            Channel::Chat,
            self.connect_timeout,
            self.handshake_timeout,
        )
        .await?;

        let state = Arc::new(AtomicU8::new(encode_state(ReadyState::Open)));
        if events.send(TransportEvent::Open).await.is_err() {
            // Nobody is listening for this connection any more.
            let _ = ws_sender.close().await;
            return Err(TransportError::ConnectionClosed);
        }

        let reader_state = Arc::clone(&state);
        let reader_handle = tokio::spawn(async move {
            reader_loop(&mut ws_reader, events, reader_state).await;
        });

        Ok(WsConnection {
            identity: identity.clone(),
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            state,
            _reader_handle: reader_handle,
        })
    }
}

impl Connection for WsConnection {
    /// Send a chat message as a [`ClientFrame::Chat`] text frame.
    ///
    /// # Errors
    ///
    /// - [`TransportError::ConnectionClosed`] if the connection is not open or
    ///   the write fails.
    /// - [`TransportError::Codec`] if the frame cannot be encoded.
    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::ConnectionClosed);
        }

        let text = frame::encode_client(&ClientFrame::Chat {
            message: message.clone(),
        })?;

        let mut sender = self.ws_sender.lock().await;
        sender.send(WsMessage::Text(text.into())).await.map_err(|e| {
            tracing::warn!(err = %e, "chat send failed");
            self.state
                .store(encode_state(ReadyState::Closed), Ordering::Relaxed);
            TransportError::ConnectionClosed
        })
    }

    fn ready_state(&self) -> ReadyState {
        decode_state(self.state.load(Ordering::Relaxed))
    }
}

/// Connect to `url` and complete the `Hello`/`Welcome` exchange.
pub(crate) async fn handshake(
    url: &str,
    identity: &Identity,
    channel: Channel,
    connect_timeout: Duration,
    handshake_timeout: Duration,
) -> Result<(WsSender, WsReader), TransportError> {
    let (ws_stream, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
        .await
        .map_err(|_| {
            tracing::warn!(url, "gateway connect timed out");
            TransportError::Timeout
        })?
        .map_err(|e| {
            tracing::warn!(url, err = %e, "gateway connect failed");
            map_ws_connect_error(url, e)
        })?;

    let (mut ws_sender, mut ws_reader) = ws_stream.split();

    let hello = frame::encode_client(&ClientFrame::Hello {
        identity: identity.clone(),
        channel,
    })?;
    ws_sender
        .send(WsMessage::Text(hello.into()))
        .await
        .map_err(|e| {
            tracing::warn!(err = %e, "failed to send Hello");
            TransportError::Io(std::io::Error::other(format!("failed to send Hello: {e}")))
        })?;

    let ack = tokio::time::timeout(handshake_timeout, ws_reader.next())
        .await
        .map_err(|_| {
            tracing::warn!(url, "gateway handshake timed out");
            TransportError::Timeout
        })?;

    match ack {
        Some(Ok(WsMessage::Text(text))) => match frame::decode_server(&text)? {
            ServerFrame::Welcome { identity: welcomed } => {
                tracing::info!(identity = %welcomed, ?channel, url, "connected to gateway");
                Ok((ws_sender, ws_reader))
            }
            ServerFrame::Error { reason } => {
                tracing::warn!(reason = %reason, "gateway rejected handshake");
                Err(TransportError::Rejected(reason))
            }
            other => {
                tracing::warn!(?other, "unexpected frame during handshake");
                Err(TransportError::Rejected(
                    "unexpected frame during handshake".into(),
                ))
            }
        },
        Some(Ok(WsMessage::Close(_))) | None => {
            tracing::warn!("gateway closed connection during handshake");
            Err(TransportError::ConnectionClosed)
        }
        Some(Ok(_)) => Err(TransportError::Rejected(
            "unexpected non-text frame during handshake".into(),
        )),
        Some(Err(e)) => Err(TransportError::Io(std::io::Error::other(format!(
            "WebSocket error during handshake: {e}"
        )))),
    }
}

/// Background task turning inbound frames into [`TransportEvent`]s.
///
/// Malformed frames are logged and skipped. A read error emits one `Error`
/// event; the end of the stream emits one `Close` event.
async fn reader_loop(
    ws_reader: &mut WsReader,
    events: mpsc::Sender<TransportEvent>,
    state: Arc<AtomicU8>,
) {
    let mut failure = None;
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(WsMessage::Text(text)) => match frame::decode_server(&text) {
                Ok(ServerFrame::Chat { message }) => {
                    if events.send(TransportEvent::Message(message)).await.is_err() {
                        // Session dropped its receiver.
                        break;
                    }
                }
                Ok(ServerFrame::Error { reason }) => {
                    tracing::warn!(reason = %reason, "gateway reported an error");
                }
                Ok(other) => {
                    tracing::debug!(?other, "ignoring unexpected frame on chat channel");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed gateway frame, skipping");
                }
            },
            Ok(WsMessage::Close(_)) => {
                tracing::info!("gateway closed the chat connection");
                break;
            }
            Ok(_) => {
                // Binary, ping and pong frames carry nothing for the session.
            }
            Err(e) => {
                tracing::warn!(err = %e, "chat connection read error");
                failure = Some(e.to_string());
                break;
            }
        }
    }

    state.store(encode_state(ReadyState::Closed), Ordering::Relaxed);
    let event = failure.map_or(TransportEvent::Close, TransportEvent::Error);
    let _ = events.send(event).await;
    tracing::info!("chat reader task exiting");
}

const fn encode_state(state: ReadyState) -> u8 {
    match state {
        ReadyState::Connecting => 0,
        ReadyState::Open => 1,
        ReadyState::Closing => 2,
        ReadyState::Closed => 3,
    }
}

const fn decode_state(raw: u8) -> ReadyState {
    match raw {
        0 => ReadyState::Connecting,
        1 => ReadyState::Open,
        2 => ReadyState::Closing,
        _ => ReadyState::Closed,
    }
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(url.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "gateway HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "gateway connection error: {other}"
        ))),
    }
}
