//! Message transport abstraction for chat sessions.
//!
//! A [`Connector`] opens one [`Connection`] per chat session, authenticated by
//! the caller's [`Identity`]. Lifecycle notifications (open, close, error)
//! and inbound messages are delivered as [`TransportEvent`]s on a bounded
//! channel supplied by the caller, so the session can process them in order
//! and tests can replay them deterministically.
//!
//! Implementations:
//! - [`websocket::WsConnector`]: WebSocket connection to a gateway
//! - [`loopback::LoopbackConnector`]: in-process scripted transport for testing

pub mod loopback;
pub mod websocket;

use std::fmt;

use tokio::sync::mpsc;

use lendchat_proto::frame::CodecError;
use lendchat_proto::message::{Identity, Message};

/// Connection state as reported by the transport itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// The handshake has not completed yet.
    Connecting,
    /// Messages can be sent.
    Open,
    /// The connection is shutting down.
    Closing,
    /// The connection is gone.
    Closed,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Notifications emitted by a connection.
///
/// `Open`, `Close` and `Error` are emitted at most once per connection;
/// `Message` zero or more times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established and ready to send.
    Open,
    /// The connection was closed.
    Close,
    /// The connection failed.
    Error(String),
    /// A chat message arrived.
    Message(Message),
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The endpoint could not be reached.
    #[error("endpoint {0} is unreachable")]
    Unreachable(String),

    /// The endpoint refused the handshake.
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A live connection carrying chat messages.
pub trait Connection: Send + Sync {
    /// Transmit a chat message.
    ///
    /// Returns `Ok(())` once the message has been handed to the underlying
    /// transport. Callers check [`Connection::ready_state`] first; sending on
    /// a connection that is not open returns [`TransportError::ConnectionClosed`].
    fn send(
        &self,
        message: &Message,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Current state of the connection.
    fn ready_state(&self) -> ReadyState;
}

/// Factory for [`Connection`]s.
pub trait Connector: Send + Sync {
    /// The connection type produced by this connector.
    type Conn: Connection + 'static;

    /// Establish a connection authenticated as `identity`.
    ///
    /// All notifications for the new connection are pushed into `events`.
    fn connect(
        &self,
        identity: &Identity,
        events: mpsc::Sender<TransportEvent>,
    ) -> impl std::future::Future<Output = Result<Self::Conn, TransportError>> + Send;
}
