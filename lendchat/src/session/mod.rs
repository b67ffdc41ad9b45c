//! Chat session management.
//!
//! A [`ChatSession`] owns one chat connection, keeps the messages and rooms
//! the user is looking at, and exposes the operations the presentation layer
//! drives: opening the connection, loading rooms and history, opening a
//! private chat and sending the composed message.

pub mod form;
pub mod manager;
pub mod notice;
pub mod state;

use std::fmt;

use lendchat_proto::message::{Identity, Message, ValidationError};
use lendchat_proto::room::Room;

use crate::services::ServiceError;

pub use form::MessageForm;
pub use manager::ChatSession;
pub use notice::Notice;

/// Lifecycle of the session's chat connection.
///
/// `Uninitialized -> Connecting -> Open -> Closed`. There is no way back
/// from `Closed` once a connection was established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// `open` has not been called.
    #[default]
    Uninitialized,
    /// Waiting for the transport to report `Open`.
    Connecting,
    /// Messages can be sent.
    Open,
    /// The connection closed, failed, or could not be established.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Channel sizes for a [`ChatSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Capacity of the transport event queue.
    pub event_buffer: usize,
    /// Capacity of the notice queue. Notices beyond it are dropped.
    pub notice_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            notice_buffer: 32,
        }
    }
}

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    /// Authenticated principal.
    pub identity: Identity,
    /// Display name shown next to messages.
    pub username: String,
}

/// What processing one transport event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// The connection opened.
    Opened,
    /// The connection closed.
    Closed,
    /// The connection failed.
    Failed(String),
    /// A message was prepended to the list.
    MessageReceived(Message),
    /// The event did not change the session, e.g. a late `Open`.
    Unchanged,
}

/// Point-in-time copy of the session state for rendering.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Connection lifecycle state.
    pub connection: ConnectionState,
    /// Messages, newest first.
    pub messages: Vec<Message>,
    /// Rooms of the last `get_room` call.
    pub rooms: Vec<Room>,
    /// Current form values.
    pub form: MessageForm,
    /// The signed-in user, if any.
    pub current_user: Option<CurrentUser>,
}

/// Result of [`ChatSession::send_message`].
///
/// None of these is an error to the caller; they describe what happened so
/// it can be observed and tested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was handed to the transport and the body cleared.
    Sent,
    /// No current user; nothing was done.
    NoUser,
    /// The connection is not open; the message was dropped.
    NotOpen,
    /// The form does not describe a sendable message.
    Invalid(ValidationError),
    /// The transport failed to send; a notice was emitted.
    Failed,
}

/// Result of a message history fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The fetched list replaced the session's messages.
    Applied(usize),
    /// A newer fetch was issued meanwhile; the result was discarded.
    Superseded,
    /// The service call failed.
    Failed,
}

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A service call failed.
    #[error("service call failed: {0}")]
    Service(#[from] ServiceError),

    /// A newer request of the same kind was issued before this one completed.
    #[error("request superseded by a newer one")]
    Superseded,
}
