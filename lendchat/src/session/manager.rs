//! The chat session manager.
//!
//! [`ChatSession`] wires one transport connection into the session state:
//! transport notifications arrive on a bounded event queue and are applied
//! by [`process_next_event`](ChatSession::process_next_event),
//! [`drain_events`](ChatSession::drain_events) or
//! [`run_events`](ChatSession::run_events). Service fetches replace the
//! room or message list; overlapping fetches of the same kind are reconciled
//! with a [`Generation`](super::state::Generation) so only the latest result
//! is applied.
//!
//! State sits behind a synchronous lock that is never held across an await.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use lendchat_proto::message::{Identity, Message, PostId, RoomId, Timestamp};
use lendchat_proto::room::Room;

use super::form::MessageForm;
use super::notice::Notice;
use super::state::SessionState;
use super::{
    ConnectionState, CurrentUser, FetchOutcome, SendOutcome, SessionConfig, SessionError,
    SessionSnapshot, SessionUpdate,
};
use crate::services::{IdentityService, MessageService, RoomService};
use crate::transport::{Connection, Connector, ReadyState, TransportEvent};

/// Owns a chat connection and the state the presentation layer renders.
///
/// Generic over the transport connector and the three services so tests can
/// substitute in-process fakes.
pub struct ChatSession<K: Connector, R: RoomService, M: MessageService, I: IdentityService> {
    connector: K,
    room_service: R,
    message_service: M,
    identity_service: I,
    state: Mutex<SessionState>,
    /// The established connection. Set at most once per successful connect.
    connection: Mutex<Option<Arc<K::Conn>>>,
    /// Handed to the connector; released once the connection ends so the
    /// event queue closes when the transport lets go of its copy.
    event_tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    event_rx: tokio::sync::Mutex<mpsc::Receiver<TransportEvent>>,
    notice_tx: mpsc::Sender<Notice>,
}

impl<K: Connector, R: RoomService, M: MessageService, I: IdentityService> ChatSession<K, R, M, I> {
    /// Creates a session with no current user.
    ///
    /// Returns the session and a receiver for the [`Notice`]s the
    /// presentation layer should show.
    pub fn new(
        connector: K,
        room_service: R,
        message_service: M,
        identity_service: I,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<Notice>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let (notice_tx, notice_rx) = mpsc::channel(config.notice_buffer.max(1));
        let session = Self {
            connector,
            room_service,
            message_service,
            identity_service,
            state: Mutex::new(SessionState::new(None)),
            connection: Mutex::new(None),
            event_tx: Mutex::new(Some(event_tx)),
            event_rx: tokio::sync::Mutex::new(event_rx),
            notice_tx,
        };
        (session, notice_rx)
    }

    /// Open the chat connection.
    ///
    /// The first call moves the session to `Connecting`, fetches the caller
    /// identity and connects. Calls made while connecting, open, or after an
    /// established connection closed do nothing. If connecting fails the
    /// failure is logged, the session moves to `Closed` and a later call may
    /// try again.
    pub async fn open(&self) {
        let has_connection = self.connection.lock().is_some();
        let events = {
            let mut state = self.state.lock();
            let may_open = match state.connection {
                ConnectionState::Uninitialized => true,
                ConnectionState::Closed => !has_connection,
                ConnectionState::Connecting | ConnectionState::Open => false,
            };
            if !may_open {
                tracing::debug!(state = %state.connection, "open ignored");
                return;
            }
            let Some(events) = self.event_tx.lock().clone() else {
                tracing::debug!("event queue released, open ignored");
                return;
            };
            state.connection = ConnectionState::Connecting;
            events
        };

        let identity = match self.identity_service.caller_identity().await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(err = %e, "could not resolve caller identity");
                self.state.lock().connection = ConnectionState::Closed;
                return;
            }
        };

        match self.connector.connect(&identity, events).await {
            Ok(conn) => {
                tracing::info!(identity = %identity, "chat connection established");
                *self.connection.lock() = Some(Arc::new(conn));
                // The connection may have ended before `connect` returned.
                if self.state.lock().connection == ConnectionState::Closed {
                    self.release_events();
                }
            }
            Err(e) => {
                tracing::warn!(identity = %identity, err = %e, "chat connection failed");
                self.state.lock().connection = ConnectionState::Closed;
            }
        }
    }

    /// Load the rooms opened for `post_id`, replacing the room list.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Service`] if the room service rejects the call.
    /// - [`SessionError::Superseded`] if a newer `get_room` was issued while
    ///   this one was in flight; its result was discarded.
    pub async fn get_room(&self, post_id: &PostId) -> Result<(), SessionError> {
        let token = self.state.lock().rooms_generation.issue();
        let rooms = self
            .room_service
            .rooms_by_post(post_id)
            .await
            .inspect_err(|e| tracing::warn!(post_id = %post_id, err = %e, "room fetch failed"))?;

        let mut state = self.state.lock();
        if !state.rooms_generation.is_current(token) {
            tracing::debug!(post_id = %post_id, "discarding stale room list");
            return Err(SessionError::Superseded);
        }
        tracing::debug!(post_id = %post_id, count = rooms.len(), "rooms loaded");
        state.replace_rooms(rooms);
        Ok(())
    }

    /// Load the messages of `room_id`, replacing the message list.
    ///
    /// Emits [`Notice::Loading`] followed by [`Notice::Success`] or
    /// [`Notice::Error`].
    pub async fn get_messages(&self, room_id: &RoomId) -> FetchOutcome {
        self.notify(Notice::loading_messages());
        match self.load_messages(room_id).await {
            Ok(count) => {
                self.notify(Notice::messages_loaded());
                FetchOutcome::Applied(count)
            }
            Err(SessionError::Superseded) => {
                self.notify(Notice::messages_loaded());
                FetchOutcome::Superseded
            }
            Err(SessionError::Service(_)) => {
                self.notify(Notice::messages_failed());
                FetchOutcome::Failed
            }
        }
    }

    /// Load the messages `user_id` sent in `room_id`, replacing the message
    /// list. No notices are emitted.
    ///
    /// # Errors
    ///
    /// Same as [`get_room`](Self::get_room).
    pub async fn get_user_messages(
        &self,
        room_id: &RoomId,
        user_id: &Identity,
    ) -> Result<usize, SessionError> {
        let token = self.state.lock().messages_generation.issue();
        let messages = self
            .message_service
            .messages_by_room_and_user(room_id, user_id)
            .await
            .inspect_err(|e| {
                tracing::warn!(room_id = %room_id, user_id = %user_id, err = %e, "message fetch failed");
            })?;
        self.apply_messages(room_id, token, messages)
    }

    /// Open the private chat with `user_id` about `post_id`.
    ///
    /// Creates (or finds) the room, writes its id into the form and loads its
    /// messages once. Returns the room id.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Service`] if room creation or the message fetch fails.
    /// - [`SessionError::Superseded`] if a newer `open_chat` was issued while
    ///   this one was creating its room; the form and messages are untouched.
    pub async fn open_chat(
        &self,
        user_id: &Identity,
        post_id: &PostId,
    ) -> Result<RoomId, SessionError> {
        let token = self.state.lock().chat_generation.issue();
        let room_id = self
            .room_service
            .create_private_room(user_id, post_id)
            .await
            .inspect_err(|e| {
                tracing::warn!(user_id = %user_id, post_id = %post_id, err = %e, "room creation failed");
            })?;

        {
            let mut state = self.state.lock();
            if !state.chat_generation.is_current(token) {
                tracing::debug!(room_id = %room_id, "discarding stale chat");
                return Err(SessionError::Superseded);
            }
            state.form.room_id = room_id.clone();
        }
        tracing::info!(room_id = %room_id, user_id = %user_id, post_id = %post_id, "chat opened");

        match self.load_messages(&room_id).await {
            Ok(_) | Err(SessionError::Superseded) => Ok(room_id),
            Err(e) => Err(e),
        }
    }

    /// Send the message composed in the form.
    ///
    /// Does nothing without a current user. Otherwise stamps the sender
    /// fields, and transmits if the connection is open, clearing the body.
    /// A message that cannot be sent is logged and dropped; it is never
    /// queued or retried.
    pub async fn send_message(&self) -> SendOutcome {
        let message = {
            let mut state = self.state.lock();
            let Some(user) = state.current_user.clone() else {
                tracing::debug!("no current user, not sending");
                return SendOutcome::NoUser;
            };
            state.form.stamp(&user);
            state.form.created_at = Timestamp::now();
            let message = state.form.to_message();
            if let Err(e) = message.validate() {
                tracing::warn!(err = %e, "message not sent");
                return SendOutcome::Invalid(e);
            }
            if state.connection != ConnectionState::Open {
                tracing::warn!(state = %state.connection, "chat connection is not open, message dropped");
                return SendOutcome::NotOpen;
            }
            message
        };

        let connection = self.connection.lock().clone();
        let Some(connection) = connection else {
            tracing::warn!("no chat connection, message dropped");
            return SendOutcome::NotOpen;
        };
        if connection.ready_state() != ReadyState::Open {
            tracing::warn!(ready_state = %connection.ready_state(), "chat connection is not open, message dropped");
            return SendOutcome::NotOpen;
        }

        match connection.send(&message).await {
            Ok(()) => {
                self.state.lock().form.clear_body();
                tracing::debug!(room_id = %message.room_id, "message sent");
                SendOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(room_id = %message.room_id, err = %e, "message send failed");
                self.notify(Notice::send_failed());
                SendOutcome::Failed
            }
        }
    }

    /// Wait for the next transport event and apply it.
    ///
    /// Returns `None` once the event queue has closed.
    pub async fn process_next_event(&self) -> Option<SessionUpdate> {
        let event = self.event_rx.lock().await.recv().await?;
        Some(self.apply_event(event))
    }

    /// Apply every transport event already queued, without waiting.
    pub fn drain_events(&self) -> Vec<SessionUpdate> {
        let Ok(mut rx) = self.event_rx.try_lock() else {
            tracing::debug!("event queue busy, nothing drained");
            return Vec::new();
        };
        let mut updates = Vec::new();
        while let Ok(event) = rx.try_recv() {
            updates.push(self.apply_event(event));
        }
        updates
    }

    /// Apply transport events until the queue closes.
    pub async fn run_events(&self) {
        while let Some(update) = self.process_next_event().await {
            tracing::trace!(?update, "session updated");
        }
        tracing::debug!("event queue closed");
    }

    /// Set or clear the signed-in user. The form's sender fields follow.
    pub fn set_current_user(&self, user: Option<CurrentUser>) {
        let mut state = self.state.lock();
        if let Some(user) = &user {
            state.form.stamp(user);
        }
        state.current_user = user;
    }

    /// Current connection lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    /// Messages, newest first.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    /// Rooms of the last applied `get_room`.
    pub fn rooms(&self) -> Vec<Room> {
        self.state.lock().rooms.clone()
    }

    /// Current form values.
    pub fn form(&self) -> MessageForm {
        self.state.lock().form.clone()
    }

    /// Replace the body being composed.
    pub fn set_body(&self, body: impl Into<String>) {
        self.state.lock().form.body = body.into();
    }

    /// Edit the form in place.
    pub fn update_form(&self, edit: impl FnOnce(&mut MessageForm)) {
        edit(&mut self.state.lock().form);
    }

    /// Copy of the whole session state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().snapshot()
    }

    async fn load_messages(&self, room_id: &RoomId) -> Result<usize, SessionError> {
        let token = self.state.lock().messages_generation.issue();
        let messages = self
            .message_service
            .messages_by_room(room_id)
            .await
            .inspect_err(|e| tracing::warn!(room_id = %room_id, err = %e, "message fetch failed"))?;
        self.apply_messages(room_id, token, messages)
    }

    fn apply_messages(
        &self,
        room_id: &RoomId,
        token: u64,
        messages: Vec<Message>,
    ) -> Result<usize, SessionError> {
        let mut state = self.state.lock();
        if !state.messages_generation.is_current(token) {
            tracing::debug!(room_id = %room_id, "discarding stale messages");
            return Err(SessionError::Superseded);
        }
        let count = messages.len();
        state.replace_messages(messages);
        tracing::debug!(room_id = %room_id, count, "messages loaded");
        Ok(count)
    }

    fn apply_event(&self, event: TransportEvent) -> SessionUpdate {
        let mut state = self.state.lock();
        match event {
            TransportEvent::Open => {
                if state.connection == ConnectionState::Connecting {
                    state.connection = ConnectionState::Open;
                    tracing::info!("connected");
                    SessionUpdate::Opened
                } else {
                    tracing::debug!(state = %state.connection, "open event ignored");
                    SessionUpdate::Unchanged
                }
            }
            TransportEvent::Close => {
                state.connection = ConnectionState::Closed;
                drop(state);
                self.release_events();
                tracing::info!("disconnected");
                SessionUpdate::Closed
            }
            TransportEvent::Error(reason) => {
                state.connection = ConnectionState::Closed;
                drop(state);
                self.release_events();
                tracing::warn!(reason = %reason, "chat connection error");
                SessionUpdate::Failed(reason)
            }
            TransportEvent::Message(message) => {
                tracing::debug!(room_id = %message.room_id, user_id = %message.user_id, "message received");
                state.prepend_message(message.clone());
                SessionUpdate::MessageReceived(message)
            }
        }
    }

    /// Drop the session's event sender once its connection has ended.
    ///
    /// Called both when `Close`/`Error` is applied and when `connect`
    /// returns into an already closed session, so whichever happens last
    /// releases the sender.
    fn release_events(&self) {
        if self.connection.lock().is_some() {
            self.event_tx.lock().take();
        }
    }

    fn notify(&self, notice: Notice) {
        if let Err(e) = self.notice_tx.try_send(notice) {
            tracing::debug!(err = %e, "notice dropped");
        }
    }
}
