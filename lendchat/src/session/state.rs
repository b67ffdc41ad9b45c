//! In-memory session state.
//!
//! Messages are kept newest first: inbound messages are prepended and
//! fetched history replaces the whole list.

use lendchat_proto::message::Message;
use lendchat_proto::room::Room;

use super::form::MessageForm;
use super::{ConnectionState, CurrentUser, SessionSnapshot};

/// Request token source for one kind of fetch.
///
/// Every request takes a token from [`issue`](Self::issue); a result is
/// applied only if its token is still [`is_current`](Self::is_current).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    latest: u64,
}

impl Generation {
    /// Take a token for a new request, superseding all earlier ones.
    pub const fn issue(&mut self) -> u64 {
        self.latest += 1;
        self.latest
    }

    /// Whether `token` belongs to the most recent request.
    #[must_use]
    pub const fn is_current(&self, token: u64) -> bool {
        token == self.latest
    }
}

/// Everything a chat session holds in memory.
#[derive(Debug, Default)]
pub struct SessionState {
    pub(crate) connection: ConnectionState,
    pub(crate) messages: Vec<Message>,
    pub(crate) rooms: Vec<Room>,
    pub(crate) form: MessageForm,
    pub(crate) current_user: Option<CurrentUser>,
    pub(crate) rooms_generation: Generation,
    pub(crate) messages_generation: Generation,
    pub(crate) chat_generation: Generation,
}

impl SessionState {
    pub(crate) fn new(current_user: Option<CurrentUser>) -> Self {
        Self {
            form: MessageForm::new(current_user.as_ref()),
            current_user,
            ..Self::default()
        }
    }

    /// Put `message` at the front of the list. No deduplication.
    pub(crate) fn prepend_message(&mut self, message: Message) {
        self.messages.insert(0, message);
    }

    pub(crate) fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub(crate) fn replace_rooms(&mut self, rooms: Vec<Room>) {
        self.rooms = rooms;
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection,
            messages: self.messages.clone(),
            rooms: self.rooms.clone(),
            form: self.form.clone(),
            current_user: self.current_user.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lendchat_proto::message::{Identity, RoomId, Timestamp};

    fn message(body: &str) -> Message {
        Message {
            room_id: RoomId::new("r"),
            user_id: Identity::new("u"),
            username: "U".into(),
            body: body.into(),
            created_at: Timestamp::from_millis(0),
        }
    }

    #[test]
    fn generation_only_latest_token_is_current() {
        let mut generation = Generation::default();
        let first = generation.issue();
        let second = generation.issue();

        assert!(!generation.is_current(first));
        assert!(generation.is_current(second));
    }

    #[test]
    fn prepend_puts_newest_first_and_keeps_duplicates() {
        let mut state = SessionState::default();
        state.replace_messages(vec![message("old")]);

        state.prepend_message(message("new"));
        state.prepend_message(message("new"));

        let bodies: Vec<_> = state.messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["new", "new", "old"]);
    }

    #[test]
    fn new_state_starts_uninitialized_with_stamped_form() {
        let state = SessionState::new(Some(CurrentUser {
            identity: Identity::new("alice"),
            username: "Alice".into(),
        }));
        assert_eq!(state.connection, ConnectionState::Uninitialized);
        assert_eq!(state.form.user_id, Identity::new("alice"));
        assert!(state.messages.is_empty());
    }
}
