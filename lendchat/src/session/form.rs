//! The chat form: values the user is composing.

use lendchat_proto::message::{Identity, Message, RoomId, Timestamp};

use super::CurrentUser;

/// Fields of the chat form.
///
/// The session writes `room_id` when a chat is opened and stamps the sender
/// fields before transmitting; the user edits `body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageForm {
    /// Room the next message goes to. Empty until a chat is opened.
    pub room_id: RoomId,
    /// Body being composed.
    pub body: String,
    /// Creation time sent with the message; set again on every send.
    pub created_at: Timestamp,
    /// Sender identity.
    pub user_id: Identity,
    /// Sender display name.
    pub username: String,
}

impl MessageForm {
    /// An empty form for `user`, created now.
    #[must_use]
    pub fn new(user: Option<&CurrentUser>) -> Self {
        let mut form = Self {
            room_id: RoomId::default(),
            body: String::new(),
            created_at: Timestamp::now(),
            user_id: Identity::default(),
            username: String::new(),
        };
        if let Some(user) = user {
            form.stamp(user);
        }
        form
    }

    /// Write the sender fields from `user`.
    pub fn stamp(&mut self, user: &CurrentUser) {
        self.user_id = user.identity.clone();
        self.username.clone_from(&user.username);
    }

    /// Clear the body, keeping everything else.
    pub fn clear_body(&mut self) {
        self.body.clear();
    }

    /// The message the current form values describe.
    #[must_use]
    pub fn to_message(&self) -> Message {
        Message {
            room_id: self.room_id.clone(),
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            body: self.body.clone(),
            created_at: self.created_at,
        }
    }
}

impl Default for MessageForm {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> CurrentUser {
        CurrentUser {
            identity: Identity::new("alice"),
            username: "Alice".into(),
        }
    }

    #[test]
    fn new_form_is_empty_and_stamped() {
        let form = MessageForm::new(Some(&alice()));
        assert!(form.room_id.is_empty());
        assert!(form.body.is_empty());
        assert_eq!(form.user_id, Identity::new("alice"));
        assert_eq!(form.username, "Alice");
        assert!(form.created_at.as_millis() > 0);
    }

    #[test]
    fn clear_body_keeps_room_and_sender() {
        let mut form = MessageForm::new(Some(&alice()));
        form.room_id = RoomId::new("room-1");
        form.body = "hello".into();

        form.clear_body();

        assert!(form.body.is_empty());
        assert_eq!(form.room_id, RoomId::new("room-1"));
        assert_eq!(form.user_id, Identity::new("alice"));
    }

    #[test]
    fn to_message_copies_every_field() {
        let mut form = MessageForm::new(Some(&alice()));
        form.room_id = RoomId::new("room-1");
        form.body = "hi".into();

        let message = form.to_message();
        assert_eq!(message.room_id, form.room_id);
        assert_eq!(message.user_id, form.user_id);
        assert_eq!(message.username, form.username);
        assert_eq!(message.body, "hi");
        assert_eq!(message.created_at, form.created_at);
    }
}
