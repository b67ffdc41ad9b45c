//! Chat rooms opened between two identities about one loan post.

use serde::{Deserialize, Serialize};

use crate::message::{Identity, PostId, RoomId};

/// A room grouping the messages exchanged about one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Unique room identifier.
    pub room_id: RoomId,
    /// Identities allowed to read and write in this room.
    pub participants: Vec<Identity>,
    /// The post this room was opened for.
    pub post_id: PostId,
}

impl Room {
    /// Builds a private room between two identities for `post_id`.
    ///
    /// Participants are stored sorted so that the same pair always yields
    /// the same participant list regardless of who opened the chat.
    #[must_use]
    pub fn private(room_id: RoomId, a: Identity, b: Identity, post_id: PostId) -> Self {
        let mut participants = vec![a, b];
        participants.sort();
        participants.dedup();
        Self {
            room_id,
            participants,
            post_id,
        }
    }

    /// Returns `true` if `identity` is a participant of this room.
    #[must_use]
    pub fn includes(&self, identity: &Identity) -> bool {
        self.participants.iter().any(|p| p == identity)
    }

    /// Returns `true` if this room is the private room of `a` and `b` for `post_id`.
    #[must_use]
    pub fn is_private_for(&self, a: &Identity, b: &Identity, post_id: &PostId) -> bool {
        self.post_id == *post_id && self.includes(a) && self.includes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_room_sorts_participants() {
        let room = Room::private(
            RoomId::new("r"),
            Identity::new("zed"),
            Identity::new("amy"),
            PostId::new("p"),
        );
        assert_eq!(
            room.participants,
            vec![Identity::new("amy"), Identity::new("zed")]
        );
    }

    #[test]
    fn private_room_matches_either_order() {
        let room = Room::private(
            RoomId::new("r"),
            Identity::new("alice"),
            Identity::new("bob"),
            PostId::new("post-7"),
        );
        let (alice, bob) = (Identity::new("alice"), Identity::new("bob"));
        assert!(room.is_private_for(&alice, &bob, &PostId::new("post-7")));
        assert!(room.is_private_for(&bob, &alice, &PostId::new("post-7")));
        assert!(!room.is_private_for(&alice, &bob, &PostId::new("post-8")));
        assert!(!room.includes(&Identity::new("carol")));
    }

    #[test]
    fn self_chat_collapses_to_one_participant() {
        let room = Room::private(
            RoomId::new("r"),
            Identity::new("alice"),
            Identity::new("alice"),
            PostId::new("p"),
        );
        assert_eq!(room.participants.len(), 1);
    }
}
