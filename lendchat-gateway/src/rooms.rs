//! Room directory for the gateway.
//!
//! Holds every private room opened between two identities for a post.
//! Creating a room for a pair and post that already has one returns the
//! existing room. Rooms are ephemeral and lost on gateway restart.

use std::collections::HashMap;

use lendchat_proto::message::{Identity, PostId, RoomId};
use lendchat_proto::room::Room;
use tokio::sync::RwLock;

/// Default maximum number of rooms the directory will hold.
const DEFAULT_MAX_ROOMS: usize = 10_000;

/// Errors that can occur when creating rooms.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// A participant identity or the post id is empty.
    #[error("participants and post must not be empty")]
    MissingField,
    /// A private room needs two distinct participants.
    #[error("cannot open a private room with yourself")]
    SameParticipant,
    /// The directory has reached its maximum capacity.
    #[error("room directory is full (max {0} rooms)")]
    CapacityReached(usize),
}

/// In-memory directory of rooms keyed by room id.
///
/// Thread-safe via [`RwLock`].
pub struct RoomDirectory {
    rooms: RwLock<HashMap<RoomId, Room>>,
    max_rooms: usize,
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomDirectory {
    /// Creates an empty directory with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_rooms(DEFAULT_MAX_ROOMS)
    }

    /// Creates an empty directory holding at most `max_rooms` rooms.
    #[must_use]
    pub fn with_max_rooms(max_rooms: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_rooms,
        }
    }

    /// Returns the private room between `a` and `b` for `post_id`, creating
    /// it if it does not exist yet.
    ///
    /// # Errors
    ///
    /// - [`RoomError::MissingField`] if an identity or the post id is empty.
    /// - [`RoomError::SameParticipant`] if `a` and `b` are the same identity.
    /// - [`RoomError::CapacityReached`] if a new room would exceed capacity.
    pub async fn create_private(
        &self,
        a: &Identity,
        b: &Identity,
        post_id: &PostId,
    ) -> Result<RoomId, RoomError> {
        if a.is_empty() || b.is_empty() || post_id.is_empty() {
            return Err(RoomError::MissingField);
        }
        if a == b {
            return Err(RoomError::SameParticipant);
        }

        let mut rooms = self.rooms.write().await;
        if let Some(existing) = rooms.values().find(|r| r.is_private_for(a, b, post_id)) {
            tracing::debug!(room_id = %existing.room_id, "private room already exists");
            return Ok(existing.room_id.clone());
        }
        if rooms.len() >= self.max_rooms {
            return Err(RoomError::CapacityReached(self.max_rooms));
        }

        let room_id = RoomId::generate();
        rooms.insert(
            room_id.clone(),
            Room::private(room_id.clone(), a.clone(), b.clone(), post_id.clone()),
        );
        drop(rooms);

        tracing::info!(room_id = %room_id, post_id = %post_id, "private room created");
        Ok(room_id)
    }

    /// Rooms for `post_id` that `caller` takes part in, ordered by room id.
    pub async fn by_post(&self, post_id: &PostId, caller: &Identity) -> Vec<Room> {
        let rooms = self.rooms.read().await;
        let mut found: Vec<Room> = rooms
            .values()
            .filter(|r| &r.post_id == post_id && r.includes(caller))
            .cloned()
            .collect();
        drop(rooms);
        found.sort_by(|x, y| x.room_id.cmp(&y.room_id));
        found
    }

    /// Looks up a room by id.
    pub async fn get(&self, room_id: &RoomId) -> Option<Room> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Number of rooms in the directory.
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Returns `true` if the directory holds no rooms.
    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (Identity, Identity, PostId) {
        (
            Identity::new("lender"),
            Identity::new("borrower"),
            PostId::new("post-7"),
        )
    }

    #[tokio::test]
    async fn create_is_idempotent_in_either_order() {
        let dir = RoomDirectory::new();
        let (a, b, post) = ids();

        let first = dir.create_private(&a, &b, &post).await.unwrap();
        let second = dir.create_private(&b, &a, &post).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(dir.len().await, 1);
    }

    #[tokio::test]
    async fn different_post_gets_a_different_room() {
        let dir = RoomDirectory::new();
        let (a, b, post) = ids();

        let first = dir.create_private(&a, &b, &post).await.unwrap();
        let other = dir
            .create_private(&a, &b, &PostId::new("post-8"))
            .await
            .unwrap();

        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn self_chat_and_empty_ids_are_rejected() {
        let dir = RoomDirectory::new();
        let (a, _, post) = ids();

        assert!(matches!(
            dir.create_private(&a, &a, &post).await,
            Err(RoomError::SameParticipant)
        ));
        assert!(matches!(
            dir.create_private(&a, &Identity::new(""), &post).await,
            Err(RoomError::MissingField)
        ));
        assert!(dir.is_empty().await);
    }

    #[tokio::test]
    async fn capacity_is_enforced_but_existing_rooms_still_resolve() {
        let dir = RoomDirectory::with_max_rooms(1);
        let (a, b, post) = ids();
        let room = dir.create_private(&a, &b, &post).await.unwrap();

        assert!(matches!(
            dir.create_private(&a, &Identity::new("c"), &post).await,
            Err(RoomError::CapacityReached(1))
        ));
        assert_eq!(dir.create_private(&a, &b, &post).await.unwrap(), room);
    }

    #[tokio::test]
    async fn by_post_only_lists_rooms_of_the_caller() {
        let dir = RoomDirectory::new();
        let (a, b, post) = ids();
        let mine = dir.create_private(&a, &b, &post).await.unwrap();
        dir.create_private(&Identity::new("x"), &Identity::new("y"), &post)
            .await
            .unwrap();

        let rooms = dir.by_post(&post, &a).await;
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].room_id, mine);
        assert!(dir.by_post(&PostId::new("other"), &a).await.is_empty());
    }

    #[tokio::test]
    async fn get_returns_participants() {
        let dir = RoomDirectory::new();
        let (a, b, post) = ids();
        let id = dir.create_private(&a, &b, &post).await.unwrap();

        let room = dir.get(&id).await.unwrap();
        assert!(room.includes(&a) && room.includes(&b));
        assert!(dir.get(&RoomId::new("missing")).await.is_none());
    }
}
