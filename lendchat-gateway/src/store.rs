//! In-memory message log.
//!
//! The [`MessageLog`] keeps the messages of each room in arrival order,
//! capped per room; when the cap is exceeded the oldest message is dropped.
//! Reads return messages newest first, the order clients display them in.

use std::collections::{HashMap, VecDeque};

use lendchat_proto::message::{Identity, Message, RoomId};
use tokio::sync::RwLock;

/// Default maximum number of messages kept per room before FIFO eviction.
const DEFAULT_MAX_ROOM_HISTORY: usize = 1000;

/// Per-room message history with FIFO eviction.
///
/// Thread-safe via [`RwLock`].
pub struct MessageLog {
    rooms: RwLock<HashMap<RoomId, VecDeque<Message>>>,
    max_room_history: usize,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    /// Creates an empty log with the default per-room limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_room_history(DEFAULT_MAX_ROOM_HISTORY)
    }

    /// Creates an empty log keeping at most `max_room_history` messages per room.
    #[must_use]
    pub fn with_max_room_history(max_room_history: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_room_history,
        }
    }

    /// Appends a message to its room, returning the room's new length.
    pub async fn append(&self, message: Message) -> usize {
        let mut rooms = self.rooms.write().await;
        let history = rooms.entry(message.room_id.clone()).or_default();
        history.push_back(message);
        while history.len() > self.max_room_history {
            history.pop_front();
        }
        history.len()
    }

    /// Messages of `room_id`, newest first.
    pub async fn by_room(&self, room_id: &RoomId) -> Vec<Message> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|h| h.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages `user_id` sent in `room_id`, newest first.
    pub async fn by_room_and_user(&self, room_id: &RoomId, user_id: &Identity) -> Vec<Message> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|h| {
                h.iter()
                    .rev()
                    .filter(|m| &m.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of messages kept for `room_id`.
    pub async fn room_len(&self, room_id: &RoomId) -> usize {
        self.rooms.read().await.get(room_id).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lendchat_proto::message::Timestamp;

    fn msg(room: &str, user: &str, body: &str) -> Message {
        Message {
            room_id: RoomId::new(room),
            user_id: Identity::new(user),
            username: user.to_string(),
            body: body.to_string(),
            created_at: Timestamp::from_millis(0),
        }
    }

    #[tokio::test]
    async fn reads_are_newest_first() {
        let log = MessageLog::new();
        log.append(msg("r", "a", "1")).await;
        log.append(msg("r", "b", "2")).await;
        log.append(msg("r", "a", "3")).await;

        let bodies: Vec<_> = log
            .by_room(&RoomId::new("r"))
            .await
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, ["3", "2", "1"]);
    }

    #[tokio::test]
    async fn by_room_and_user_filters_sender() {
        let log = MessageLog::new();
        log.append(msg("r", "a", "1")).await;
        log.append(msg("r", "b", "2")).await;
        log.append(msg("other", "a", "x")).await;

        let mine = log
            .by_room_and_user(&RoomId::new("r"), &Identity::new("a"))
            .await;
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].body, "1");
    }

    #[tokio::test]
    async fn oldest_message_is_evicted_past_the_cap() {
        let log = MessageLog::with_max_room_history(2);
        for i in 0..3 {
            log.append(msg("r", "a", &i.to_string())).await;
        }

        let room = RoomId::new("r");
        assert_eq!(log.room_len(&room).await, 2);
        let bodies: Vec<_> = log.by_room(&room).await.into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, ["2", "1"]);
    }

    #[tokio::test]
    async fn unknown_room_is_empty() {
        let log = MessageLog::new();
        assert!(log.by_room(&RoomId::new("nope")).await.is_empty());
        assert_eq!(log.room_len(&RoomId::new("nope")).await, 0);
    }
}
