//! In-memory service backend.
//!
//! Implements all three service traits over shared in-process state. Every
//! call is recorded so tests can assert what the session asked for, calls
//! can be made to fail with a rejection, and individual calls can be held
//! pending until released to control the order in which overlapping
//! requests complete.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use lendchat_proto::message::{Identity, Message, PostId, RoomId};
use lendchat_proto::room::Room;

use super::{IdentityService, MessageService, RoomService, ServiceError};

/// A recorded service call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Call {
    /// [`IdentityService::caller_identity`].
    CallerIdentity,
    /// [`RoomService::rooms_by_post`].
    RoomsByPost(PostId),
    /// [`RoomService::create_private_room`].
    CreatePrivateRoom {
        /// The other participant.
        user_id: Identity,
        /// The post the room is about.
        post_id: PostId,
    },
    /// [`MessageService::messages_by_room`].
    MessagesByRoom(RoomId),
    /// [`MessageService::messages_by_room_and_user`].
    MessagesByRoomAndUser {
        /// The room read.
        room_id: RoomId,
        /// The sender filtered by.
        user_id: Identity,
    },
}

#[derive(Default)]
struct Inner {
    identity: Identity,
    rooms: Vec<Room>,
    /// Room history, newest first.
    history: HashMap<RoomId, Vec<Message>>,
    /// Room ids handed out by `create_private_room`, keyed by (other user, post).
    assigned: HashMap<(Identity, PostId), RoomId>,
    rejections: HashMap<Call, String>,
    holds: HashMap<Call, Arc<Notify>>,
    calls: Vec<Call>,
}

/// Scripted backend for rooms, messages and the caller identity.
///
/// Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryBackend {
    /// Create a backend that authenticates callers as `identity`.
    #[must_use]
    pub fn new(identity: impl Into<Identity>) -> Self {
        let backend = Self::default();
        backend.inner.lock().identity = identity.into();
        backend
    }

    /// Add a room to the directory.
    pub fn insert_room(&self, room: Room) {
        let mut inner = self.inner.lock();
        inner.rooms.retain(|r| r.room_id != room.room_id);
        inner.rooms.push(room);
    }

    /// Replace the history of `room_id`. `messages` are newest first.
    pub fn set_history(&self, room_id: &RoomId, messages: Vec<Message>) {
        self.inner.lock().history.insert(room_id.clone(), messages);
    }

    /// Append a message to its room's history.
    pub fn push_message(&self, message: Message) {
        self.inner
            .lock()
            .history
            .entry(message.room_id.clone())
            .or_default()
            .insert(0, message);
    }

    /// Make `create_private_room(user_id, post_id)` return `room_id`.
    pub fn assign_room(&self, user_id: &Identity, post_id: &PostId, room_id: &RoomId) {
        self.inner
            .lock()
            .assigned
            .insert((user_id.clone(), post_id.clone()), room_id.clone());
    }

    /// Make every future `call` fail with [`ServiceError::Rejected`].
    pub fn reject(&self, call: Call, reason: &str) {
        self.inner.lock().rejections.insert(call, reason.to_string());
    }

    /// Stop rejecting `call`.
    pub fn accept(&self, call: &Call) {
        self.inner.lock().rejections.remove(call);
    }

    /// Keep the next `call` pending until [`release`](Self::release).
    pub fn hold(&self, call: Call) {
        self.inner
            .lock()
            .holds
            .insert(call, Arc::new(Notify::new()));
    }

    /// Let a held `call` complete.
    pub fn release(&self, call: &Call) {
        if let Some(gate) = self.inner.lock().holds.remove(call) {
            gate.notify_one();
        }
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    /// How many times `call` has been made.
    #[must_use]
    pub fn call_count(&self, call: &Call) -> usize {
        self.inner.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Record `call`, wait if it is held, then fail if it is rejected.
    async fn enter(&self, call: Call) -> Result<(), ServiceError> {
        let gate = {
            let mut inner = self.inner.lock();
            inner.calls.push(call.clone());
            inner.holds.get(&call).cloned()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.inner.lock().rejections.get(&call) {
            Some(reason) => Err(ServiceError::Rejected(reason.clone())),
            None => Ok(()),
        }
    }
}

impl IdentityService for InMemoryBackend {
    async fn caller_identity(&self) -> Result<Identity, ServiceError> {
        self.enter(Call::CallerIdentity).await?;
        Ok(self.inner.lock().identity.clone())
    }
}

impl RoomService for InMemoryBackend {
    async fn rooms_by_post(&self, post_id: &PostId) -> Result<Vec<Room>, ServiceError> {
        self.enter(Call::RoomsByPost(post_id.clone())).await?;
        Ok(self
            .inner
            .lock()
            .rooms
            .iter()
            .filter(|r| &r.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn create_private_room(
        &self,
        user_id: &Identity,
        post_id: &PostId,
    ) -> Result<RoomId, ServiceError> {
        self.enter(Call::CreatePrivateRoom {
            user_id: user_id.clone(),
            post_id: post_id.clone(),
        })
        .await?;

        let mut inner = self.inner.lock();
        let caller = inner.identity.clone();
        if let Some(room) = inner
            .rooms
            .iter()
            .find(|r| r.is_private_for(&caller, user_id, post_id))
        {
            return Ok(room.room_id.clone());
        }

        let room_id = inner
            .assigned
            .get(&(user_id.clone(), post_id.clone()))
            .cloned()
            .unwrap_or_else(RoomId::generate);
        inner.rooms.push(Room::private(
            room_id.clone(),
            caller,
            user_id.clone(),
            post_id.clone(),
        ));
        Ok(room_id)
    }
}

impl MessageService for InMemoryBackend {
    async fn messages_by_room(&self, room_id: &RoomId) -> Result<Vec<Message>, ServiceError> {
        self.enter(Call::MessagesByRoom(room_id.clone())).await?;
        Ok(self
            .inner
            .lock()
            .history
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn messages_by_room_and_user(
        &self,
        room_id: &RoomId,
        user_id: &Identity,
    ) -> Result<Vec<Message>, ServiceError> {
        self.enter(Call::MessagesByRoomAndUser {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
        })
        .await?;
        Ok(self
            .inner
            .lock()
            .history
            .get(room_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| &m.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
