//! Room, message and identity services used by the chat session.
//!
//! Each service is a remote endpoint invoked like a function call. The
//! session only depends on these traits:
//! - [`memory::InMemoryBackend`]: scripted in-process backend for tests
//! - [`remote::GatewayServices`]: request/response calls over a gateway
//!   service connection

pub mod memory;
pub mod remote;

use std::future::Future;
use std::sync::Arc;

use lendchat_proto::frame::CodecError;
use lendchat_proto::message::{Identity, Message, PostId, RoomId};
use lendchat_proto::room::Room;

use crate::transport::TransportError;

/// Errors returned by service calls.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The service rejected the call.
    #[error("service rejected the call: {0}")]
    Rejected(String),

    /// The service connection failed.
    #[error("service transport error: {0}")]
    Transport(#[from] TransportError),

    /// A request or reply could not be encoded or decoded.
    #[error("service codec error: {0}")]
    Codec(#[from] CodecError),

    /// The service connection went away before the call was answered.
    #[error("service connection lost")]
    Disconnected,
}

/// Room lookup and creation.
pub trait RoomService: Send + Sync {
    /// Rooms opened for `post_id`.
    fn rooms_by_post(
        &self,
        post_id: &PostId,
    ) -> impl Future<Output = Result<Vec<Room>, ServiceError>> + Send;

    /// Create the private room between the caller and `user_id` for `post_id`.
    ///
    /// Returns the existing room if the pair already has one for that post.
    fn create_private_room(
        &self,
        user_id: &Identity,
        post_id: &PostId,
    ) -> impl Future<Output = Result<RoomId, ServiceError>> + Send;
}

/// Message history.
pub trait MessageService: Send + Sync {
    /// Messages of `room_id`, newest first.
    fn messages_by_room(
        &self,
        room_id: &RoomId,
    ) -> impl Future<Output = Result<Vec<Message>, ServiceError>> + Send;

    /// Messages `user_id` sent in `room_id`, newest first.
    fn messages_by_room_and_user(
        &self,
        room_id: &RoomId,
        user_id: &Identity,
    ) -> impl Future<Output = Result<Vec<Message>, ServiceError>> + Send;
}

/// The caller's authenticated principal.
pub trait IdentityService: Send + Sync {
    /// Identity used to authenticate the chat connection.
    fn caller_identity(&self) -> impl Future<Output = Result<Identity, ServiceError>> + Send;
}

impl<T: RoomService> RoomService for Arc<T> {
    fn rooms_by_post(
        &self,
        post_id: &PostId,
    ) -> impl Future<Output = Result<Vec<Room>, ServiceError>> + Send {
        (**self).rooms_by_post(post_id)
    }

    fn create_private_room(
        &self,
        user_id: &Identity,
        post_id: &PostId,
    ) -> impl Future<Output = Result<RoomId, ServiceError>> + Send {
        (**self).create_private_room(user_id, post_id)
    }
}

impl<T: MessageService> MessageService for Arc<T> {
    fn messages_by_room(
        &self,
        room_id: &RoomId,
    ) -> impl Future<Output = Result<Vec<Message>, ServiceError>> + Send {
        (**self).messages_by_room(room_id)
    }

    fn messages_by_room_and_user(
        &self,
        room_id: &RoomId,
        user_id: &Identity,
    ) -> impl Future<Output = Result<Vec<Message>, ServiceError>> + Send {
        (**self).messages_by_room_and_user(room_id, user_id)
    }
}

impl<T: IdentityService> IdentityService for Arc<T> {
    fn caller_identity(&self) -> impl Future<Output = Result<Identity, ServiceError>> + Send {
        (**self).caller_identity()
    }
}
