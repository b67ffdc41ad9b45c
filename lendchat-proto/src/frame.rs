//! WebSocket frames exchanged between clients and the gateway.
//!
//! Frames are JSON documents carried in WebSocket text messages. Every
//! connection starts with [`ClientFrame::Hello`], answered by
//! [`ServerFrame::Welcome`]. A `Chat` channel then carries chat messages in
//! both directions; a `Service` channel carries request/response calls
//! correlated by `request_id`.

use serde::{Deserialize, Serialize};

use crate::message::{Identity, Message, PostId, RoomId};
use crate::room::Room;

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("frame serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Purpose of a connection, declared in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Real-time chat messages.
    Chat,
    /// Room and message service calls.
    Service,
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Handshake. Must be the first frame on every connection.
    Hello {
        /// Identity the connection is authenticated as.
        identity: Identity,
        /// What the connection will be used for.
        channel: Channel,
    },
    /// An outbound chat message.
    Chat {
        /// The message, as filled in on the chat form.
        message: Message,
    },
    /// A service request.
    Call {
        /// Correlates the eventual [`ServerFrame::Reply`].
        request_id: u64,
        /// The requested operation.
        call: ServiceCall,
    },
}

/// Frames sent by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake acknowledgment.
    Welcome {
        /// The identity the connection was registered under.
        identity: Identity,
    },
    /// An inbound chat message.
    Chat {
        /// The relayed message.
        message: Message,
    },
    /// Response to a [`ClientFrame::Call`].
    Reply {
        /// The `request_id` of the call being answered.
        request_id: u64,
        /// Outcome of the call.
        reply: ServiceReply,
    },
    /// The gateway rejected a frame.
    Error {
        /// Human-readable description.
        reason: String,
    },
}

/// Room and message service operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServiceCall {
    /// List the rooms opened for a post.
    RoomsByPost {
        /// The post to look up.
        post_id: PostId,
    },
    /// Create (or look up) the private room between the caller and `user_id`.
    CreatePrivateRoom {
        /// The other participant.
        user_id: Identity,
        /// The post the room is about.
        post_id: PostId,
    },
    /// List the messages of a room, newest first.
    MessagesByRoom {
        /// The room to read.
        room_id: RoomId,
    },
    /// List the messages one user sent in a room, newest first.
    MessagesByRoomAndUser {
        /// The room to read.
        room_id: RoomId,
        /// The sender to filter by.
        user_id: Identity,
    },
}

/// Outcome of a [`ServiceCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceReply {
    /// Rooms matching the query.
    Rooms {
        /// The rooms found.
        rooms: Vec<Room>,
    },
    /// The private room that was created or found.
    RoomCreated {
        /// The room identifier.
        room_id: RoomId,
    },
    /// Messages matching the query, newest first.
    Messages {
        /// The messages found.
        messages: Vec<Message>,
    },
    /// The service refused the call.
    Rejected {
        /// Human-readable description.
        reason: String,
    },
}

/// Encodes a client frame as a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the frame cannot be serialized.
pub fn encode_client(frame: &ClientFrame) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decodes a client frame from JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the text is not a valid frame.
pub fn decode_client(text: &str) -> Result<ClientFrame, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Encodes a server frame as a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the frame cannot be serialized.
pub fn encode_server(frame: &ServerFrame) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decodes a server frame from JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the text is not a valid frame.
pub fn decode_server(text: &str) -> Result<ServerFrame, CodecError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Timestamp;

    #[test]
    fn hello_uses_tagged_layout() {
        let frame = ClientFrame::Hello {
            identity: Identity::new("alice"),
            channel: Channel::Chat,
        };
        let text = encode_client(&frame).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "hello");
        assert_eq!(json["identity"], "alice");
        assert_eq!(json["channel"], "chat");
    }

    #[test]
    fn chat_frame_carries_form_fields() {
        let message = Message {
            room_id: RoomId::new("room-99"),
            user_id: Identity::new("alice"),
            username: "Alice".into(),
            body: "is the loan still open?".into(),
            created_at: Timestamp::from_millis(42),
        };
        let text = encode_server(&ServerFrame::Chat {
            message: message.clone(),
        })
        .unwrap();
        assert!(text.contains("\"message\":\"is the loan still open?\""));
        assert_eq!(decode_server(&text).unwrap(), ServerFrame::Chat { message });
    }

    #[test]
    fn call_and_reply_decode() {
        let text = r#"{"type":"call","request_id":7,"call":{"op":"create_private_room","user_id":"user-42","post_id":"post-7"}}"#;
        let frame = decode_client(text).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Call {
                request_id: 7,
                call: ServiceCall::CreatePrivateRoom {
                    user_id: Identity::new("user-42"),
                    post_id: PostId::new("post-7"),
                },
            }
        );

        let reply = r#"{"type":"reply","request_id":7,"reply":{"kind":"room_created","room_id":"room-99"}}"#;
        assert_eq!(
            decode_server(reply).unwrap(),
            ServerFrame::Reply {
                request_id: 7,
                reply: ServiceReply::RoomCreated {
                    room_id: RoomId::new("room-99"),
                },
            }
        );
    }

    #[test]
    fn malformed_text_fails() {
        assert!(decode_server("not json").is_err());
        assert!(decode_client(r#"{"type":"unknown"}"#).is_err());
    }
}
