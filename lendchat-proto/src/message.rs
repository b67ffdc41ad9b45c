//! Chat message types shared by the client and the gateway.
//!
//! Field names on the wire follow the chat form: `room_id`, `message`,
//! `created_at`, `user_id` and `username`.

use serde::{Deserialize, Serialize};

/// Maximum allowed message body size in bytes (64 KB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns `true` if the identifier is empty.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// The authenticated principal of a caller, in its textual form.
    Identity
);

string_id!(
    /// Identifies a chat room.
    RoomId
);

string_id!(
    /// Identifies the loan post a room was opened for.
    PostId
);

impl RoomId {
    /// Generates a fresh, time-ordered room identifier (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Identity of the sender.
    pub user_id: Identity,
    /// Display name of the sender.
    pub username: String,
    /// Body text.
    #[serde(rename = "message")]
    pub body: String,
    /// When the message was created.
    pub created_at: Timestamp,
}

/// Reasons a message can be rejected before it is sent or relayed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The message is not addressed to any room.
    #[error("message has no room")]
    MissingRoom,

    /// The body is empty or only whitespace.
    #[error("message body is empty")]
    EmptyBody,

    /// The body exceeds [`MAX_MESSAGE_SIZE`].
    #[error("message body too large: {size} bytes (max {max} bytes)")]
    TooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

impl Message {
    /// Checks that the message can be transmitted.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the room id is empty, the body is
    /// blank, or the body exceeds [`MAX_MESSAGE_SIZE`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.room_id.is_empty() {
            return Err(ValidationError::MissingRoom);
        }
        if self.body.trim().is_empty() {
            return Err(ValidationError::EmptyBody);
        }
        if self.body.len() > MAX_MESSAGE_SIZE {
            return Err(ValidationError::TooLarge {
                size: self.body.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(())
    }
}
