//! Transient user-visible notifications.

use std::fmt;

/// A notification the presentation layer shows briefly (a toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A message fetch started.
    Loading(String),
    /// A message fetch completed.
    Success(String),
    /// An operation failed.
    Error(String),
}

impl Notice {
    pub(crate) fn loading_messages() -> Self {
        Self::Loading("Loading messages".into())
    }

    pub(crate) fn messages_loaded() -> Self {
        Self::Success("Messages loaded successfully".into())
    }

    pub(crate) fn messages_failed() -> Self {
        Self::Error("Error loading messages".into())
    }

    pub(crate) fn send_failed() -> Self {
        Self::Error("Error sending message".into())
    }

    /// The text to show.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Loading(text) | Self::Success(text) | Self::Error(text) => text,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading(text) => write!(f, "... {text}"),
            Self::Success(text) => write!(f, "ok: {text}"),
            Self::Error(text) => write!(f, "error: {text}"),
        }
    }
}
