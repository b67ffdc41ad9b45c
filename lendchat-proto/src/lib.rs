//! Shared data model and wire format for `LendChat`.

pub mod frame;
pub mod message;
pub mod room;
