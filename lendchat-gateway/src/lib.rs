//! `LendChat` gateway library.
//!
//! Exposes the gateway for use in tests and embedding. The gateway accepts
//! WebSocket connections authenticated by identity, relays chat messages
//! between the participants of a room, and answers room and message
//! service calls.

pub mod config;
pub mod gateway;
pub mod rooms;
pub mod store;
