// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the chat session lifecycle.
//!
//! Drives a `ChatSession` through the public API with the loopback transport
//! and the in-memory services:
//! - opening is idempotent while connecting and never reconnects
//! - sending is a no-op unless the connection is open
//! - `open_chat` switches to the created room and loads it exactly once
//! - a transport error after open leaves sending harmless

use std::sync::Arc;

use lendchat::services::memory::{Call, InMemoryBackend};
use lendchat::session::{
    ChatSession, ConnectionState, CurrentUser, FetchOutcome, Notice, SendOutcome, SessionConfig,
    SessionUpdate,
};
use lendchat::transport::loopback::{LoopbackConnector, LoopbackRemote};
use lendchat_proto::message::{Identity, Message, PostId, RoomId, Timestamp};
use tokio::sync::mpsc;

type Session = ChatSession<LoopbackConnector, InMemoryBackend, InMemoryBackend, InMemoryBackend>;

fn setup() -> (Arc<Session>, LoopbackRemote, InMemoryBackend, mpsc::Receiver<Notice>) {
    let (connector, remote) = LoopbackConnector::pair();
    let backend = InMemoryBackend::new("user-1");
    let (session, notices) = ChatSession::new(
        connector,
        backend.clone(),
        backend.clone(),
        backend.clone(),
        SessionConfig::default(),
    );
    session.set_current_user(Some(CurrentUser {
        identity: Identity::new("user-1"),
        username: "Uma".into(),
    }));
    (Arc::new(session), remote, backend, notices)
}

fn inbound(room: &str, body: &str) -> Message {
    Message {
        room_id: RoomId::new(room),
        user_id: Identity::new("user-42"),
        username: "Quinn".into(),
        body: body.into(),
        created_at: Timestamp::from_millis(1_700_000_000_000),
    }
}

#[tokio::test]
async fn full_lifecycle_uninitialized_to_closed() {
    let (session, remote, _backend, _notices) = setup();
    remote.set_auto_open(false);
    assert_eq!(session.connection_state(), ConnectionState::Uninitialized);

    session.open().await;
    assert_eq!(session.connection_state(), ConnectionState::Connecting);

    remote.open();
    assert_eq!(session.drain_events(), vec![SessionUpdate::Opened]);
    assert_eq!(session.connection_state(), ConnectionState::Open);

    remote.close();
    assert_eq!(session.drain_events(), vec![SessionUpdate::Closed]);
    assert_eq!(session.connection_state(), ConnectionState::Closed);

    session.open().await;
    assert_eq!(session.connection_state(), ConnectionState::Closed);
    assert_eq!(remote.connect_attempts(), 1);
}

#[tokio::test]
async fn double_open_while_connecting_creates_one_connection() {
    let (session, remote, _backend, _notices) = setup();
    remote.set_auto_open(false);

    session.open().await;
    session.open().await;

    assert_eq!(remote.connect_attempts(), 1);
    assert_eq!(session.connection_state(), ConnectionState::Connecting);
}

#[tokio::test]
async fn send_while_not_open_never_transmits() {
    let (session, remote, _backend, _notices) = setup();
    remote.set_auto_open(false);
    session.update_form(|f| f.room_id = RoomId::new("room-1"));
    session.set_body("are you there?");

    assert_eq!(session.send_message().await, SendOutcome::NotOpen);
    session.open().await;
    assert_eq!(session.send_message().await, SendOutcome::NotOpen);
    remote.close();
    session.drain_events();
    assert_eq!(session.send_message().await, SendOutcome::NotOpen);

    assert!(remote.sent().is_empty());
}

#[tokio::test]
async fn open_chat_uses_created_room_and_fetches_once() {
    let (session, _remote, backend, _notices) = setup();
    let (user, post) = (Identity::new("user-42"), PostId::new("post-7"));
    let room_99 = RoomId::new("room-99");
    backend.assign_room(&user, &post, &room_99);
    backend.set_history(&room_99, vec![inbound("room-99", "earlier")]);
    session.update_form(|f| f.room_id = RoomId::new("room-1"));

    let room = session.open_chat(&user, &post).await.unwrap();

    assert_eq!(room, room_99);
    assert_eq!(session.form().room_id, room_99);
    assert_eq!(backend.call_count(&Call::MessagesByRoom(room_99.clone())), 1);
    assert_eq!(session.messages(), vec![inbound("room-99", "earlier")]);

    // A follow-up explicit load reads the same room.
    let outcome = session.get_messages(&session.form().room_id).await;
    assert_eq!(outcome, FetchOutcome::Applied(1));
    assert_eq!(backend.call_count(&Call::MessagesByRoom(room_99)), 2);
}

#[tokio::test]
async fn error_after_open_makes_send_a_harmless_noop() {
    let (session, remote, _backend, _notices) = setup();
    session.open().await;
    session.drain_events();
    session.update_form(|f| f.room_id = RoomId::new("room-1"));

    remote.fail("socket error");
    assert_eq!(
        session.drain_events(),
        vec![SessionUpdate::Failed("socket error".into())]
    );
    session.set_body("still there?");

    assert_eq!(session.send_message().await, SendOutcome::NotOpen);
    assert!(remote.sent().is_empty());
    assert_eq!(session.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn conversation_round_trip_with_notices() {
    let (session, remote, backend, mut notices) = setup();
    let (user, post) = (Identity::new("user-42"), PostId::new("post-7"));
    backend.assign_room(&user, &post, &RoomId::new("room-99"));

    session.open().await;
    session.drain_events();
    let room = session.open_chat(&user, &post).await.unwrap();

    session.set_body("hello");
    assert_eq!(session.send_message().await, SendOutcome::Sent);
    assert_eq!(remote.sent()[0].room_id, room);
    assert_eq!(remote.sent()[0].username, "Uma");

    remote.deliver(inbound("room-99", "hi back"));
    session.drain_events();
    assert_eq!(session.messages()[0].body, "hi back");

    backend.reject(Call::MessagesByRoom(room.clone()), "unavailable");
    assert_eq!(session.get_messages(&room).await, FetchOutcome::Failed);
    let mut seen = Vec::new();
    while let Ok(n) = notices.try_recv() {
        seen.push(n);
    }
    assert!(matches!(seen.as_slice(), [Notice::Loading(_), Notice::Error(_)]));
    // The failed fetch leaves the list alone.
    assert_eq!(session.messages()[0].body, "hi back");
}
