// Test-specific lint overrides: proptest bodies use unwrap freely.
#![allow(clippy::unwrap_used, clippy::cast_possible_truncation)]

//! Property-based tests for the session message list.
//!
//! Uses proptest to verify that for any fetched history followed by any
//! sequence of inbound messages:
//! 1. The list length equals history plus events received.
//! 2. The newest event is always at index 0.
//! 3. Events appear in reverse arrival order ahead of the history.

use lendchat::services::memory::InMemoryBackend;
use lendchat::session::{ChatSession, SessionConfig};
use lendchat::transport::loopback::LoopbackConnector;
use lendchat_proto::message::{Identity, Message, RoomId, Timestamp};
use proptest::prelude::*;

fn message(room: &str, body: String, at: u64) -> Message {
    Message {
        room_id: RoomId::new(room),
        user_id: Identity::new("peer"),
        username: "Peer".into(),
        body,
        created_at: Timestamp::from_millis(at),
    }
}

/// Strategy for message bodies; duplicates are allowed on purpose.
fn arb_bodies(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{0,8}", 0..max)
}

proptest! {
    #[test]
    fn inbound_messages_are_prepended(history in arb_bodies(20), events in arb_bodies(64)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (connector, remote) = LoopbackConnector::pair();
            let backend = InMemoryBackend::new("me");
            let room = RoomId::new("room");
            let fetched: Vec<Message> = history
                .iter()
                .enumerate()
                .map(|(i, b)| message("room", b.clone(), i as u64))
                .collect();
            backend.set_history(&room, fetched.clone());

            let (session, _notices) = ChatSession::new(
                connector,
                backend.clone(),
                backend.clone(),
                backend,
                SessionConfig { event_buffer: 128, notice_buffer: 8 },
            );
            session.open().await;
            session.get_messages(&room).await;

            for (i, body) in events.iter().enumerate() {
                prop_assert!(remote.deliver(message("room", body.clone(), 1000 + i as u64)));
            }
            session.drain_events();

            let messages = session.messages();
            prop_assert_eq!(messages.len(), history.len() + events.len());
            if let Some(last) = events.last() {
                prop_assert_eq!(&messages[0].body, last);
            }

            let mut expected: Vec<String> = events.iter().rev().cloned().collect();
            expected.extend(history.iter().cloned());
            let actual: Vec<String> = messages.into_iter().map(|m| m.body).collect();
            prop_assert_eq!(actual, expected);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
