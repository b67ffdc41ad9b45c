// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! End-to-end chat through an in-process gateway.
//!
//! Two `ChatSession`s, each with its own WebSocket chat connection and a
//! `GatewayServices` service connection, open the private room for a post
//! and exchange messages through the gateway.

use std::sync::Arc;
use std::time::Duration;

use lendchat::services::remote::GatewayServices;
use lendchat::session::{
    ChatSession, ConnectionState, CurrentUser, FetchOutcome, SendOutcome, SessionConfig,
    SessionUpdate,
};
use lendchat::transport::websocket::WsConnector;
use lendchat_gateway::gateway::{start_server, start_server_with_state, GatewayState};
use lendchat_proto::message::{Identity, PostId, RoomId};

type Services = Arc<GatewayServices>;
type Session = ChatSession<WsConnector, Services, Services, Services>;

const WAIT: Duration = Duration::from_secs(5);

/// Connect a session as `identity` and wait until the chat connection opens.
async fn connected_session(url: &str, identity: &str, username: &str) -> Session {
    let services = Arc::new(
        GatewayServices::connect(url, &Identity::new(identity))
            .await
            .unwrap(),
    );
    let (session, _notices) = ChatSession::new(
        WsConnector::new(url),
        Arc::clone(&services),
        Arc::clone(&services),
        services,
        SessionConfig::default(),
    );
    session.set_current_user(Some(CurrentUser {
        identity: Identity::new(identity),
        username: username.into(),
    }));

    session.open().await;
    let update = tokio::time::timeout(WAIT, session.process_next_event())
        .await
        .expect("timed out waiting for open");
    assert_eq!(update, Some(SessionUpdate::Opened));
    assert_eq!(session.connection_state(), ConnectionState::Open);
    session
}

/// Wait for the next inbound chat message, skipping other updates.
async fn next_message_body(session: &Session) -> String {
    tokio::time::timeout(WAIT, async {
        loop {
            match session.process_next_event().await {
                Some(SessionUpdate::MessageReceived(m)) => return m.body,
                Some(_) => {}
                None => panic!("event queue closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for a message")
}

#[tokio::test]
async fn lender_and_borrower_chat_about_a_post() {
    let (addr, _handle) = start_server("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{addr}/ws");
    let post = PostId::new("post-7");

    let lender = connected_session(&url, "lender-1", "Lena").await;
    let borrower = connected_session(&url, "borrower-9", "Bo").await;

    let room = lender
        .open_chat(&Identity::new("borrower-9"), &post)
        .await
        .unwrap();
    let same_room = borrower
        .open_chat(&Identity::new("lender-1"), &post)
        .await
        .unwrap();
    assert_eq!(room, same_room);
    assert!(lender.messages().is_empty());

    lender.set_body("is the loan still open?");
    assert_eq!(lender.send_message().await, SendOutcome::Sent);
    assert!(lender.form().body.is_empty());

    assert_eq!(next_message_body(&borrower).await, "is the loan still open?");
    // The sender receives its own message back.
    assert_eq!(next_message_body(&lender).await, "is the loan still open?");

    borrower.set_body("yes, until Friday");
    assert_eq!(borrower.send_message().await, SendOutcome::Sent);
    assert_eq!(next_message_body(&lender).await, "yes, until Friday");

    let bodies: Vec<_> = lender.messages().into_iter().map(|m| m.body).collect();
    assert_eq!(bodies, ["yes, until Friday", "is the loan still open?"]);

    // A fresh fetch returns the stored history newest first.
    assert_eq!(borrower.get_messages(&room).await, FetchOutcome::Applied(2));
    assert_eq!(borrower.messages()[0].username, "Bo");
    assert_eq!(borrower.messages()[1].user_id, Identity::new("lender-1"));
}

#[tokio::test]
async fn outsider_cannot_read_a_private_room() {
    let (addr, _handle) = start_server("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{addr}/ws");

    let lender = connected_session(&url, "lender-1", "Lena").await;
    let room = lender
        .open_chat(&Identity::new("borrower-9"), &PostId::new("post-7"))
        .await
        .unwrap();

    let outsider = connected_session(&url, "mallory", "Mal").await;
    assert_eq!(outsider.get_messages(&room).await, FetchOutcome::Failed);
    assert_eq!(
        outsider.get_messages(&RoomId::new("no-such-room")).await,
        FetchOutcome::Failed
    );
}

#[tokio::test]
async fn gateway_shutdown_closes_the_session() {
    let state = Arc::new(GatewayState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    let url = format!("ws://{addr}/ws");

    let lender = connected_session(&url, "lender-1", "Lena").await;
    lender
        .open_chat(&Identity::new("borrower-9"), &PostId::new("post-7"))
        .await
        .unwrap();

    state.close_all_connections().await;
    let update = tokio::time::timeout(WAIT, lender.process_next_event())
        .await
        .expect("timed out waiting for close");
    assert!(matches!(
        update,
        Some(SessionUpdate::Closed | SessionUpdate::Failed(_))
    ));
    assert_eq!(lender.connection_state(), ConnectionState::Closed);

    lender.set_body("anyone?");
    assert_eq!(lender.send_message().await, SendOutcome::NotOpen);

    // No reconnect after an established connection closed.
    lender.open().await;
    assert_eq!(lender.connection_state(), ConnectionState::Closed);
}
