//! Loopback transport for testing.
//!
//! [`LoopbackConnector::pair`] returns a connector and a [`LoopbackRemote`]
//! controller sharing the same state. The remote plays the part of the
//! gateway: it scripts open/close/error/message events onto the session's
//! event channel and records every message the session transmits.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use lendchat_proto::message::{Identity, Message};

use super::{Connection, Connector, ReadyState, TransportError, TransportEvent};

struct Inner {
    /// Event channel of the most recent connection.
    events: Option<mpsc::Sender<TransportEvent>>,
    state: ReadyState,
    /// Messages transmitted through any connection, oldest first.
    sent: Vec<Message>,
    /// Identities passed to `connect`, in call order.
    connects: Vec<Identity>,
    refuse: Option<String>,
    fail_sends: bool,
    auto_open: bool,
    hold: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    release: Notify,
}

/// In-process [`Connector`] whose connections are driven by a [`LoopbackRemote`].
#[derive(Clone)]
pub struct LoopbackConnector {
    shared: Arc<Shared>,
}

/// Test-side controller for connections made through a [`LoopbackConnector`].
#[derive(Clone)]
pub struct LoopbackRemote {
    shared: Arc<Shared>,
}

/// Connection produced by [`LoopbackConnector`].
pub struct LoopbackConnection {
    shared: Arc<Shared>,
}

impl LoopbackConnector {
    /// Create a connector and its controlling remote.
    ///
    /// By default connections open immediately (an `Open` event is emitted
    /// during `connect`), like a gateway completing the handshake.
    #[must_use]
    pub fn pair() -> (Self, LoopbackRemote) {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                events: None,
                state: ReadyState::Closed,
                sent: Vec::new(),
                connects: Vec::new(),
                refuse: None,
                fail_sends: false,
                auto_open: true,
                hold: false,
            }),
            release: Notify::new(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            LoopbackRemote { shared },
        )
    }
}

impl Connector for LoopbackConnector {
    type Conn = LoopbackConnection;

    async fn connect(
        &self,
        identity: &Identity,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<LoopbackConnection, TransportError> {
        let hold = {
            let mut inner = self.shared.inner.lock();
            inner.connects.push(identity.clone());
            inner.state = ReadyState::Connecting;
            inner.hold
        };

        if hold {
            self.shared.release.notified().await;
        }

        let mut inner = self.shared.inner.lock();
        if let Some(reason) = inner.refuse.clone() {
            inner.state = ReadyState::Closed;
            return Err(TransportError::Rejected(reason));
        }
        if inner.auto_open {
            inner.state = ReadyState::Open;
            let _ = events.try_send(TransportEvent::Open);
        }
        inner.events = Some(events);
        drop(inner);

        Ok(LoopbackConnection {
            shared: Arc::clone(&self.shared),
        })
    }
}

impl Connection for LoopbackConnection {
    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let mut inner = self.shared.inner.lock();
        if inner.state != ReadyState::Open {
            return Err(TransportError::ConnectionClosed);
        }
        if inner.fail_sends {
            return Err(TransportError::Io(std::io::Error::other(
                "loopback send failure",
            )));
        }
        inner.sent.push(message.clone());
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.inner.lock().state
    }
}

impl LoopbackRemote {
    /// Complete the handshake: mark the connection open and emit `Open`.
    pub fn open(&self) -> bool {
        self.emit(ReadyState::Open, TransportEvent::Open)
    }

    /// Close the connection and emit `Close`.
    pub fn close(&self) -> bool {
        self.emit(ReadyState::Closed, TransportEvent::Close)
    }

    /// Fail the connection and emit `Error`.
    pub fn fail(&self, reason: &str) -> bool {
        self.emit(ReadyState::Closed, TransportEvent::Error(reason.to_string()))
    }

    /// Deliver an inbound message. Returns `false` if the event queue is full
    /// or no connection exists.
    pub fn deliver(&self, message: Message) -> bool {
        let inner = self.shared.inner.lock();
        inner
            .events
            .as_ref()
            .is_some_and(|tx| tx.try_send(TransportEvent::Message(message)).is_ok())
    }

    /// Make subsequent connection attempts fail with `reason`.
    pub fn refuse_connections(&self, reason: &str) {
        self.shared.inner.lock().refuse = Some(reason.to_string());
    }

    /// Let subsequent connection attempts succeed again.
    pub fn accept_connections(&self) {
        self.shared.inner.lock().refuse = None;
    }

    /// Make sends on open connections fail with an I/O error.
    pub fn fail_sends(&self, fail: bool) {
        self.shared.inner.lock().fail_sends = fail;
    }

    /// Control whether `connect` emits `Open` by itself.
    pub fn set_auto_open(&self, auto_open: bool) {
        self.shared.inner.lock().auto_open = auto_open;
    }

    /// Keep subsequent `connect` calls pending until [`release`](Self::release).
    pub fn hold_connections(&self) {
        self.shared.inner.lock().hold = true;
    }

    /// Let one held `connect` call proceed.
    pub fn release(&self) {
        self.shared.inner.lock().hold = false;
        self.shared.release.notify_one();
    }

    /// Messages transmitted so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<Message> {
        self.shared.inner.lock().sent.clone()
    }

    /// Number of `connect` calls made through the connector.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.shared.inner.lock().connects.len()
    }

    /// Identities used for each `connect` call.
    #[must_use]
    pub fn connected_identities(&self) -> Vec<Identity> {
        self.shared.inner.lock().connects.clone()
    }

    /// State the remote currently reports to the connection.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.shared.inner.lock().state
    }

    fn emit(&self, state: ReadyState, event: TransportEvent) -> bool {
        let mut inner = self.shared.inner.lock();
        inner.state = state;
        inner
            .events
            .as_ref()
            .is_some_and(|tx| tx.try_send(event).is_ok())
    }
}
