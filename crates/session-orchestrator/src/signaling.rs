//! Signaling channel abstraction and wire types.
//!
//! The signaling channel is an external collaborator: a persistent
//! bidirectional event channel to the signaling server (a WebSocket in the
//! production transport). This module defines the event/command vocabulary
//! the orchestrator consumes and emits, plus the traits a transport
//! implements. The orchestrator facade is the channel's sole writer; entity
//! actors queue commands upward and never touch the transport.
//!
//! The [`mock`] module provides an in-memory transport for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::credentials::Credentials;
use common::types::{CallId, CallKind, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::errors::OrchestratorError;

/// Inbound events from the signaling server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingEvent {
    /// The remote peer's device is ringing. For a call ID the orchestrator
    /// does not know, this is an incoming invite.
    PeerRinging { call_id: CallId, kind: CallKind },

    /// The remote peer accepted the call.
    PeerAccepted { call_id: CallId },

    /// The remote peer rejected the call.
    PeerRejected { call_id: CallId },

    /// The remote peer hung up.
    PeerHangup {
        call_id: CallId,
        reason: Option<String>,
    },

    /// A chat message was delivered to a session.
    MessageReceived {
        session_id: SessionId,
        sender_id: UserId,
        sent_at: DateTime<Utc>,
    },
}

/// Outbound commands to the signaling server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingCommand {
    /// Invite the remote peer to a call.
    Invite { call_id: CallId, kind: CallKind },

    /// Accept an incoming call.
    Accept { call_id: CallId },

    /// Reject an incoming call.
    Reject { call_id: CallId },

    /// Hang up a call.
    Hangup { call_id: CallId },
}

/// Events delivered on the channel's event stream.
///
/// `Down`/`Up` are synthesized by the channel layer around its own
/// reconnection attempts; they never come from the server. If the channel
/// layer gives up entirely it closes the stream instead.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A server-originated signaling event.
    Signal(SignalingEvent),

    /// The transport dropped; the channel layer is retrying with backoff.
    Down,

    /// The transport came back before the channel layer gave up.
    Up,
}

/// Write half of an established signaling channel.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send a command to the signaling server.
    async fn send(&self, command: SignalingCommand) -> Result<(), OrchestratorError>;

    /// Close the channel. Idempotent.
    async fn close(&self);
}

/// An established channel: the write half plus the inbound event stream.
pub struct ChannelParts {
    /// Write half, owned by the orchestrator facade.
    pub channel: Arc<dyn SignalingChannel>,
    /// Inbound events. Stream closure means the channel layer gave up
    /// reconnecting; the loss is unrecoverable.
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Connects a signaling channel (enables mocking).
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Establish the channel, returning once it is ready.
    ///
    /// # Errors
    ///
    /// `OrchestratorError::Connection` if the server is unreachable after
    /// the channel layer's own retries.
    async fn connect(&self, credentials: &Credentials)
        -> Result<ChannelParts, OrchestratorError>;
}

/// Mock signaling transport for testing.
///
/// [`mock::MockConnector::new`] returns a connector to hand to the
/// orchestrator and a [`mock::MockRemote`] the test keeps: the remote can
/// inject inbound events, simulate transport loss, and inspect every command
/// the orchestrator wrote.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    const MOCK_EVENT_BUFFER: usize = 64;

    struct MockShared {
        commands: Mutex<Vec<SignalingCommand>>,
        event_tx: Mutex<Option<mpsc::Sender<ChannelEvent>>>,
    }

    /// Lock a mutex, recovering from poison (mock state is plain data).
    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Connector handed to `Orchestrator::connect`.
    pub struct MockConnector {
        shared: Arc<MockShared>,
        fail_connect: bool,
    }

    /// The test's view of the remote side.
    #[derive(Clone)]
    pub struct MockRemote {
        shared: Arc<MockShared>,
    }

    impl MockConnector {
        /// Create a connector/remote pair.
        #[must_use]
        pub fn new() -> (Self, MockRemote) {
            let shared = Arc::new(MockShared {
                commands: Mutex::new(Vec::new()),
                event_tx: Mutex::new(None),
            });
            (
                Self {
                    shared: Arc::clone(&shared),
                    fail_connect: false,
                },
                MockRemote { shared },
            )
        }

        /// Create a connector whose `connect` always fails.
        #[must_use]
        pub fn failing() -> Self {
            let shared = Arc::new(MockShared {
                commands: Mutex::new(Vec::new()),
                event_tx: Mutex::new(None),
            });
            Self {
                shared,
                fail_connect: true,
            }
        }
    }

    impl MockRemote {
        /// Inject a server-originated signaling event.
        pub async fn emit(&self, event: SignalingEvent) {
            self.emit_raw(ChannelEvent::Signal(event)).await;
        }

        /// Inject a transport-down notice (channel layer still retrying).
        pub async fn transport_down(&self) {
            self.emit_raw(ChannelEvent::Down).await;
        }

        /// Inject a transport-restored notice.
        pub async fn transport_up(&self) {
            self.emit_raw(ChannelEvent::Up).await;
        }

        /// Close the event stream: the channel layer gave up for good.
        pub fn fail_permanently(&self) {
            lock(&self.shared.event_tx).take();
        }

        /// All commands the orchestrator has written, in order.
        #[must_use]
        pub fn commands(&self) -> Vec<SignalingCommand> {
            lock(&self.shared.commands).clone()
        }

        /// Count of a given command on the wire.
        #[must_use]
        pub fn count_of(&self, command: &SignalingCommand) -> usize {
            lock(&self.shared.commands)
                .iter()
                .filter(|c| *c == command)
                .count()
        }

        async fn emit_raw(&self, event: ChannelEvent) {
            let tx = lock(&self.shared.event_tx).clone();
            if let Some(tx) = tx {
                // Receiver dropped means the orchestrator disconnected;
                // the injected event is simply lost, like on a real wire.
                let _ = tx.send(event).await;
            }
        }
    }

    struct MockChannel {
        shared: Arc<MockShared>,
    }

    #[async_trait]
    impl SignalingChannel for MockChannel {
        async fn send(&self, command: SignalingCommand) -> Result<(), OrchestratorError> {
            lock(&self.shared.commands).push(command);
            Ok(())
        }

        async fn close(&self) {
            lock(&self.shared.event_tx).take();
        }
    }

    #[async_trait]
    impl SignalingConnector for MockConnector {
        async fn connect(
            &self,
            _credentials: &Credentials,
        ) -> Result<ChannelParts, OrchestratorError> {
            if self.fail_connect {
                return Err(OrchestratorError::Connection(
                    "mock connector refused the connection".to_string(),
                ));
            }
            let (tx, rx) = mpsc::channel(MOCK_EVENT_BUFFER);
            *lock(&self.shared.event_tx) = Some(tx);
            Ok(ChannelParts {
                channel: Arc::new(MockChannel {
                    shared: Arc::clone(&self.shared),
                }),
                events: rx,
            })
        }
    }
}
