//! Message types for actor communication, plus the snapshot and intent types
//! exposed to presentation layers.
//!
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.
//! Snapshots are serializable so UI layers can forward them unchanged.

use chrono::{DateTime, Utc};
use common::types::{AppointmentId, CallDirection, CallId, CallKind, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::errors::OrchestratorError;
use crate::signaling::SignalingEvent;

// ============================================================================
// Public state types
// ============================================================================

/// State of an instant-session response window.
///
/// `Activated` and `Expired` are terminal and mutually exclusive: exactly one
/// of them is reachable per window instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    /// No patient message observed yet.
    Idle,
    /// Patient sent their first message; the response window is counting down.
    Armed,
    /// The doctor responded in time.
    Activated,
    /// The window lapsed before a doctor response.
    Expired,
}

impl WindowState {
    /// Whether this state has no outgoing transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Activated | Self::Expired)
    }
}

/// State of a call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Local setup in progress.
    Initializing,
    /// Invite sent (outgoing) or received (incoming); ringing.
    Connecting,
    /// Both sides accepted.
    Connected,
    /// Terminal; see [`EndReason`].
    Ended,
    /// Terminal: the peer (or the local user) rejected while ringing.
    Rejected,
    /// Terminal: nobody answered within the ring timeout.
    TimedOut,
}

impl CallState {
    /// Whether this state has no outgoing transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Rejected | Self::TimedOut)
    }
}

/// Why a call reached [`CallState::Ended`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    RemoteHangup,
    LocalHangup,
    Rejected,
    Timeout,
    Error,
}

/// Read-only snapshot of an instant-session window, published on every state
/// change and whenever the armed remaining value changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub state: WindowState,
    /// Whole seconds left in the response window; zero unless `Armed`.
    pub remaining_secs: u64,
}

impl WindowSnapshot {
    pub(crate) fn idle() -> Self {
        Self {
            state: WindowState::Idle,
            remaining_secs: 0,
        }
    }
}

/// Read-only snapshot of a call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub state: CallState,
    /// Whole seconds left before the ring timeout; zero outside `Connecting`.
    pub remaining_secs: u64,
    /// Whole seconds since the call connected; zero before `Connected`.
    pub connected_secs: u64,
    /// Set only in `Ended`; `Rejected` and `TimedOut` are their own states.
    pub end_reason: Option<EndReason>,
}

impl CallSnapshot {
    pub(crate) fn initializing() -> Self {
        Self {
            state: CallState::Initializing,
            remaining_secs: 0,
            connected_secs: 0,
            end_reason: None,
        }
    }
}

/// Full record of a call attempt, for detail views and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallAttempt {
    pub id: CallId,
    pub kind: CallKind,
    pub direction: CallDirection,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    /// Set exactly once, on the transition into `Connected`.
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

/// Full record of an instant-session window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantSessionWindow {
    pub session_id: SessionId,
    pub appointment_id: AppointmentId,
    pub patient_id: UserId,
    pub doctor_id: UserId,
    pub state: WindowState,
    /// Set once, on the tracked patient's first message.
    pub patient_first_message_at: Option<DateTime<Utc>>,
    /// Set once, on the first doctor response while armed.
    pub doctor_responded_at: Option<DateTime<Utc>>,
    /// Set on the transition into `Activated`.
    pub activated_at: Option<DateTime<Utc>>,
    /// Derived: first message time plus the configured window.
    pub expires_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Public request types
// ============================================================================

/// Everything needed to track one chat session's activation window.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub session_id: SessionId,
    pub appointment_id: AppointmentId,
    pub patient_id: UserId,
    pub doctor_id: UserId,
    /// Resume an already-running window from a server-supplied remaining
    /// time (post-reconnect rehydration). Arms immediately when set.
    pub resume_remaining: Option<Duration>,
}

/// Parameters for an outgoing call attempt.
#[derive(Debug, Clone, Copy)]
pub struct CallSpec {
    pub kind: CallKind,
    /// Whether local media capture is ready. Checked synchronously; a call
    /// never starts without it.
    pub media_ready: bool,
}

/// A UI-originated intent, routed to the owning state machine.
#[derive(Debug, Clone)]
pub enum Intent {
    /// The local user sent a chat message in a session. The orchestrator
    /// only observes this for the activation window; delivery belongs to
    /// the chat transport.
    SendMessage { session_id: SessionId },
    /// Accept an incoming call.
    AcceptCall { call_id: CallId },
    /// Reject an incoming call.
    RejectCall { call_id: CallId },
    /// Hang up a call.
    HangupCall { call_id: CallId },
}

/// Outcome of a dispatched intent.
///
/// Intents against terminal or mismatched states are absorbed, reported as
/// `Ignored` (a non-fatal warning), never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Applied,
    Ignored,
}

/// Side-signals for the external notification dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    SessionActivated { session_id: SessionId },
    SessionExpired { session_id: SessionId },
    IncomingCall { call_id: CallId, kind: CallKind },
    CallTimedOut { call_id: CallId },
}

// ============================================================================
// Actor messages
// ============================================================================

/// Messages sent to an `InstantSessionActor`.
#[derive(Debug)]
pub(crate) enum SessionMessage {
    /// A chat message was observed (local echo or channel delivery).
    MessageObserved {
        sender_id: UserId,
        sent_at: DateTime<Utc>,
    },

    /// The response window's deadline passed.
    WindowElapsed { generation: u64 },

    /// Force the tracker back to `Idle`, cancelling any running window.
    Reset {
        respond_to: oneshot::Sender<()>,
    },

    /// Get the full window record.
    GetWindow {
        respond_to: oneshot::Sender<InstantSessionWindow>,
    },
}

/// Messages sent to a `CallActor`.
#[derive(Debug)]
pub(crate) enum CallMessage {
    /// Local user accepts the incoming call.
    Accept {
        respond_to: oneshot::Sender<Dispatched>,
    },

    /// Local user rejects the incoming call.
    Reject {
        respond_to: oneshot::Sender<Dispatched>,
    },

    /// Local user hangs up.
    Hangup {
        respond_to: oneshot::Sender<Dispatched>,
    },

    /// A signaling event addressed to this call.
    Peer(SignalingEvent),

    /// The ring window's deadline passed.
    RingElapsed { generation: u64 },

    /// The transport-loss grace period lapsed.
    GraceElapsed { generation: u64 },

    /// The transport dropped; the channel layer is retrying.
    TransportLost,

    /// The transport came back within the grace period.
    TransportRestored,

    /// The transport is gone for good; degrade immediately.
    TransportFailed,

    /// Get the full attempt record.
    GetAttempt {
        respond_to: oneshot::Sender<CallAttempt>,
    },
}

/// Messages sent to the `OrchestratorActor`.
pub(crate) enum FacadeMessage {
    OpenSession {
        spec: SessionSpec,
        respond_to: oneshot::Sender<tokio::sync::watch::Receiver<WindowSnapshot>>,
    },

    CloseSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<(), OrchestratorError>>,
    },

    ResetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<(), OrchestratorError>>,
    },

    SessionWindowInfo {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<InstantSessionWindow, OrchestratorError>>,
    },

    StartCall {
        spec: CallSpec,
        respond_to: oneshot::Sender<
            Result<(CallId, tokio::sync::watch::Receiver<CallSnapshot>), OrchestratorError>,
        >,
    },

    /// Dispose a terminal call attempt, retiring its ID.
    ReleaseCall {
        call_id: CallId,
        respond_to: oneshot::Sender<Result<(), OrchestratorError>>,
    },

    CallAttemptInfo {
        call_id: CallId,
        respond_to: oneshot::Sender<Result<CallAttempt, OrchestratorError>>,
    },

    Dispatch {
        intent: Intent,
        respond_to: oneshot::Sender<Result<Dispatched, OrchestratorError>>,
    },

    SubscribeCall {
        call_id: CallId,
        respond_to: oneshot::Sender<
            Result<tokio::sync::watch::Receiver<CallSnapshot>, OrchestratorError>,
        >,
    },

    SubscribeSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<
            Result<tokio::sync::watch::Receiver<WindowSnapshot>, OrchestratorError>,
        >,
    },

    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}
