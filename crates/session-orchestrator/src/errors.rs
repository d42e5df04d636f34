//! Orchestrator error types.
//!
//! Timeouts are never errors here: a lapsed ring timeout or response window
//! resolves to a terminal *state* (`TimedOut` / `Expired`) that consumers
//! read from snapshots. Only precondition failures on synchronous entry
//! points (`start_call`, `connect`) surface as typed errors.

use common::types::{CallId, SessionId};
use thiserror::Error;

/// Local precondition failures checked before a call attempt starts.
///
/// These are not retried; the UI surfaces them as a blocking message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SetupError {
    /// Local media (microphone/camera) has not been acquired.
    #[error("local media is not ready")]
    MediaNotReady,

    /// A required session or user identifier is missing or empty.
    #[error("incomplete identifiers: {0}")]
    IncompleteIdentifiers(String),
}

/// Session orchestrator error type.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Local setup preconditions unmet (surfaced to the UI, not retried).
    #[error("setup failed: {0}")]
    Setup(#[from] SetupError),

    /// The signaling channel could not be established. The channel layer
    /// owns retry/backoff; this is what it reports when it gives up.
    #[error("signaling channel unreachable: {0}")]
    Connection(String),

    /// An event inconsistent with the current state. Logged and dropped
    /// inside the state machines; never crosses the facade boundary.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// No call attempt with this ID is registered.
    #[error("call not found: {0}")]
    CallNotFound(CallId),

    /// No instant-session tracker with this ID is registered.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The orchestrator has been disconnected; its mailbox is gone.
    #[error("orchestrator is disconnected")]
    ChannelClosed,

    /// Internal plumbing failure (mailbox or response channel dropped).
    #[error("internal error: {0}")]
    Internal(String),
}
