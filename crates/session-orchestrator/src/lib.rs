//! Telecare Session Orchestrator
//!
//! This library decides, under concurrency and network unreliability, whether
//! a consultation (instant text session, audio call, or video call) is live,
//! tracks its elapsed/remaining time, and drives the caller/callee through
//! connect-ringing-accept/reject-timeout-end transitions.
//!
//! # Architecture
//!
//! The orchestrator uses an actor hierarchy; every entity serializes its own
//! events through one mailbox, so timer expiries, signaling events, and UI
//! intents cannot interleave mid-transition:
//!
//! ```text
//! OrchestratorActor (one per signaling connection)
//! ├── owns the SignalingChannel (sole writer)
//! ├── supervises N InstantSessionActors (one per chat session)
//! │   └── arms the response window on the patient's first message
//! └── supervises N CallActors (one per call attempt)
//!     └── drives Initializing -> Connecting -> Connected -> terminal
//! ```
//!
//! Presentation layers talk only to [`OrchestratorHandle`]: they issue
//! intents ([`Intent`]) and observe read-only state snapshots through
//! `tokio::sync::watch` receivers. They never mutate orchestrator state
//! directly.
//!
//! # Timers
//!
//! All countdowns ([`window::ResponseWindow`]) are hard deadlines computed
//! from the instant they were armed, never decremented counters, so a
//! delayed wake-up still expires at the right wall-clock moment. Cancellation
//! invalidates the window's generation before returning; a stale expiry
//! message already in flight is discarded.
//!
//! # Modules
//!
//! - [`actors`] - the orchestrator facade, call coordinator, and instant
//!   session tracker
//! - [`signaling`] - wire event/command types and the channel abstraction
//! - [`window`] - the response-window countdown primitive
//! - [`config`] - orchestrator configuration from environment
//! - [`errors`] - typed error taxonomy

pub mod actors;
pub mod config;
pub mod errors;
pub mod signaling;
pub mod window;

pub use actors::messages::{
    CallAttempt, CallSnapshot, CallSpec, CallState, Dispatched, EndReason, InstantSessionWindow,
    Intent, Notification, SessionSpec, WindowSnapshot, WindowState,
};
pub use actors::orchestrator::{Orchestrator, OrchestratorHandle};
pub use config::OrchestratorConfig;
pub use errors::{OrchestratorError, SetupError};
