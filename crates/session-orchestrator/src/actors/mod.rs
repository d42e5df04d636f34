//! Actor model implementation.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`, with `tokio::sync::oneshot` for request-reply and
//! `tokio::sync::watch` for state-snapshot publication. Cancellation flows
//! through a `CancellationToken` hierarchy rooted at the facade.

/// Typed messages, intents, snapshots, and notifications
pub mod messages;

/// Per-call-attempt lifecycle coordinator
pub mod call;

/// Per-session instant-activation tracker
pub mod instant_session;

/// The orchestrator facade presentation layers talk to
pub mod orchestrator;
