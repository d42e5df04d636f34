//! `CallActor` - per-call-attempt lifecycle coordinator.
//!
//! Drives one call attempt from intent to termination, reconciling local
//! user intent with signaling events from the remote party:
//!
//! ```text
//! Initializing -> Connecting -> Connected -> Ended
//!                     |-> Rejected   (peer or local reject)
//!                     |-> TimedOut   (ring window lapsed)
//! ```
//!
//! All transitions are one-way; no state is re-entered. Intents against a
//! terminal state are absorbed and reported as [`Dispatched::Ignored`], and
//! signaling events inconsistent with the current state are logged and
//! dropped. The actor never writes to the signaling channel itself; it
//! queues commands to the facade, the channel's sole writer.
//!
//! A transport loss arms a grace window instead of ending the call; the
//! call degrades to `Ended` with an error reason only if the channel layer
//! does not restore the transport in time.

use crate::actors::messages::{
    CallAttempt, CallMessage, CallSnapshot, CallState, Dispatched, EndReason, Notification,
};
use crate::errors::OrchestratorError;
use crate::signaling::{SignalingCommand, SignalingEvent};
use crate::window::ResponseWindow;

use chrono::{DateTime, Utc};
use common::types::{CallDirection, CallId, CallKind};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Handle to a `CallActor`.
#[derive(Clone)]
pub(crate) struct CallActorHandle {
    sender: mpsc::Sender<CallMessage>,
    cancel_token: CancellationToken,
    call_id: CallId,
    snapshot: watch::Receiver<CallSnapshot>,
}

impl CallActorHandle {
    /// Get the call ID.
    #[must_use]
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Local user accepts the incoming call.
    pub async fn accept(&self) -> Result<Dispatched, OrchestratorError> {
        self.request(|respond_to| CallMessage::Accept { respond_to })
            .await
    }

    /// Local user rejects the incoming call.
    pub async fn reject(&self) -> Result<Dispatched, OrchestratorError> {
        self.request(|respond_to| CallMessage::Reject { respond_to })
            .await
    }

    /// Local user hangs up. Idempotent.
    pub async fn hangup(&self) -> Result<Dispatched, OrchestratorError> {
        self.request(|respond_to| CallMessage::Hangup { respond_to })
            .await
    }

    /// Deliver a signaling event addressed to this call.
    pub async fn peer_event(&self, event: SignalingEvent) -> Result<(), OrchestratorError> {
        self.sender
            .send(CallMessage::Peer(event))
            .await
            .map_err(|e| OrchestratorError::Internal(format!("channel send failed: {e}")))
    }

    /// The transport dropped; the channel layer is retrying.
    pub async fn transport_lost(&self) -> Result<(), OrchestratorError> {
        self.sender
            .send(CallMessage::TransportLost)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("channel send failed: {e}")))
    }

    /// The transport came back within the grace period.
    pub async fn transport_restored(&self) -> Result<(), OrchestratorError> {
        self.sender
            .send(CallMessage::TransportRestored)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("channel send failed: {e}")))
    }

    /// The transport is gone for good.
    pub async fn transport_failed(&self) -> Result<(), OrchestratorError> {
        self.sender
            .send(CallMessage::TransportFailed)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("channel send failed: {e}")))
    }

    /// Get the full attempt record.
    pub async fn attempt(&self) -> Result<CallAttempt, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CallMessage::GetAttempt { respond_to: tx })
            .await
            .map_err(|e| OrchestratorError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| OrchestratorError::Internal(format!("response receive failed: {e}")))
    }

    /// Subscribe to state snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    /// Cancel the call actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    async fn request<F>(&self, make_msg: F) -> Result<Dispatched, OrchestratorError>
    where
        F: FnOnce(oneshot::Sender<Dispatched>) -> CallMessage,
    {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make_msg(tx))
            .await
            .map_err(|e| OrchestratorError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| OrchestratorError::Internal(format!("response receive failed: {e}")))
    }
}

/// Parameters fixed for the lifetime of one attempt.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallSetup {
    pub call_id: CallId,
    pub kind: CallKind,
    pub direction: CallDirection,
}

/// The `CallActor` implementation.
pub(crate) struct CallActor {
    setup: CallSetup,
    ring_timeout: Duration,
    reconnect_grace: Duration,
    state: CallState,
    started_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    end_reason: Option<EndReason>,
    /// Monotonic connect instant, for drift-free elapsed display.
    connected_instant: Option<Instant>,
    /// Frozen call duration once the attempt is terminal.
    connected_total: Option<Duration>,
    ring: ResponseWindow,
    grace: ResponseWindow,
    own_sender: mpsc::Sender<CallMessage>,
    receiver: mpsc::Receiver<CallMessage>,
    cancel_token: CancellationToken,
    snapshot_tx: watch::Sender<CallSnapshot>,
    commands: mpsc::UnboundedSender<SignalingCommand>,
    notifications: mpsc::Sender<Notification>,
}

impl CallActor {
    /// Spawn a coordinator for one call attempt.
    ///
    /// Returns a handle and the task join handle.
    pub(crate) fn spawn(
        setup: CallSetup,
        ring_timeout: Duration,
        reconnect_grace: Duration,
        mailbox_buffer: usize,
        cancel_token: CancellationToken,
        commands: mpsc::UnboundedSender<SignalingCommand>,
        notifications: mpsc::Sender<Notification>,
    ) -> (CallActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(mailbox_buffer);
        let (snapshot_tx, snapshot_rx) = watch::channel(CallSnapshot::initializing());

        let actor = Self {
            setup,
            ring_timeout,
            reconnect_grace,
            state: CallState::Initializing,
            started_at: Utc::now(),
            connected_at: None,
            ended_at: None,
            end_reason: None,
            connected_instant: None,
            connected_total: None,
            ring: ResponseWindow::new(cancel_token.clone()),
            grace: ResponseWindow::new(cancel_token.clone()),
            own_sender: sender.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            snapshot_tx,
            commands,
            notifications,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CallActorHandle {
            sender,
            cancel_token,
            call_id: setup.call_id,
            snapshot: snapshot_rx,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "orchestrator.actor.call", fields(call_id = %self.setup.call_id))]
    async fn run(mut self) {
        info!(
            target: "orchestrator.actor.call",
            call_id = %self.setup.call_id,
            kind = ?self.setup.kind,
            direction = ?self.setup.direction,
            "CallActor started"
        );

        // Local setup is validated before spawn; enter ringing right away.
        self.enter_connecting();

        // Republishes the ring countdown / call duration once per second.
        let mut countdown = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "orchestrator.actor.call",
                        call_id = %self.setup.call_id,
                        "CallActor received cancellation signal"
                    );
                    break;
                }

                _ = countdown.tick() => {
                    self.publish();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => break,
                    }
                }
            }
        }

        self.ring.cancel();
        self.grace.cancel();

        info!(
            target: "orchestrator.actor.call",
            call_id = %self.setup.call_id,
            state = ?self.state,
            end_reason = ?self.end_reason,
            "CallActor stopped"
        );
    }

    /// `Initializing` -> `Connecting`: send the invite for outgoing calls
    /// (an incoming attempt already has one on the wire) and start ringing.
    fn enter_connecting(&mut self) {
        self.state = CallState::Connecting;
        if self.setup.direction == CallDirection::Outgoing {
            self.emit(SignalingCommand::Invite {
                call_id: self.setup.call_id,
                kind: self.setup.kind,
            });
        }
        self.ring.arm(
            self.ring_timeout,
            self.own_sender.clone(),
            |generation| CallMessage::RingElapsed { generation },
        );
        self.publish();
    }

    fn handle_message(&mut self, message: CallMessage) {
        match message {
            CallMessage::Accept { respond_to } => {
                let _ = respond_to.send(self.handle_accept());
            }

            CallMessage::Reject { respond_to } => {
                let _ = respond_to.send(self.handle_reject());
            }

            CallMessage::Hangup { respond_to } => {
                let _ = respond_to.send(self.handle_hangup());
            }

            CallMessage::Peer(event) => self.handle_peer_event(event),

            CallMessage::RingElapsed { generation } => self.handle_ring_elapsed(generation),

            CallMessage::GraceElapsed { generation } => self.handle_grace_elapsed(generation),

            CallMessage::TransportLost => self.handle_transport_lost(),

            CallMessage::TransportRestored => {
                if self.grace.is_armed() {
                    debug!(
                        target: "orchestrator.actor.call",
                        call_id = %self.setup.call_id,
                        "transport restored within the grace period"
                    );
                    self.grace.cancel();
                }
            }

            CallMessage::TransportFailed => {
                if !self.state.is_terminal() {
                    warn!(
                        target: "orchestrator.actor.call",
                        call_id = %self.setup.call_id,
                        "transport failed permanently; ending call"
                    );
                    self.terminal(CallState::Ended, Some(EndReason::Error));
                }
            }

            CallMessage::GetAttempt { respond_to } => {
                let _ = respond_to.send(self.record());
            }
        }
    }

    /// Valid only while an incoming call is ringing.
    fn handle_accept(&mut self) -> Dispatched {
        if self.state != CallState::Connecting || self.setup.direction != CallDirection::Incoming {
            warn!(
                target: "orchestrator.actor.call",
                call_id = %self.setup.call_id,
                state = ?self.state,
                direction = ?self.setup.direction,
                "accept intent out of place; ignoring"
            );
            return Dispatched::Ignored;
        }

        self.emit(SignalingCommand::Accept {
            call_id: self.setup.call_id,
        });
        self.enter_connected();
        Dispatched::Applied
    }

    /// Valid only while an incoming call is ringing.
    fn handle_reject(&mut self) -> Dispatched {
        if self.state != CallState::Connecting || self.setup.direction != CallDirection::Incoming {
            warn!(
                target: "orchestrator.actor.call",
                call_id = %self.setup.call_id,
                state = ?self.state,
                direction = ?self.setup.direction,
                "reject intent out of place; ignoring"
            );
            return Dispatched::Ignored;
        }

        self.emit(SignalingCommand::Reject {
            call_id: self.setup.call_id,
        });
        info!(
            target: "orchestrator.actor.call",
            call_id = %self.setup.call_id,
            "incoming call rejected locally"
        );
        self.terminal(CallState::Rejected, None);
        Dispatched::Applied
    }

    /// Valid while ringing or connected; idempotent afterwards.
    fn handle_hangup(&mut self) -> Dispatched {
        if !matches!(self.state, CallState::Connecting | CallState::Connected) {
            debug!(
                target: "orchestrator.actor.call",
                call_id = %self.setup.call_id,
                state = ?self.state,
                "hangup intent on a terminal attempt; ignoring"
            );
            return Dispatched::Ignored;
        }

        self.emit(SignalingCommand::Hangup {
            call_id: self.setup.call_id,
        });
        info!(
            target: "orchestrator.actor.call",
            call_id = %self.setup.call_id,
            "call hung up locally"
        );
        self.terminal(CallState::Ended, Some(EndReason::LocalHangup));
        Dispatched::Applied
    }

    /// Map a signaling event onto the state machine, dropping anything
    /// inconsistent with the current state.
    fn handle_peer_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::PeerRinging { .. } => {
                // Informational for an attempt that is already ringing.
                if self.state != CallState::Connecting {
                    self.protocol_drop("peer-ringing");
                }
            }

            SignalingEvent::PeerAccepted { .. } => {
                if self.state == CallState::Connecting
                    && self.setup.direction == CallDirection::Outgoing
                {
                    info!(
                        target: "orchestrator.actor.call",
                        call_id = %self.setup.call_id,
                        "peer accepted the call"
                    );
                    self.enter_connected();
                } else {
                    self.protocol_drop("peer-accepted");
                }
            }

            SignalingEvent::PeerRejected { .. } => {
                if self.state == CallState::Connecting {
                    info!(
                        target: "orchestrator.actor.call",
                        call_id = %self.setup.call_id,
                        "peer rejected the call"
                    );
                    self.terminal(CallState::Rejected, None);
                } else {
                    self.protocol_drop("peer-rejected");
                }
            }

            SignalingEvent::PeerHangup { reason, .. } => {
                if matches!(self.state, CallState::Connecting | CallState::Connected) {
                    info!(
                        target: "orchestrator.actor.call",
                        call_id = %self.setup.call_id,
                        reason = reason.as_deref().unwrap_or("none"),
                        "peer hung up"
                    );
                    self.terminal(CallState::Ended, Some(EndReason::RemoteHangup));
                } else {
                    self.protocol_drop("peer-hangup");
                }
            }

            SignalingEvent::MessageReceived { .. } => {
                // Chat traffic routed at a call attempt is a facade bug.
                self.protocol_drop("message-received");
            }
        }
    }

    fn handle_ring_elapsed(&mut self, generation: u64) {
        if self.state != CallState::Connecting || !self.ring.matches(generation) {
            debug!(
                target: "orchestrator.actor.call",
                call_id = %self.setup.call_id,
                generation,
                "stale ring expiry; ignoring"
            );
            return;
        }

        warn!(
            target: "orchestrator.actor.call",
            call_id = %self.setup.call_id,
            ring_secs = self.ring_timeout.as_secs(),
            "nobody answered within the ring timeout"
        );
        // Timeout is its own terminal state; end_reason stays unset.
        self.terminal(CallState::TimedOut, None);
        self.notify(Notification::CallTimedOut {
            call_id: self.setup.call_id,
        });
    }

    fn handle_grace_elapsed(&mut self, generation: u64) {
        if self.state.is_terminal() || !self.grace.matches(generation) {
            debug!(
                target: "orchestrator.actor.call",
                call_id = %self.setup.call_id,
                generation,
                "stale grace expiry; ignoring"
            );
            return;
        }

        warn!(
            target: "orchestrator.actor.call",
            call_id = %self.setup.call_id,
            grace_secs = self.reconnect_grace.as_secs(),
            "transport did not recover within the grace period; ending call"
        );
        self.terminal(CallState::Ended, Some(EndReason::Error));
    }

    fn handle_transport_lost(&mut self) {
        if self.state.is_terminal() || self.grace.is_armed() {
            return;
        }
        warn!(
            target: "orchestrator.actor.call",
            call_id = %self.setup.call_id,
            grace_secs = self.reconnect_grace.as_secs(),
            "transport lost; grace period started"
        );
        self.grace.arm(
            self.reconnect_grace,
            self.own_sender.clone(),
            |generation| CallMessage::GraceElapsed { generation },
        );
    }

    /// `Connecting` -> `Connected`; `connected_at` is set exactly once.
    fn enter_connected(&mut self) {
        self.ring.cancel();
        self.state = CallState::Connected;
        if self.connected_at.is_none() {
            self.connected_at = Some(Utc::now());
            self.connected_instant = Some(Instant::now());
        }
        self.publish();
    }

    fn terminal(&mut self, state: CallState, reason: Option<EndReason>) {
        self.ring.cancel();
        self.grace.cancel();
        self.state = state;
        self.end_reason = reason;
        self.ended_at = Some(Utc::now());
        self.connected_total = self.connected_instant.map(|at| at.elapsed());
        self.publish();
    }

    fn protocol_drop(&self, event: &'static str) {
        debug!(
            target: "orchestrator.actor.call",
            call_id = %self.setup.call_id,
            state = ?self.state,
            event,
            "signaling event inconsistent with call state; dropped"
        );
    }

    fn emit(&self, command: SignalingCommand) {
        if let Err(e) = self.commands.send(command) {
            warn!(
                target: "orchestrator.actor.call",
                call_id = %self.setup.call_id,
                "command queue closed: {e}"
            );
        }
    }

    fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifications.try_send(notification) {
            debug!(
                target: "orchestrator.actor.call",
                call_id = %self.setup.call_id,
                "notification dropped: {e}"
            );
        }
    }

    fn connected_secs(&self) -> u64 {
        self.connected_total
            .or_else(|| self.connected_instant.map(|at| at.elapsed()))
            .unwrap_or_default()
            .as_secs()
    }

    fn publish(&self) {
        let snapshot = CallSnapshot {
            state: self.state,
            remaining_secs: self.ring.remaining().as_secs(),
            connected_secs: self.connected_secs(),
            end_reason: self.end_reason,
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn record(&self) -> CallAttempt {
        CallAttempt {
            id: self.setup.call_id,
            kind: self.setup.kind,
            direction: self.setup.direction,
            state: self.state,
            started_at: self.started_at,
            connected_at: self.connected_at,
            ended_at: self.ended_at,
            end_reason: self.end_reason,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn spawn_call(
        direction: CallDirection,
    ) -> (
        CallActorHandle,
        mpsc::UnboundedReceiver<SignalingCommand>,
        mpsc::Receiver<Notification>,
        CancellationToken,
    ) {
        let cancel_token = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::channel(8);
        let (handle, _task) = CallActor::spawn(
            CallSetup {
                call_id: CallId::new(),
                kind: CallKind::Audio,
                direction,
            },
            Duration::from_secs(90),
            Duration::from_secs(15),
            64,
            cancel_token.clone(),
            command_tx,
            notify_tx,
        );
        (handle, command_rx, notify_rx, cancel_token)
    }

    async fn settle() {
        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SignalingCommand>) -> Vec<SignalingCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = rx.try_recv() {
            commands.push(command);
        }
        commands
    }

    #[tokio::test(start_paused = true)]
    async fn outgoing_call_invites_then_connects_on_peer_accept() {
        let (handle, mut commands, _notify, _token) = spawn_call(CallDirection::Outgoing);
        let sub = handle.subscribe();
        settle().await;

        assert_eq!(sub.borrow().state, CallState::Connecting);
        let sent = drain(&mut commands);
        assert!(matches!(sent.as_slice(), [SignalingCommand::Invite { .. }]));

        handle
            .peer_event(SignalingEvent::PeerAccepted {
                call_id: handle.call_id(),
            })
            .await
            .unwrap();
        settle().await;

        assert_eq!(sub.borrow().state, CallState::Connected);
        let attempt = handle.attempt().await.unwrap();
        assert!(attempt.connected_at.is_some());
        assert!(attempt.end_reason.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hangup_is_idempotent_with_exactly_one_transition_and_command() {
        let (handle, mut commands, _notify, _token) = spawn_call(CallDirection::Outgoing);
        let sub = handle.subscribe();
        settle().await;

        handle
            .peer_event(SignalingEvent::PeerAccepted {
                call_id: handle.call_id(),
            })
            .await
            .unwrap();
        settle().await;
        drain(&mut commands);

        assert_eq!(handle.hangup().await.unwrap(), Dispatched::Applied);
        assert_eq!(handle.hangup().await.unwrap(), Dispatched::Ignored);

        assert_eq!(sub.borrow().state, CallState::Ended);
        assert_eq!(sub.borrow().end_reason, Some(EndReason::LocalHangup));
        let hangups = drain(&mut commands)
            .into_iter()
            .filter(|c| matches!(c, SignalingCommand::Hangup { .. }))
            .count();
        assert_eq!(hangups, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_call_times_out_with_no_end_reason() {
        let (handle, _commands, mut notify, _token) = spawn_call(CallDirection::Outgoing);
        let sub = handle.subscribe();
        settle().await;

        tokio::time::advance(Duration::from_secs(90)).await;
        settle().await;

        assert_eq!(sub.borrow().state, CallState::TimedOut);
        assert_eq!(sub.borrow().end_reason, None);
        assert_eq!(
            notify.try_recv().unwrap(),
            Notification::CallTimedOut {
                call_id: handle.call_id()
            }
        );

        // Intents after a terminal state are ignored and change nothing.
        assert_eq!(handle.accept().await.unwrap(), Dispatched::Ignored);
        assert_eq!(handle.hangup().await.unwrap(), Dispatched::Ignored);
        assert_eq!(sub.borrow().state, CallState::TimedOut);
        assert_eq!(sub.borrow().end_reason, None);
    }

    #[tokio::test(start_paused = true)]
    async fn local_reject_emits_the_command_exactly_once() {
        let (handle, mut commands, _notify, _token) = spawn_call(CallDirection::Incoming);
        let sub = handle.subscribe();
        settle().await;

        // Incoming attempts do not send an invite.
        assert!(drain(&mut commands).is_empty());

        assert_eq!(handle.reject().await.unwrap(), Dispatched::Applied);
        assert_eq!(handle.reject().await.unwrap(), Dispatched::Ignored);

        assert_eq!(sub.borrow().state, CallState::Rejected);
        let rejects = drain(&mut commands)
            .into_iter()
            .filter(|c| matches!(c, SignalingCommand::Reject { .. }))
            .count();
        assert_eq!(rejects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn incoming_accept_sends_the_command_and_connects() {
        let (handle, mut commands, _notify, _token) = spawn_call(CallDirection::Incoming);
        let sub = handle.subscribe();
        settle().await;

        assert_eq!(handle.accept().await.unwrap(), Dispatched::Applied);
        assert_eq!(sub.borrow().state, CallState::Connected);
        let sent = drain(&mut commands);
        assert!(matches!(sent.as_slice(), [SignalingCommand::Accept { .. }]));

        // Call duration accrues from the connect instant.
        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert!(sub.borrow().connected_secs >= 30);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_on_an_outgoing_call_is_ignored() {
        let (handle, _commands, _notify, _token) = spawn_call(CallDirection::Outgoing);
        let sub = handle.subscribe();
        settle().await;

        assert_eq!(handle.accept().await.unwrap(), Dispatched::Ignored);
        assert_eq!(sub.borrow().state, CallState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_rejection_terminates_the_ringing_attempt() {
        let (handle, _commands, _notify, _token) = spawn_call(CallDirection::Outgoing);
        let sub = handle.subscribe();
        settle().await;

        handle
            .peer_event(SignalingEvent::PeerRejected {
                call_id: handle.call_id(),
            })
            .await
            .unwrap();
        settle().await;
        assert_eq!(sub.borrow().state, CallState::Rejected);

        // The ring window was cancelled with the transition.
        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(sub.borrow().state, CallState::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn late_peer_accept_after_hangup_is_dropped() {
        let (handle, _commands, _notify, _token) = spawn_call(CallDirection::Outgoing);
        let sub = handle.subscribe();
        settle().await;

        assert_eq!(handle.hangup().await.unwrap(), Dispatched::Applied);
        handle
            .peer_event(SignalingEvent::PeerAccepted {
                call_id: handle.call_id(),
            })
            .await
            .unwrap();
        settle().await;

        assert_eq!(sub.borrow().state, CallState::Ended);
        assert_eq!(sub.borrow().end_reason, Some(EndReason::LocalHangup));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_loss_degrades_after_the_grace_period() {
        let (handle, _commands, _notify, _token) = spawn_call(CallDirection::Outgoing);
        let sub = handle.subscribe();
        settle().await;

        handle
            .peer_event(SignalingEvent::PeerAccepted {
                call_id: handle.call_id(),
            })
            .await
            .unwrap();
        handle.transport_lost().await.unwrap();
        settle().await;
        assert_eq!(sub.borrow().state, CallState::Connected);

        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(sub.borrow().state, CallState::Ended);
        assert_eq!(sub.borrow().end_reason, Some(EndReason::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_restored_within_grace_keeps_the_call_alive() {
        let (handle, _commands, _notify, _token) = spawn_call(CallDirection::Outgoing);
        let sub = handle.subscribe();
        settle().await;

        handle
            .peer_event(SignalingEvent::PeerAccepted {
                call_id: handle.call_id(),
            })
            .await
            .unwrap();
        handle.transport_lost().await.unwrap();
        settle().await;

        tokio::time::advance(Duration::from_secs(10)).await;
        handle.transport_restored().await.unwrap();
        settle().await;

        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(sub.borrow().state, CallState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_transport_failure_ends_the_call_immediately() {
        let (handle, _commands, _notify, _token) = spawn_call(CallDirection::Outgoing);
        let sub = handle.subscribe();
        settle().await;

        handle.transport_failed().await.unwrap();
        settle().await;
        assert_eq!(sub.borrow().state, CallState::Ended);
        assert_eq!(sub.borrow().end_reason, Some(EndReason::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn ring_countdown_is_visible_in_snapshots() {
        let (handle, _commands, _notify, _token) = spawn_call(CallDirection::Outgoing);
        let sub = handle.subscribe();
        settle().await;

        let initial = sub.borrow().remaining_secs;
        assert!(initial >= 89);

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert!(sub.borrow().remaining_secs < initial);
    }
}
