//! `InstantSessionActor` - per-session activation tracker.
//!
//! Decides, for a single chat session, whether the doctor honored the
//! response-time contract after the patient's first message, and exposes a
//! live countdown:
//!
//! - `Idle` -> `Armed` on the tracked patient's first message (window armed)
//! - `Armed` -> `Activated` on a doctor response before the deadline
//! - `Armed` -> `Expired` when the deadline passes first
//!
//! `Activated` and `Expired` are terminal; a late doctor response never
//! resurrects an expired window, and duplicate patient messages never extend
//! the deadline. Out-of-order and duplicate messages are absorbed as no-ops,
//! never errors.
//!
//! The doctor-response/expiry race is resolved by mailbox order: whichever
//! message is dequeued first wins. The expiry handler does not re-inspect
//! message timestamps.

use crate::actors::messages::{
    InstantSessionWindow, Notification, SessionMessage, SessionSpec, WindowSnapshot, WindowState,
};
use crate::errors::OrchestratorError;
use crate::window::ResponseWindow;

use chrono::{DateTime, Utc};
use common::types::UserId;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Handle to an `InstantSessionActor`.
#[derive(Clone)]
pub(crate) struct InstantSessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    snapshot: watch::Receiver<WindowSnapshot>,
}

impl InstantSessionActorHandle {
    /// A chat message was observed in this session.
    pub async fn observe_message(
        &self,
        sender_id: UserId,
        sent_at: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        self.sender
            .send(SessionMessage::MessageObserved { sender_id, sent_at })
            .await
            .map_err(|e| OrchestratorError::Internal(format!("channel send failed: {e}")))
    }

    /// Force the tracker back to `Idle`.
    pub async fn reset(&self) -> Result<(), OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Reset { respond_to: tx })
            .await
            .map_err(|e| OrchestratorError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| OrchestratorError::Internal(format!("response receive failed: {e}")))
    }

    /// Get the full window record.
    pub async fn window(&self) -> Result<InstantSessionWindow, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::GetWindow { respond_to: tx })
            .await
            .map_err(|e| OrchestratorError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| OrchestratorError::Internal(format!("response receive failed: {e}")))
    }

    /// Subscribe to state snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WindowSnapshot> {
        self.snapshot.clone()
    }

    /// Cancel the actor and its window.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `InstantSessionActor` implementation.
pub(crate) struct InstantSessionActor {
    spec: SessionSpec,
    response_window: Duration,
    state: WindowState,
    patient_first_message_at: Option<DateTime<Utc>>,
    doctor_responded_at: Option<DateTime<Utc>>,
    activated_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    window: ResponseWindow,
    /// Clone of the mailbox sender, used to deliver window expiries.
    own_sender: mpsc::Sender<SessionMessage>,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    snapshot_tx: watch::Sender<WindowSnapshot>,
    notifications: mpsc::Sender<Notification>,
}

impl InstantSessionActor {
    /// Spawn a tracker for one session.
    ///
    /// Returns a handle and the task join handle.
    pub(crate) fn spawn(
        spec: SessionSpec,
        response_window: Duration,
        mailbox_buffer: usize,
        cancel_token: CancellationToken,
        notifications: mpsc::Sender<Notification>,
    ) -> (InstantSessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(mailbox_buffer);
        let (snapshot_tx, snapshot_rx) = watch::channel(WindowSnapshot::idle());

        let actor = Self {
            spec,
            response_window,
            state: WindowState::Idle,
            patient_first_message_at: None,
            doctor_responded_at: None,
            activated_at: None,
            expires_at: None,
            window: ResponseWindow::new(cancel_token.clone()),
            own_sender: sender.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            snapshot_tx,
            notifications,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = InstantSessionActorHandle {
            sender,
            cancel_token,
            snapshot: snapshot_rx,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "orchestrator.actor.session", fields(session_id = %self.spec.session_id))]
    async fn run(mut self) {
        info!(
            target: "orchestrator.actor.session",
            session_id = %self.spec.session_id,
            "InstantSessionActor started"
        );

        // Resume an in-flight window from a server-supplied remaining time
        // (post-reconnect rehydration).
        if let Some(remaining) = self.spec.resume_remaining.take() {
            self.resume(remaining);
        }

        // Republishes the countdown once per second while armed.
        let mut countdown = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "orchestrator.actor.session",
                        session_id = %self.spec.session_id,
                        "InstantSessionActor received cancellation signal"
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

        self.window.cancel();

        info!(
            target: "orchestrator.actor.session",
            session_id = %self.spec.session_id,
            state = ?self.state,
            "InstantSessionActor stopped"
        );
    }

    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::MessageObserved { sender_id, sent_at } => {
                self.handle_observed(sender_id, sent_at);
            }

            SessionMessage::WindowElapsed { generation } => {
                self.handle_elapsed(generation);
            }

            SessionMessage::Reset { respond_to } => {
                self.handle_reset();
                let _ = respond_to.send(());
            }

            SessionMessage::GetWindow { respond_to } => {
                let _ = respond_to.send(self.record());
            }
        }
    }

    fn handle_observed(&mut self, sender_id: UserId, sent_at: DateTime<Utc>) {
        if sender_id == self.spec.patient_id {
            self.handle_patient_message(sent_at);
        } else if sender_id == self.spec.doctor_id {
            self.handle_doctor_message(sent_at);
        } else {
            debug!(
                target: "orchestrator.actor.session",
                session_id = %self.spec.session_id,
                sender_id = %sender_id,
                "message from a sender outside this session; ignoring"
            );
        }
    }

    /// First patient message arms the window; later ones are no-ops so a
    /// resent message cannot delay expiry.
    fn handle_patient_message(&mut self, sent_at: DateTime<Utc>) {
        if self.state != WindowState::Idle {
            debug!(
                target: "orchestrator.actor.session",
                session_id = %self.spec.session_id,
                state = ?self.state,
                "patient message while not idle; window unchanged"
            );
            return;
        }

        self.state = WindowState::Armed;
        self.patient_first_message_at = Some(sent_at);
        self.expires_at = Some(sent_at + chrono_duration(self.response_window));
        self.arm(self.response_window);

        info!(
            target: "orchestrator.actor.session",
            session_id = %self.spec.session_id,
            window_secs = self.response_window.as_secs(),
            "patient's first message observed; response window armed"
        );
        self.publish();
    }

    /// A doctor response while armed activates the session. Anything else
    /// (idle, already activated, already expired) is a no-op.
    fn handle_doctor_message(&mut self, sent_at: DateTime<Utc>) {
        if self.state != WindowState::Armed {
            debug!(
                target: "orchestrator.actor.session",
                session_id = %self.spec.session_id,
                state = ?self.state,
                "doctor message outside an armed window; ignoring"
            );
            return;
        }

        self.window.cancel();
        self.state = WindowState::Activated;
        self.doctor_responded_at = Some(sent_at);
        self.activated_at = Some(Utc::now());

        info!(
            target: "orchestrator.actor.session",
            session_id = %self.spec.session_id,
            "doctor responded in time; session activated"
        );
        self.notify(Notification::SessionActivated {
            session_id: self.spec.session_id.clone(),
        });
        self.publish();
    }

    fn handle_elapsed(&mut self, generation: u64) {
        if self.state != WindowState::Armed || !self.window.matches(generation) {
            debug!(
                target: "orchestrator.actor.session",
                session_id = %self.spec.session_id,
                generation,
                "stale window expiry; ignoring"
            );
            return;
        }

        self.window.cancel();
        self.state = WindowState::Expired;

        warn!(
            target: "orchestrator.actor.session",
            session_id = %self.spec.session_id,
            "response window lapsed without a doctor response"
        );
        self.notify(Notification::SessionExpired {
            session_id: self.spec.session_id.clone(),
        });
        self.publish();
    }

    fn handle_reset(&mut self) {
        self.window.cancel();
        self.state = WindowState::Idle;
        self.patient_first_message_at = None;
        self.doctor_responded_at = None;
        self.activated_at = None;
        self.expires_at = None;

        debug!(
            target: "orchestrator.actor.session",
            session_id = %self.spec.session_id,
            "tracker reset to idle"
        );
        self.publish();
    }

    /// Arm from a server-supplied remaining time, back-dating the first
    /// message timestamp so `expires_at` reflects the server deadline.
    fn resume(&mut self, remaining: Duration) {
        if self.state != WindowState::Idle {
            return;
        }
        let now = Utc::now();
        self.state = WindowState::Armed;
        self.patient_first_message_at =
            Some(now - chrono_duration(self.response_window) + chrono_duration(remaining));
        self.expires_at = Some(now + chrono_duration(remaining));
        self.arm(remaining);

        info!(
            target: "orchestrator.actor.session",
            session_id = %self.spec.session_id,
            remaining_secs = remaining.as_secs(),
            "response window resumed from server deadline"
        );
        self.publish();
    }

    fn arm(&mut self, duration: Duration) {
        self.window.arm(duration, self.own_sender.clone(), |generation| {
            SessionMessage::WindowElapsed { generation }
        });
    }

    fn notify(&self, notification: Notification) {
        // Side-signals are lossy: a full or absent dispatcher must not
        // stall the state machine.
        if let Err(e) = self.notifications.try_send(notification) {
            debug!(
                target: "orchestrator.actor.session",
                session_id = %self.spec.session_id,
                "notification dropped: {e}"
            );
        }
    }

    fn publish(&self) {
        let snapshot = WindowSnapshot {
            state: self.state,
            remaining_secs: self.window.remaining().as_secs(),
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

    fn record(&self) -> InstantSessionWindow {
        InstantSessionWindow {
            session_id: self.spec.session_id.clone(),
            appointment_id: self.spec.appointment_id.clone(),
            patient_id: self.spec.patient_id,
            doctor_id: self.spec.doctor_id,
            state: self.state,
            patient_first_message_at: self.patient_first_message_at,
            doctor_responded_at: self.doctor_responded_at,
            activated_at: self.activated_at,
            expires_at: self.expires_at,
        }
    }
}

/// Convert a std duration to a chrono one (sub-day values, never overflows).
fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use common::types::{AppointmentId, SessionId};
    use tokio::sync::mpsc;

    const PATIENT: UserId = UserId(1);
    const DOCTOR: UserId = UserId(2);
    const STRANGER: UserId = UserId(99);

    fn test_spec() -> SessionSpec {
        SessionSpec {
            session_id: SessionId::from("text_session_1"),
            appointment_id: AppointmentId::from("appt_1"),
            patient_id: PATIENT,
            doctor_id: DOCTOR,
            resume_remaining: None,
        }
    }

    fn spawn_tracker(
        spec: SessionSpec,
    ) -> (
        InstantSessionActorHandle,
        mpsc::Receiver<Notification>,
        CancellationToken,
    ) {
        let cancel_token = CancellationToken::new();
        let (notify_tx, notify_rx) = mpsc::channel(8);
        let (handle, _task) = InstantSessionActor::spawn(
            spec,
            Duration::from_secs(90),
            64,
            cancel_token.clone(),
            notify_tx,
        );
        (handle, notify_rx, cancel_token)
    }

    async fn settle() {
        // Let the actor drain its mailbox under paused time.
        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn doctor_response_at_89_seconds_activates() {
        let (handle, mut notify_rx, _token) = spawn_tracker(test_spec());
        let sub = handle.subscribe();

        let t0 = Utc::now();
        handle.observe_message(PATIENT, t0).await.unwrap();
        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Armed);

        tokio::time::advance(Duration::from_secs(89)).await;
        handle
            .observe_message(DOCTOR, t0 + chrono::Duration::seconds(89))
            .await
            .unwrap();
        settle().await;

        assert_eq!(sub.borrow().state, WindowState::Activated);
        let window = handle.window().await.unwrap();
        assert_eq!(
            window.doctor_responded_at.unwrap() - window.patient_first_message_at.unwrap(),
            chrono::Duration::seconds(89)
        );
        assert_eq!(
            notify_rx.try_recv().unwrap(),
            Notification::SessionActivated {
                session_id: SessionId::from("text_session_1")
            }
        );

        // Terminal: the window never expires afterwards.
        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Activated);
        assert!(notify_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn late_doctor_response_does_not_resurrect_an_expired_window() {
        let (handle, mut notify_rx, _token) = spawn_tracker(test_spec());
        let sub = handle.subscribe();

        let t0 = Utc::now();
        handle.observe_message(PATIENT, t0).await.unwrap();
        settle().await;

        tokio::time::advance(Duration::from_secs(91)).await;
        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Expired);
        assert_eq!(
            notify_rx.try_recv().unwrap(),
            Notification::SessionExpired {
                session_id: SessionId::from("text_session_1")
            }
        );

        handle
            .observe_message(DOCTOR, t0 + chrono::Duration::seconds(91))
            .await
            .unwrap();
        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Expired);
        let window = handle.window().await.unwrap();
        assert!(window.doctor_responded_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_patient_messages_do_not_extend_the_deadline() {
        let (handle, _notify_rx, _token) = spawn_tracker(test_spec());
        let sub = handle.subscribe();

        let t0 = Utc::now();
        handle.observe_message(PATIENT, t0).await.unwrap();
        settle().await;

        tokio::time::advance(Duration::from_secs(60)).await;
        handle
            .observe_message(PATIENT, t0 + chrono::Duration::seconds(60))
            .await
            .unwrap();
        settle().await;

        // Still expires 90s after the first message, not the second.
        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn doctor_message_before_the_first_patient_message_is_a_no_op() {
        let (handle, _notify_rx, _token) = spawn_tracker(test_spec());
        let sub = handle.subscribe();

        handle.observe_message(DOCTOR, Utc::now()).await.unwrap();
        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Idle);

        // A stranger's message never arms the window either.
        handle.observe_message(STRANGER, Utc::now()).await.unwrap();
        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_returns_to_idle_and_cancels_the_window() {
        let (handle, mut notify_rx, _token) = spawn_tracker(test_spec());
        let sub = handle.subscribe();

        handle.observe_message(PATIENT, Utc::now()).await.unwrap();
        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Armed);

        handle.reset().await.unwrap();
        assert_eq!(sub.borrow().state, WindowState::Idle);

        // The cancelled window must never fire.
        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Idle);
        assert!(notify_rx.try_recv().is_err());

        let window = handle.window().await.unwrap();
        assert!(window.patient_first_message_at.is_none());
        assert!(window.expires_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn a_fresh_window_can_be_armed_after_reset() {
        let (handle, _notify_rx, _token) = spawn_tracker(test_spec());
        let sub = handle.subscribe();

        handle.observe_message(PATIENT, Utc::now()).await.unwrap();
        settle().await;
        handle.reset().await.unwrap();

        handle.observe_message(PATIENT, Utc::now()).await.unwrap();
        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Armed);

        tokio::time::advance(Duration::from_secs(90)).await;
        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn rehydrated_window_expires_at_the_server_deadline() {
        let mut spec = test_spec();
        spec.resume_remaining = Some(Duration::from_secs(30));
        let (handle, _notify_rx, _token) = spawn_tracker(spec);
        let sub = handle.subscribe();

        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Armed);

        tokio::time::advance(Duration::from_secs(29)).await;
        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Armed);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(sub.borrow().state, WindowState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_snapshots_decrease_while_armed() {
        let (handle, _notify_rx, _token) = spawn_tracker(test_spec());
        let sub = handle.subscribe();

        handle.observe_message(PATIENT, Utc::now()).await.unwrap();
        settle().await;
        let initial = sub.borrow().remaining_secs;
        assert!(initial >= 89);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        let later = sub.borrow().remaining_secs;
        assert!(later < initial);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_actor_and_its_window() {
        let (handle, mut notify_rx, token) = spawn_tracker(test_spec());

        handle.observe_message(PATIENT, Utc::now()).await.unwrap();
        settle().await;

        token.cancel();
        settle().await;

        tokio::time::advance(Duration::from_secs(600)).await;
        tokio::task::yield_now().await;
        assert!(notify_rx.try_recv().is_err());
    }
}
