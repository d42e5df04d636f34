//! The orchestrator facade: the single entry point presentation layers use.
//!
//! One `OrchestratorActor` exists per signaling connection. It owns the
//! write half of the [`SignalingChannel`] exclusively, supervises the
//! per-session and per-call entity actors, and routes every inbound
//! signaling event and every UI intent to the mailbox of the state machine
//! that owns it. Entity actors queue outbound commands upward; the facade
//! drains that queue onto the wire, so command emission is serialized with
//! everything else the facade does.
//!
//! Lifecycle: [`Orchestrator::connect`] establishes the channel and spawns
//! the facade; dropping the returned [`OrchestratorHandle`] (or calling
//! [`OrchestratorHandle::disconnect`]) cancels the root token, which tears
//! down every entity actor and every armed window beneath it.

use crate::actors::call::{CallActor, CallActorHandle, CallSetup};
use crate::actors::instant_session::{InstantSessionActor, InstantSessionActorHandle};
use crate::actors::messages::{
    CallAttempt, CallSnapshot, CallSpec, Dispatched, FacadeMessage, InstantSessionWindow, Intent,
    Notification, SessionSpec, WindowSnapshot,
};
use crate::config::OrchestratorConfig;
use crate::errors::{OrchestratorError, SetupError};
use crate::signaling::{
    ChannelEvent, SignalingChannel, SignalingCommand, SignalingConnector, SignalingEvent,
};

use chrono::Utc;
use common::credentials::Credentials;
use common::types::{CallDirection, CallId, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Entry point for establishing an orchestrator.
pub struct Orchestrator;

impl Orchestrator {
    /// Connect the signaling channel and spawn the orchestrator facade.
    ///
    /// # Errors
    ///
    /// `OrchestratorError::Connection` if the connector cannot establish
    /// the channel.
    pub async fn connect(
        connector: &dyn SignalingConnector,
        credentials: Credentials,
        config: OrchestratorConfig,
    ) -> Result<OrchestratorHandle, OrchestratorError> {
        let parts = connector.connect(&credentials).await?;

        let cancel_token = CancellationToken::new();
        let (sender, receiver) = mpsc::channel(config.mailbox_buffer);
        let (notify_tx, notify_rx) = mpsc::channel(config.notification_buffer);
        // Commands are tiny (at most a couple per call attempt) and must
        // never block an entity actor, so the upward queue is unbounded.
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let actor = OrchestratorActor {
            credentials,
            config,
            channel: parts.channel,
            events: Some(parts.events),
            receiver,
            command_tx,
            command_rx,
            notify_tx,
            cancel_token: cancel_token.clone(),
            sessions: HashMap::new(),
            calls: HashMap::new(),
        };

        let task = tokio::spawn(actor.run());

        info!(target: "orchestrator.facade", "orchestrator connected");

        Ok(OrchestratorHandle {
            sender,
            cancel_token,
            notifications: Some(notify_rx),
            task: Some(task),
        })
    }
}

/// Handle to a running orchestrator.
///
/// Deliberately not `Clone`: one owner per connection. Dropping the handle
/// cancels the whole actor hierarchy, so an orchestrator cannot outlive the
/// layer that acquired it.
pub struct OrchestratorHandle {
    sender: mpsc::Sender<FacadeMessage>,
    cancel_token: CancellationToken,
    notifications: Option<mpsc::Receiver<Notification>>,
    task: Option<JoinHandle<()>>,
}

impl OrchestratorHandle {
    /// Start tracking a session's instant-activation window.
    ///
    /// Opening a session that is already tracked replaces the existing
    /// tracker and its window.
    ///
    /// # Errors
    ///
    /// `SetupError::IncompleteIdentifiers` if the session's identifiers are
    /// missing or inconsistent.
    pub async fn open_session(
        &self,
        spec: SessionSpec,
    ) -> Result<watch::Receiver<WindowSnapshot>, OrchestratorError> {
        validate_session_spec(&spec)?;
        let (tx, rx) = oneshot::channel();
        self.send(FacadeMessage::OpenSession {
            spec,
            respond_to: tx,
        })
        .await?;
        recv(rx).await
    }

    /// Stop tracking a session, cancelling any running window.
    pub async fn close_session(&self, session_id: SessionId) -> Result<(), OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.send(FacadeMessage::CloseSession {
            session_id,
            respond_to: tx,
        })
        .await?;
        recv(rx).await?
    }

    /// Force a tracked session's window back to idle.
    pub async fn reset_session(&self, session_id: SessionId) -> Result<(), OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.send(FacadeMessage::ResetSession {
            session_id,
            respond_to: tx,
        })
        .await?;
        recv(rx).await?
    }

    /// Get the full window record for a tracked session.
    pub async fn session_window(
        &self,
        session_id: SessionId,
    ) -> Result<InstantSessionWindow, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.send(FacadeMessage::SessionWindowInfo {
            session_id,
            respond_to: tx,
        })
        .await?;
        recv(rx).await?
    }

    /// Start an outgoing call attempt.
    ///
    /// # Errors
    ///
    /// `SetupError::MediaNotReady` if local media capture is not ready;
    /// the attempt is never created and nothing reaches the wire.
    pub async fn start_call(
        &self,
        spec: CallSpec,
    ) -> Result<(CallId, watch::Receiver<CallSnapshot>), OrchestratorError> {
        if !spec.media_ready {
            return Err(SetupError::MediaNotReady.into());
        }
        let (tx, rx) = oneshot::channel();
        self.send(FacadeMessage::StartCall {
            spec,
            respond_to: tx,
        })
        .await?;
        recv(rx).await?
    }

    /// Dispose a call attempt, retiring its ID. Cancels the attempt if it
    /// is still live.
    pub async fn release_call(&self, call_id: CallId) -> Result<(), OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.send(FacadeMessage::ReleaseCall {
            call_id,
            respond_to: tx,
        })
        .await?;
        recv(rx).await?
    }

    /// Get the full record of a call attempt.
    pub async fn call_attempt(&self, call_id: CallId) -> Result<CallAttempt, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.send(FacadeMessage::CallAttemptInfo {
            call_id,
            respond_to: tx,
        })
        .await?;
        recv(rx).await?
    }

    /// Dispatch a UI intent to the state machine that owns it.
    ///
    /// Intents against unknown or terminal entities come back as
    /// [`Dispatched::Ignored`], never as an error.
    pub async fn dispatch(&self, intent: Intent) -> Result<Dispatched, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.send(FacadeMessage::Dispatch {
            intent,
            respond_to: tx,
        })
        .await?;
        recv(rx).await?
    }

    /// Subscribe to a call attempt's state snapshots.
    pub async fn subscribe_call(
        &self,
        call_id: CallId,
    ) -> Result<watch::Receiver<CallSnapshot>, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.send(FacadeMessage::SubscribeCall {
            call_id,
            respond_to: tx,
        })
        .await?;
        recv(rx).await?
    }

    /// Subscribe to a tracked session's window snapshots.
    pub async fn subscribe_session(
        &self,
        session_id: SessionId,
    ) -> Result<watch::Receiver<WindowSnapshot>, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.send(FacadeMessage::SubscribeSession {
            session_id,
            respond_to: tx,
        })
        .await?;
        recv(rx).await?
    }

    /// Take the notification stream. Yields `Some` exactly once.
    pub fn notifications(&mut self) -> Option<mpsc::Receiver<Notification>> {
        self.notifications.take()
    }

    /// Disconnect: tear down every entity actor and close the channel.
    pub async fn disconnect(mut self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(FacadeMessage::Shutdown { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
        self.cancel_token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    async fn send(&self, message: FacadeMessage) -> Result<(), OrchestratorError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| OrchestratorError::ChannelClosed)
    }
}

impl Drop for OrchestratorHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn recv<T>(rx: oneshot::Receiver<T>) -> Result<T, OrchestratorError> {
    rx.await
        .map_err(|e| OrchestratorError::Internal(format!("response receive failed: {e}")))
}

fn validate_session_spec(spec: &SessionSpec) -> Result<(), SetupError> {
    if spec.session_id.as_str().is_empty() || spec.appointment_id.as_str().is_empty() {
        return Err(SetupError::IncompleteIdentifiers(
            "session and appointment IDs are required".to_string(),
        ));
    }
    if spec.patient_id == spec.doctor_id {
        return Err(SetupError::IncompleteIdentifiers(
            "patient and doctor must be distinct users".to_string(),
        ));
    }
    Ok(())
}

struct SessionEntry {
    handle: InstantSessionActorHandle,
    _task: JoinHandle<()>,
}

struct CallEntry {
    handle: CallActorHandle,
    _task: JoinHandle<()>,
}

/// The facade actor implementation.
struct OrchestratorActor {
    credentials: Credentials,
    config: OrchestratorConfig,
    channel: Arc<dyn SignalingChannel>,
    /// `None` after the channel layer gives up; the loop then stops
    /// polling the stream.
    events: Option<mpsc::Receiver<ChannelEvent>>,
    receiver: mpsc::Receiver<FacadeMessage>,
    command_tx: mpsc::UnboundedSender<SignalingCommand>,
    command_rx: mpsc::UnboundedReceiver<SignalingCommand>,
    notify_tx: mpsc::Sender<Notification>,
    cancel_token: CancellationToken,
    sessions: HashMap<SessionId, SessionEntry>,
    calls: HashMap<CallId, CallEntry>,
}

impl OrchestratorActor {
    /// Run the facade message loop.
    #[instrument(skip_all, name = "orchestrator.facade")]
    async fn run(mut self) {
        info!(target: "orchestrator.facade", "OrchestratorActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "orchestrator.facade",
                        "OrchestratorActor received cancellation signal"
                    );
                    break;
                }

                Some(command) = self.command_rx.recv() => {
                    self.forward_command(command).await;
                }

                event = next_event(&mut self.events), if self.events.is_some() => {
                    match event {
                        Some(event) => self.handle_channel_event(event).await,
                        None => self.handle_channel_failure().await,
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            if self.handle_message(message).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        self.shutdown().await;

        info!(target: "orchestrator.facade", "OrchestratorActor stopped");
    }

    /// Drain one queued command onto the wire.
    async fn forward_command(&self, command: SignalingCommand) {
        debug!(
            target: "orchestrator.facade",
            command = ?command,
            "writing command to signaling channel"
        );
        if let Err(e) = self.channel.send(command).await {
            // The channel layer surfaces the loss on the event stream;
            // the affected call degrades through its grace window.
            warn!(
                target: "orchestrator.facade",
                error = %e,
                "signaling channel write failed"
            );
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Signal(signal) => self.route_signal(signal).await,

            ChannelEvent::Down => {
                warn!(
                    target: "orchestrator.facade",
                    calls = self.calls.len(),
                    "transport down; entity actors entering grace"
                );
                for entry in self.calls.values() {
                    let _ = entry.handle.transport_lost().await;
                }
            }

            ChannelEvent::Up => {
                info!(target: "orchestrator.facade", "transport restored");
                for entry in self.calls.values() {
                    let _ = entry.handle.transport_restored().await;
                }
            }
        }
    }

    /// The channel layer gave up reconnecting; the loss is unrecoverable.
    async fn handle_channel_failure(&mut self) {
        warn!(
            target: "orchestrator.facade",
            "signaling channel closed permanently"
        );
        self.events = None;
        for entry in self.calls.values() {
            let _ = entry.handle.transport_failed().await;
        }
    }

    async fn route_signal(&mut self, signal: SignalingEvent) {
        match signal {
            SignalingEvent::MessageReceived {
                session_id,
                sender_id,
                sent_at,
            } => {
                if let Some(entry) = self.sessions.get(&session_id) {
                    let _ = entry.handle.observe_message(sender_id, sent_at).await;
                } else {
                    // Messages for untracked sessions are none of our
                    // business; the chat layer handles delivery.
                    debug!(
                        target: "orchestrator.facade",
                        session_id = %session_id,
                        "message for untracked session dropped"
                    );
                }
            }

            SignalingEvent::PeerRinging { call_id, kind } => {
                if let Some(entry) = self.calls.get(&call_id) {
                    let _ = entry
                        .handle
                        .peer_event(SignalingEvent::PeerRinging { call_id, kind })
                        .await;
                } else {
                    self.spawn_incoming_call(call_id, kind);
                }
            }

            SignalingEvent::PeerAccepted { call_id }
            | SignalingEvent::PeerRejected { call_id }
            | SignalingEvent::PeerHangup { call_id, .. } => {
                if let Some(entry) = self.calls.get(&call_id) {
                    let _ = entry.handle.peer_event(signal).await;
                } else {
                    warn!(
                        target: "orchestrator.facade",
                        call_id = %call_id,
                        event = ?signal,
                        "signaling event for unknown call dropped"
                    );
                }
            }
        }
    }

    /// An invite for a call we did not originate: spawn an incoming
    /// attempt and surface it to the notification dispatcher.
    fn spawn_incoming_call(&mut self, call_id: CallId, kind: common::types::CallKind) {
        info!(
            target: "orchestrator.facade",
            call_id = %call_id,
            kind = ?kind,
            "incoming call invite"
        );

        let setup = CallSetup {
            call_id,
            kind,
            direction: CallDirection::Incoming,
        };
        let (handle, task) = CallActor::spawn(
            setup,
            self.config.ring_timeout,
            self.config.reconnect_grace,
            self.config.mailbox_buffer,
            self.cancel_token.child_token(),
            self.command_tx.clone(),
            self.notify_tx.clone(),
        );
        self.calls.insert(call_id, CallEntry {
            handle,
            _task: task,
        });

        if self
            .notify_tx
            .try_send(Notification::IncomingCall { call_id, kind })
            .is_err()
        {
            warn!(
                target: "orchestrator.facade",
                call_id = %call_id,
                "notification queue full; incoming-call notification dropped"
            );
        }
    }

    /// Handle one facade message. Returns `true` on shutdown.
    async fn handle_message(&mut self, message: FacadeMessage) -> bool {
        match message {
            FacadeMessage::OpenSession { spec, respond_to } => {
                let _ = respond_to.send(self.open_session(spec));
            }

            FacadeMessage::CloseSession {
                session_id,
                respond_to,
            } => {
                let result = match self.sessions.remove(&session_id) {
                    Some(entry) => {
                        entry.handle.cancel();
                        info!(
                            target: "orchestrator.facade",
                            session_id = %session_id,
                            "session tracking closed"
                        );
                        Ok(())
                    }
                    None => Err(OrchestratorError::SessionNotFound(session_id)),
                };
                let _ = respond_to.send(result);
            }

            FacadeMessage::ResetSession {
                session_id,
                respond_to,
            } => {
                let result = match self.sessions.get(&session_id) {
                    Some(entry) => entry.handle.reset().await,
                    None => Err(OrchestratorError::SessionNotFound(session_id)),
                };
                let _ = respond_to.send(result);
            }

            FacadeMessage::SessionWindowInfo {
                session_id,
                respond_to,
            } => {
                let result = match self.sessions.get(&session_id) {
                    Some(entry) => entry.handle.window().await,
                    None => Err(OrchestratorError::SessionNotFound(session_id)),
                };
                let _ = respond_to.send(result);
            }

            FacadeMessage::StartCall { spec, respond_to } => {
                let _ = respond_to.send(Ok(self.start_call(spec)));
            }

            FacadeMessage::ReleaseCall {
                call_id,
                respond_to,
            } => {
                let result = match self.calls.remove(&call_id) {
                    Some(entry) => {
                        entry.handle.cancel();
                        info!(
                            target: "orchestrator.facade",
                            call_id = %call_id,
                            "call attempt released"
                        );
                        Ok(())
                    }
                    None => Err(OrchestratorError::CallNotFound(call_id)),
                };
                let _ = respond_to.send(result);
            }

            FacadeMessage::CallAttemptInfo {
                call_id,
                respond_to,
            } => {
                let result = match self.calls.get(&call_id) {
                    Some(entry) => entry.handle.attempt().await,
                    None => Err(OrchestratorError::CallNotFound(call_id)),
                };
                let _ = respond_to.send(result);
            }

            FacadeMessage::Dispatch { intent, respond_to } => {
                let result = self.dispatch(intent).await;
                let _ = respond_to.send(result);
            }

            FacadeMessage::SubscribeCall {
                call_id,
                respond_to,
            } => {
                let result = match self.calls.get(&call_id) {
                    Some(entry) => Ok(entry.handle.subscribe()),
                    None => Err(OrchestratorError::CallNotFound(call_id)),
                };
                let _ = respond_to.send(result);
            }

            FacadeMessage::SubscribeSession {
                session_id,
                respond_to,
            } => {
                let result = match self.sessions.get(&session_id) {
                    Some(entry) => Ok(entry.handle.subscribe()),
                    None => Err(OrchestratorError::SessionNotFound(session_id)),
                };
                let _ = respond_to.send(result);
            }

            FacadeMessage::Shutdown { respond_to } => {
                let _ = respond_to.send(());
                return true;
            }
        }
        false
    }

    fn open_session(&mut self, spec: SessionSpec) -> watch::Receiver<WindowSnapshot> {
        let session_id = spec.session_id.clone();

        // Re-opening replaces the tracker; the old window dies with it.
        if let Some(old) = self.sessions.remove(&session_id) {
            warn!(
                target: "orchestrator.facade",
                session_id = %session_id,
                "session already tracked; replacing"
            );
            old.handle.cancel();
        }

        let (handle, task) = InstantSessionActor::spawn(
            spec,
            self.config.response_window,
            self.config.mailbox_buffer,
            self.cancel_token.child_token(),
            self.notify_tx.clone(),
        );
        let snapshots = handle.subscribe();
        self.sessions.insert(session_id.clone(), SessionEntry {
            handle,
            _task: task,
        });

        info!(
            target: "orchestrator.facade",
            session_id = %session_id,
            "session tracking opened"
        );
        snapshots
    }

    fn start_call(&mut self, spec: CallSpec) -> (CallId, watch::Receiver<CallSnapshot>) {
        let call_id = CallId::new();
        let setup = CallSetup {
            call_id,
            kind: spec.kind,
            direction: CallDirection::Outgoing,
        };

        let (handle, task) = CallActor::spawn(
            setup,
            self.config.ring_timeout,
            self.config.reconnect_grace,
            self.config.mailbox_buffer,
            self.cancel_token.child_token(),
            self.command_tx.clone(),
            self.notify_tx.clone(),
        );
        let snapshots = handle.subscribe();
        self.calls.insert(call_id, CallEntry {
            handle,
            _task: task,
        });

        info!(
            target: "orchestrator.facade",
            call_id = %call_id,
            kind = ?spec.kind,
            "outgoing call started"
        );
        (call_id, snapshots)
    }

    /// Route a UI intent. Unknown targets are absorbed as `Ignored`.
    async fn dispatch(&mut self, intent: Intent) -> Result<Dispatched, OrchestratorError> {
        match intent {
            Intent::SendMessage { session_id } => match self.sessions.get(&session_id) {
                Some(entry) => {
                    entry
                        .handle
                        .observe_message(self.credentials.user_id, Utc::now())
                        .await?;
                    Ok(Dispatched::Applied)
                }
                None => {
                    warn!(
                        target: "orchestrator.facade",
                        session_id = %session_id,
                        "send-message intent for untracked session ignored"
                    );
                    Ok(Dispatched::Ignored)
                }
            },

            Intent::AcceptCall { call_id } => match self.calls.get(&call_id) {
                Some(entry) => entry.handle.accept().await,
                None => Ok(self.ignore_call_intent(call_id, "accept")),
            },

            Intent::RejectCall { call_id } => match self.calls.get(&call_id) {
                Some(entry) => entry.handle.reject().await,
                None => Ok(self.ignore_call_intent(call_id, "reject")),
            },

            Intent::HangupCall { call_id } => match self.calls.get(&call_id) {
                Some(entry) => entry.handle.hangup().await,
                None => Ok(self.ignore_call_intent(call_id, "hangup")),
            },
        }
    }

    fn ignore_call_intent(&self, call_id: CallId, intent: &str) -> Dispatched {
        warn!(
            target: "orchestrator.facade",
            call_id = %call_id,
            intent,
            "intent for unknown call ignored"
        );
        Dispatched::Ignored
    }

    async fn shutdown(&mut self) {
        for (_, entry) in self.calls.drain() {
            entry.handle.cancel();
        }
        for (_, entry) in self.sessions.drain() {
            entry.handle.cancel();
        }
        self.cancel_token.cancel();
        self.channel.close().await;
    }
}

/// Poll the event stream when it is still open. The caller guards the
/// select branch with `events.is_some()`, so the `None` arm is unreachable
/// in practice but keeps the future total.
async fn next_event(events: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match events.as_mut() {
        Some(rx) => rx.recv().await,
        None => None,
    }
}
