//! The WebPhone controller: call state machine and command surface
//!
//! Every signaling notification and every user command is a tagged event
//! applied to one discriminated call phase under a single lock, run to
//! completion before the next event is processed. The phase collapses the
//! "did we initiate this call" and "answer pending" markers into its own
//! variants, so there are no auxiliary flags to drift out of sync.
//!
//! ```text
//!          ringing (inbound)              make_call
//!     Idle ────────────────► IncomingRinging        Idle ──► OutboundRinging
//!                                  │ answer_call                  │
//!                                  ▼                              │ active
//!                              Answering ──────► InCall ◄─────────┘
//!                                  │    active      │
//!                                  │ hangup_call    │ hangup_call / hangup /
//!                                  ▼                ▼ destroy
//!                                Idle ◄───────────Idle
//! ```
//!
//! `InCall` is entered only on the client's own `active` notification.
//! Answering is a request; reporting "connected" before media actually
//! flows would be a lie the UI cannot recover from.

use crate::client::{
    CallHandle, CallNotification, CallOf, ClientEvent, SignalingClient, SignalingConnector,
    SignalingError,
};
use crate::credentials::CredentialSource;
use crate::media::{CaptureConstraints, MediaBinder, MediaSource, MicrophonePrewarmer};
use crate::session::{SessionError, SessionManager};
use crate::types::{
    CallDirection, CallId, CallInfo, CallState, DtmfDigit, PhoneEvent, PhoneSnapshot,
    SessionStatus,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

/// Controller configuration
#[derive(Debug, Clone)]
pub struct WebPhoneConfig {
    /// Audio processing requested when prewarming the microphone
    pub capture: CaptureConstraints,
    /// Buffer size of the [`PhoneEvent`] broadcast channel
    pub event_capacity: usize,
}

impl Default for WebPhoneConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConstraints::default(),
            event_capacity: 64,
        }
    }
}

/// The discriminated call slot
///
/// At most one call exists at a time; an unanswered inbound call and an
/// established call never coexist.
#[derive(Debug)]
enum CallPhase<H> {
    Idle,
    IncomingRinging { call: H, info: CallInfo },
    OutboundRinging { call: H, info: CallInfo },
    Answering { call: H, info: CallInfo },
    InCall { call: H, info: CallInfo, muted: bool, held: bool },
}

/// Browser softphone session controller
///
/// Owns the signaling session and the call state machine, publishes a
/// [`PhoneSnapshot`] over a watch channel, and broadcasts [`PhoneEvent`]s
/// for UI side effects. Cheap to clone; clones share all state.
pub struct WebPhone<C: SignalingConnector> {
    session: Arc<SessionManager<C>>,
    phase: Arc<Mutex<CallPhase<CallOf<C>>>>,
    snapshot_tx: Arc<watch::Sender<PhoneSnapshot>>,
    events_tx: broadcast::Sender<PhoneEvent>,
    pump_epoch: Arc<AtomicU64>,
}

impl<C: SignalingConnector> Clone for WebPhone<C> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            phase: self.phase.clone(),
            snapshot_tx: self.snapshot_tx.clone(),
            events_tx: self.events_tx.clone(),
            pump_epoch: self.pump_epoch.clone(),
        }
    }
}

impl<C: SignalingConnector> WebPhone<C> {
    /// Create a builder
    #[must_use]
    pub fn builder(
        connector: C,
        credentials: Arc<dyn CredentialSource>,
        media_source: Arc<dyn MediaSource>,
    ) -> WebPhoneBuilder<C> {
        WebPhoneBuilder::new(connector, credentials, media_source)
    }

    /// Current published snapshot
    #[must_use]
    pub fn snapshot(&self) -> PhoneSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Watch channel over the published snapshot
    #[must_use]
    pub fn watch_snapshot(&self) -> watch::Receiver<PhoneSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Subscribe to UI side-effect events
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<PhoneEvent> {
        self.events_tx.subscribe()
    }

    /// Current session status
    #[must_use]
    pub fn session_status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Watch channel over the session status alone
    #[must_use]
    pub fn watch_session(&self) -> watch::Receiver<SessionStatus> {
        self.session.watch_status()
    }

    /// Own number from the last issued credentials
    pub async fn caller_id_number(&self) -> Option<String> {
        self.session.caller_id_number().await
    }

    /// The audio sink pair, for mounting in the rendering layer
    #[must_use]
    pub fn media_binder(&self) -> Arc<MediaBinder> {
        self.session.binder()
    }

    /// Establish the signaling session
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when credentials cannot be obtained or the
    /// client cannot be constructed; the session is left in `error` and no
    /// retry is attempted.
    #[tracing::instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), SessionError> {
        let result = self.session.connect().await;
        self.finish_start(result).await
    }

    /// Tear down and re-establish the session on explicit user request
    ///
    /// Re-arms the microphone prewarmer so the fresh session gets its own
    /// warm-up cycle.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`connect`](Self::connect).
    #[tracing::instrument(skip(self))]
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        // Whatever call rode the old connection does not survive it
        self.reset_calls("reconnect").await;
        let result = self.session.reconnect().await;
        self.finish_start(result).await
    }

    /// Tear everything down; safe while a connect is still in flight
    pub async fn close(&self) {
        self.reset_calls("shutdown").await;
        self.session.close().await;
        // Invalidate any pump still draining the old stream
        self.pump_epoch.fetch_add(1, Ordering::SeqCst);
        self.emit(PhoneEvent::SessionChanged(self.session.status()));
        self.publish().await;
    }

    async fn finish_start(
        &self,
        result: Result<broadcast::Receiver<ClientEvent<CallOf<C>>>, SessionError>,
    ) -> Result<(), SessionError> {
        let outcome = match result {
            Ok(events) => {
                self.spawn_pump(events);
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.emit(PhoneEvent::SessionChanged(self.session.status()));
        self.publish().await;
        outcome
    }

    fn spawn_pump(&self, mut events: broadcast::Receiver<ClientEvent<CallOf<C>>>) {
        let token = self.pump_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let phone = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        // A newer session owns the controller now; a stale
                        // client's events must not touch its state
                        if phone.pump_epoch.load(Ordering::SeqCst) != token {
                            break;
                        }
                        phone.handle_client_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "signaling event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("signaling event pump stopped");
        });
    }

    /// Apply one client event
    ///
    /// This is the single ordered entry point for everything the signaling
    /// client reports; the connection pump calls it, and embedders wiring a
    /// custom pump may call it directly.
    pub async fn handle_client_event(&self, event: ClientEvent<CallOf<C>>) {
        match event {
            ClientEvent::Ready => {
                self.session.mark_registered().await;
                self.emit(PhoneEvent::SessionChanged(self.session.status()));
            }
            ClientEvent::Failed { reason } => {
                self.session.mark_failed(&reason);
                self.reset_calls("signaling failure").await;
                self.emit(PhoneEvent::SessionChanged(self.session.status()));
            }
            ClientEvent::SocketClosed => {
                self.session.mark_socket_closed();
                self.reset_calls("socket closed").await;
                self.emit(PhoneEvent::SessionChanged(self.session.status()));
            }
            ClientEvent::Call(notification) => {
                let mut phase = self.phase.lock().await;
                self.apply_notification(&mut phase, notification);
            }
        }
        self.publish().await;
    }

    fn apply_notification(
        &self,
        phase: &mut CallPhase<CallOf<C>>,
        notification: CallNotification<CallOf<C>>,
    ) {
        match notification {
            CallNotification::Ringing { call } => match &*phase {
                CallPhase::Idle => {
                    let info = CallInfo {
                        id: call.id(),
                        direction: CallDirection::Inbound,
                        state: CallState::Ringing,
                        remote: call.remote(),
                        start_time: None,
                    };
                    tracing::info!(call_id = %info.id, remote = %info.remote.number, "incoming call");
                    self.emit(PhoneEvent::IncomingCall(info.clone()));
                    *phase = CallPhase::IncomingRinging { call, info };
                }
                CallPhase::OutboundRinging { info, .. } if info.id == call.id() => {
                    // Ringback echo of the call we just placed, not a new
                    // inbound call
                }
                _ => {
                    tracing::debug!(call_id = %call.id(), "ignoring ring while call slot occupied");
                }
            },
            CallNotification::Active { id, at } => {
                let current = std::mem::replace(phase, CallPhase::Idle);
                *phase = match current {
                    CallPhase::Answering { call, mut info }
                    | CallPhase::OutboundRinging { call, mut info }
                        if call.id() == id =>
                    {
                        info.state = CallState::Active;
                        info.start_time = Some(at);
                        tracing::info!(call_id = %id, "call active");
                        self.emit(PhoneEvent::CallStarted(info.clone()));
                        CallPhase::InCall {
                            call,
                            info,
                            muted: false,
                            held: false,
                        }
                    }
                    other => {
                        tracing::debug!(call_id = %id, "ignoring active notification for unknown call");
                        other
                    }
                };
            }
            CallNotification::Hangup { id } | CallNotification::Destroy { id } => {
                self.end_if_current(phase, &id);
            }
            CallNotification::UserMediaError { id, reason } => {
                // The client's own failure path tears the call down; this
                // only surfaces the cause
                tracing::warn!(call_id = %id, reason = %reason, "user media error");
                self.emit(PhoneEvent::MediaWarning(reason));
            }
        }
    }

    /// The single reset point: every non-idle phase ends here
    fn end_if_current(&self, phase: &mut CallPhase<CallOf<C>>, id: &CallId) {
        let current = std::mem::replace(phase, CallPhase::Idle);
        let info = match current {
            CallPhase::IncomingRinging { call, info }
            | CallPhase::OutboundRinging { call, info }
            | CallPhase::Answering { call, info }
                if call.id() == *id =>
            {
                info
            }
            CallPhase::InCall { call, info, .. } if call.id() == *id => info,
            other => {
                tracing::debug!(call_id = %id, "ignoring teardown for unknown call");
                *phase = other;
                return;
            }
        };
        let info = CallInfo {
            state: CallState::Ended,
            ..info
        };
        tracing::info!(call_id = %info.id, "call ended");
        self.emit(PhoneEvent::CallEnded(info));
    }

    /// Place an outbound call
    ///
    /// No-op when a call is already in progress. The call slot is marked
    /// self-initiated before the client can deliver this call's own ringing
    /// notification, so ringback is never mistaken for an inbound call.
    ///
    /// # Errors
    ///
    /// Returns [`SignalingError::NotConnected`] without a registered
    /// session, or the client's error when the call cannot be placed.
    #[tracing::instrument(skip(self))]
    pub async fn make_call(&self, destination: &str) -> Result<(), SignalingError> {
        if self.session.status() != SessionStatus::Registered {
            return Err(SignalingError::NotConnected);
        }
        let Some(client) = self.session.client().await else {
            return Err(SignalingError::NotConnected);
        };

        let mut phase = self.phase.lock().await;
        if !matches!(*phase, CallPhase::Idle) {
            tracing::debug!("make_call ignored: a call is already in progress");
            return Ok(());
        }
        // The lock is held across the await, so the self-initiated slot is
        // in place before any notification for this call can be applied
        let call = client.place_call(destination).await?;
        let info = CallInfo {
            id: call.id(),
            direction: CallDirection::Outbound,
            state: CallState::Ringing,
            remote: call.remote(),
            start_time: None,
        };
        tracing::info!(call_id = %info.id, "outbound call placed");
        *phase = CallPhase::OutboundRinging { call, info };
        drop(phase);
        self.publish().await;
        Ok(())
    }

    /// Answer the pending inbound call
    ///
    /// Issues the answer request and moves to `answering`; the call becomes
    /// active only when the client reports it. No-op without a pending
    /// inbound call.
    ///
    /// # Errors
    ///
    /// Returns the client's error when the answer request cannot be issued;
    /// the machine stays in `answering` and the client's own failure path
    /// delivers the teardown.
    pub async fn answer_call(&self) -> Result<(), SignalingError> {
        let mut phase = self.phase.lock().await;
        let current = std::mem::replace(&mut *phase, CallPhase::Idle);
        match current {
            CallPhase::IncomingRinging { call, mut info } => {
                info.state = CallState::Answering;
                *phase = CallPhase::Answering {
                    call: call.clone(),
                    info,
                };
                let result = call.answer().await;
                if let Err(e) = &result {
                    tracing::warn!(call_id = %call.id(), error = %e, "answer request failed");
                }
                drop(phase);
                self.publish().await;
                result
            }
            other => {
                *phase = other;
                tracing::debug!("answer_call ignored: no pending incoming call");
                Ok(())
            }
        }
    }

    /// Decline the pending inbound call
    ///
    /// The incoming slot is cleared immediately; the reject (or its hangup
    /// fallback) only affects the far end. No-op without a pending call.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for signature stability with the
    /// other commands.
    pub async fn reject_call(&self) -> Result<(), SignalingError> {
        let mut phase = self.phase.lock().await;
        let current = std::mem::replace(&mut *phase, CallPhase::Idle);
        match current {
            CallPhase::IncomingRinging { call, mut info } => {
                info.state = CallState::Ended;
                tracing::info!(call_id = %info.id, "rejecting incoming call");
                self.emit(PhoneEvent::CallEnded(info));
                if let Err(e) = call.reject().await {
                    tracing::warn!(call_id = %call.id(), error = %e, "reject failed");
                }
                drop(phase);
                self.publish().await;
                Ok(())
            }
            other => {
                *phase = other;
                tracing::debug!("reject_call ignored: no pending incoming call");
                Ok(())
            }
        }
    }

    /// Hang up the current call
    ///
    /// In `answering` this cancels the pending answer by hanging up the
    /// not-yet-active call; the handle is the cancellation token. In
    /// `outbound-ringing` it abandons the attempt. No-op when idle or when
    /// the only call is inbound-ringing (that one is rejected, not hung up).
    ///
    /// # Errors
    ///
    /// Infallible today; a failed hangup is logged and the local teardown
    /// stands.
    pub async fn hangup_call(&self) -> Result<(), SignalingError> {
        let mut phase = self.phase.lock().await;
        let current = std::mem::replace(&mut *phase, CallPhase::Idle);
        let (call, info) = match current {
            CallPhase::Answering { call, info }
            | CallPhase::OutboundRinging { call, info } => (call, info),
            CallPhase::InCall { call, info, .. } => (call, info),
            other => {
                *phase = other;
                tracing::debug!("hangup_call ignored: nothing to hang up");
                return Ok(());
            }
        };
        let info = CallInfo {
            state: CallState::Ended,
            ..info
        };
        tracing::info!(call_id = %info.id, "hanging up");
        self.emit(PhoneEvent::CallEnded(info));
        if let Err(e) = call.hangup().await {
            tracing::warn!(call_id = %call.id(), error = %e, "hangup failed");
        }
        drop(phase);
        self.publish().await;
        Ok(())
    }

    /// Toggle microphone mute on the active call
    ///
    /// Flag-only: no state transition. The flag flips only after the client
    /// operation succeeds. No-op without an active, un-held call.
    ///
    /// # Errors
    ///
    /// Returns the client's error when the mute operation fails; the flag
    /// is left unchanged.
    pub async fn toggle_mute(&self) -> Result<(), SignalingError> {
        let mut phase = self.phase.lock().await;
        if let CallPhase::InCall {
            call,
            info,
            muted,
            held: false,
        } = &mut *phase
        {
            let next = !*muted;
            call.set_muted(next).await?;
            *muted = next;
            tracing::debug!(call_id = %info.id, muted = next, "mute toggled");
            drop(phase);
            self.publish().await;
        } else {
            tracing::debug!("toggle_mute ignored: no active call");
        }
        Ok(())
    }

    /// Toggle hold on the active call
    ///
    /// Flag-only: the call stays in the single active slot. The flag flips
    /// only after the client operation succeeds. No-op without an
    /// established call.
    ///
    /// # Errors
    ///
    /// Returns the client's error when the hold operation fails; the flag
    /// is left unchanged.
    pub async fn toggle_hold(&self) -> Result<(), SignalingError> {
        let mut phase = self.phase.lock().await;
        if let CallPhase::InCall {
            call, info, held, ..
        } = &mut *phase
        {
            let next = !*held;
            call.set_held(next).await?;
            *held = next;
            tracing::debug!(call_id = %info.id, held = next, "hold toggled");
            drop(phase);
            self.publish().await;
        } else {
            tracing::debug!("toggle_hold ignored: no established call");
        }
        Ok(())
    }

    /// Send one DTMF digit on the active call
    ///
    /// No state change; no-op without an active, un-held call.
    ///
    /// # Errors
    ///
    /// Returns the client's error when the digit cannot be forwarded.
    pub async fn send_dtmf(&self, digit: DtmfDigit) -> Result<(), SignalingError> {
        let phase = self.phase.lock().await;
        if let CallPhase::InCall {
            call, held: false, ..
        } = &*phase
        {
            call.send_dtmf(digit).await?;
            tracing::debug!(call_id = %call.id(), digit = %digit, "DTMF digit sent");
        } else {
            tracing::debug!("send_dtmf ignored: no active call");
        }
        Ok(())
    }

    /// Blind-transfer the active call to `target`
    ///
    /// No local state change: the transferred call is not modeled as a new
    /// call slot, and teardown arrives through the normal notifications.
    /// No-op without an active, un-held call.
    ///
    /// # Errors
    ///
    /// Returns the client's error when the transfer cannot be issued.
    #[tracing::instrument(skip(self))]
    pub async fn transfer_call(&self, target: &str) -> Result<(), SignalingError> {
        let phase = self.phase.lock().await;
        if let CallPhase::InCall {
            call, held: false, ..
        } = &*phase
        {
            call.transfer(target).await?;
            tracing::info!(call_id = %call.id(), "blind transfer issued");
        } else {
            tracing::debug!("transfer_call ignored: no active call");
        }
        Ok(())
    }

    async fn reset_calls(&self, reason: &str) {
        let mut phase = self.phase.lock().await;
        let current = std::mem::replace(&mut *phase, CallPhase::Idle);
        let info = match current {
            CallPhase::Idle => return,
            CallPhase::IncomingRinging { info, .. }
            | CallPhase::OutboundRinging { info, .. }
            | CallPhase::Answering { info, .. } => info,
            CallPhase::InCall { info, .. } => info,
        };
        let info = CallInfo {
            state: CallState::Ended,
            ..info
        };
        tracing::info!(call_id = %info.id, reason, "call state reset");
        self.emit(PhoneEvent::CallEnded(info));
    }

    async fn publish(&self) {
        let session = self.session.status();
        let caller_id_number = self.session.caller_id_number().await;
        let phase = self.phase.lock().await;
        let mut snapshot = PhoneSnapshot {
            session,
            caller_id_number,
            ..PhoneSnapshot::default()
        };
        match &*phase {
            CallPhase::Idle => {}
            CallPhase::IncomingRinging { info, .. } | CallPhase::Answering { info, .. } => {
                snapshot.incoming_call = Some(info.clone());
            }
            CallPhase::OutboundRinging { info, .. } => {
                snapshot.outbound_call = Some(info.clone());
            }
            CallPhase::InCall {
                info, muted, held, ..
            } => {
                let mut info = info.clone();
                info.state = if *held {
                    CallState::Held
                } else {
                    CallState::Active
                };
                snapshot.is_muted = *muted;
                snapshot.is_on_hold = *held;
                snapshot.active_call = Some(info);
            }
        }
        drop(phase);
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn emit(&self, event: PhoneEvent) {
        // Nobody listening is fine
        let _ = self.events_tx.send(event);
    }
}

/// Builder for [`WebPhone`]
pub struct WebPhoneBuilder<C: SignalingConnector> {
    connector: C,
    credentials: Arc<dyn CredentialSource>,
    media_source: Arc<dyn MediaSource>,
    binder: Arc<MediaBinder>,
    config: WebPhoneConfig,
}

impl<C: SignalingConnector> WebPhoneBuilder<C> {
    /// Create a builder with a fresh media binder and default configuration
    #[must_use]
    pub fn new(
        connector: C,
        credentials: Arc<dyn CredentialSource>,
        media_source: Arc<dyn MediaSource>,
    ) -> Self {
        Self {
            connector,
            credentials,
            media_source,
            binder: Arc::new(MediaBinder::new()),
            config: WebPhoneConfig::default(),
        }
    }

    /// Replace the configuration
    #[must_use]
    pub fn with_config(mut self, config: WebPhoneConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing media binder (e.g. one the rendering layer already
    /// mounted)
    #[must_use]
    pub fn with_binder(mut self, binder: Arc<MediaBinder>) -> Self {
        self.binder = binder;
        self
    }

    /// Build the controller in the disconnected state
    #[must_use]
    pub fn build(self) -> WebPhone<C> {
        let prewarmer = MicrophonePrewarmer::new(self.media_source, self.config.capture.clone());
        let session = Arc::new(SessionManager::new(
            self.connector,
            self.credentials,
            self.binder,
            prewarmer,
        ));
        let (snapshot_tx, _) = watch::channel(PhoneSnapshot::default());
        let (events_tx, _) = broadcast::channel(self.config.event_capacity);
        WebPhone {
            session,
            phase: Arc::new(Mutex::new(CallPhase::Idle)),
            snapshot_tx: Arc::new(snapshot_tx),
            events_tx,
            pump_epoch: Arc::new(AtomicU64::new(0)),
        }
    }
}
