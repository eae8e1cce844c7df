//! Scripted implementations of the consumed capabilities
//!
//! Everything the controller consumes (connector, client, call handles,
//! credential source, capture source) has a scripted stand-in here. The
//! fakes record what was asked of them and let a driver emit any event
//! sequence, which is what the state-machine test suite and the demo CLI
//! are built on. Gated behind the `test-utils` feature.

use crate::client::{
    CallHandle, CallNotification, ClientConfig, ClientEvent, SignalingClient, SignalingConnector,
    SignalingError,
};
use crate::credentials::{
    CredentialError, CredentialSource, SignalingAuth, SignalingCredentials,
};
use crate::media::{CaptureConstraints, CaptureStream, MediaError, MediaSource, SinkId};
use crate::types::{CallDirection, CallId, DtmfDigit, RemoteParty};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Credential source with a fixed answer
pub struct StaticCredentialSource {
    response: Option<SignalingCredentials>,
}

impl StaticCredentialSource {
    /// Always issues the given token
    #[must_use]
    pub fn token(token: &str, caller_id_number: Option<&str>) -> Self {
        Self {
            response: Some(SignalingCredentials {
                auth: SignalingAuth::Token(token.to_string()),
                caller_id_number: caller_id_number.map(str::to_string),
            }),
        }
    }

    /// Always issues the given username/password pair
    #[must_use]
    pub fn password(username: &str, password: &str) -> Self {
        Self {
            response: Some(SignalingCredentials {
                auth: SignalingAuth::Password {
                    username: username.to_string(),
                    password: password.to_string(),
                },
                caller_id_number: None,
            }),
        }
    }

    /// Always fails as if the backend returned no usable auth material
    #[must_use]
    pub fn missing() -> Self {
        Self { response: None }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn fetch(&self) -> Result<SignalingCredentials, CredentialError> {
        self.response.clone().ok_or(CredentialError::MissingAuth)
    }
}

/// Capture source that counts acquisitions and releases
#[derive(Default)]
pub struct FakeMediaSource {
    deny: AtomicBool,
    acquisitions: AtomicUsize,
    releases: Arc<AtomicUsize>,
}

impl FakeMediaSource {
    /// Create a granting source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make future acquisitions fail as permission-denied
    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// How many streams were acquired
    #[must_use]
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// How many streams were released
    #[must_use]
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

struct FakeCaptureStream {
    releases: Arc<AtomicUsize>,
}

impl CaptureStream for FakeCaptureStream {
    fn release(self: Box<Self>) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn track_count(&self) -> usize {
        1
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire_audio(
        &self,
        _constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, MediaError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCaptureStream {
            releases: self.releases.clone(),
        }))
    }
}

/// One recorded call operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOp {
    /// `answer()` was issued
    Answer,
    /// Dedicated `reject()` was issued
    Reject,
    /// `hangup()` was issued
    Hangup,
    /// Mute state was set
    Mute(bool),
    /// Hold state was set
    Hold(bool),
    /// A DTMF digit was forwarded
    Dtmf(char),
    /// A blind transfer was issued
    Transfer(String),
}

#[derive(Debug)]
struct ScriptedCallInner {
    id: CallId,
    remote: RemoteParty,
    direction: CallDirection,
    supports_reject: bool,
    fail_ops: AtomicBool,
    ops: Mutex<Vec<CallOp>>,
}

/// Recording call handle
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    inner: Arc<ScriptedCallInner>,
}

impl ScriptedCall {
    fn new(remote: RemoteParty, direction: CallDirection, supports_reject: bool) -> Self {
        Self {
            inner: Arc::new(ScriptedCallInner {
                id: CallId::new(format!("call-{}", Uuid::new_v4())),
                remote,
                direction,
                supports_reject,
                fail_ops: AtomicBool::new(false),
                ops: Mutex::new(Vec::new()),
            }),
        }
    }

    /// An inbound call with a dedicated reject operation
    #[must_use]
    pub fn inbound(number: &str, display_name: &str) -> Self {
        Self::new(
            RemoteParty::named(number, display_name),
            CallDirection::Inbound,
            true,
        )
    }

    /// An inbound call whose client has no reject operation, so the
    /// default hangup fallback applies
    #[must_use]
    pub fn inbound_without_reject(number: &str, display_name: &str) -> Self {
        Self::new(
            RemoteParty::named(number, display_name),
            CallDirection::Inbound,
            false,
        )
    }

    fn outbound(destination: &str) -> Self {
        Self::new(
            RemoteParty::new(destination),
            CallDirection::Outbound,
            true,
        )
    }

    /// Which way this call was scripted
    #[must_use]
    pub fn direction(&self) -> CallDirection {
        self.inner.direction
    }

    /// Make every subsequent operation on this handle fail
    pub fn fail_operations(&self, fail: bool) {
        self.inner.fail_ops.store(fail, Ordering::SeqCst);
    }

    /// Everything issued on this handle, in order
    #[must_use]
    pub fn ops(&self) -> Vec<CallOp> {
        self.inner.ops.lock().clone()
    }

    fn record(&self, op: CallOp) -> Result<(), SignalingError> {
        if self.inner.fail_ops.load(Ordering::SeqCst) {
            return Err(SignalingError::Transport(anyhow::anyhow!(
                "scripted operation failure"
            )));
        }
        self.inner.ops.lock().push(op);
        Ok(())
    }
}

#[async_trait]
impl CallHandle for ScriptedCall {
    fn id(&self) -> CallId {
        self.inner.id.clone()
    }

    fn remote(&self) -> RemoteParty {
        self.inner.remote.clone()
    }

    async fn answer(&self) -> Result<(), SignalingError> {
        self.record(CallOp::Answer)
    }

    async fn reject(&self) -> Result<(), SignalingError> {
        if !self.inner.supports_reject {
            return self.hangup().await;
        }
        self.record(CallOp::Reject)
    }

    async fn hangup(&self) -> Result<(), SignalingError> {
        self.record(CallOp::Hangup)
    }

    async fn set_muted(&self, muted: bool) -> Result<(), SignalingError> {
        self.record(CallOp::Mute(muted))
    }

    async fn set_held(&self, held: bool) -> Result<(), SignalingError> {
        self.record(CallOp::Hold(held))
    }

    async fn send_dtmf(&self, digit: DtmfDigit) -> Result<(), SignalingError> {
        self.record(CallOp::Dtmf(digit.as_char()))
    }

    async fn transfer(&self, target: &str) -> Result<(), SignalingError> {
        self.record(CallOp::Transfer(target.to_string()))
    }
}

struct ScriptedClientInner {
    auth: SignalingAuth,
    remote_sink_id: SinkId,
    events: broadcast::Sender<ClientEvent<ScriptedCall>>,
    placed: Mutex<Vec<ScriptedCall>>,
    fail_next_place: AtomicBool,
    disconnects: AtomicUsize,
    warm_calls: AtomicUsize,
}

/// Scripted signaling client
///
/// Events are not emitted spontaneously; the test (or demo) drives the
/// stream through the `emit_*` helpers.
#[derive(Clone)]
pub struct ScriptedClient {
    inner: Arc<ScriptedClientInner>,
}

impl ScriptedClient {
    fn new(config: &ClientConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(ScriptedClientInner {
                auth: config.auth.clone(),
                remote_sink_id: config.remote_sink.id(),
                events,
                placed: Mutex::new(Vec::new()),
                fail_next_place: AtomicBool::new(false),
                disconnects: AtomicUsize::new(0),
                warm_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Auth material this client was configured with
    #[must_use]
    pub fn auth(&self) -> SignalingAuth {
        self.inner.auth.clone()
    }

    /// Id of the remote sink attached at connect time
    #[must_use]
    pub fn remote_sink_id(&self) -> SinkId {
        self.inner.remote_sink_id
    }

    /// Calls placed through this client, in order
    #[must_use]
    pub fn placed_calls(&self) -> Vec<ScriptedCall> {
        self.inner.placed.lock().clone()
    }

    /// Fail the next `place_call`
    pub fn fail_next_place(&self) {
        self.inner.fail_next_place.store(true, Ordering::SeqCst);
    }

    /// How many times `disconnect` was called
    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    /// How many times the microphone warm-up hook was called
    #[must_use]
    pub fn warm_microphone_calls(&self) -> usize {
        self.inner.warm_calls.load(Ordering::SeqCst)
    }

    /// Emit a raw event on the stream
    pub fn emit(&self, event: ClientEvent<ScriptedCall>) {
        let _ = self.inner.events.send(event);
    }

    /// Report registration completed
    pub fn emit_ready(&self) {
        self.emit(ClientEvent::Ready);
    }

    /// Report a protocol failure
    pub fn emit_failed(&self, reason: &str) {
        self.emit(ClientEvent::Failed {
            reason: reason.to_string(),
        });
    }

    /// Report the socket closing
    pub fn emit_socket_closed(&self) {
        self.emit(ClientEvent::SocketClosed);
    }

    /// Script an inbound call: creates the handle and emits its ring
    pub fn ring_in(&self, number: &str, display_name: &str) -> ScriptedCall {
        let call = ScriptedCall::inbound(number, display_name);
        self.emit(ClientEvent::Call(CallNotification::Ringing {
            call: call.clone(),
        }));
        call
    }

    /// Report media negotiation finished for the given call
    pub fn emit_active(&self, call: &ScriptedCall) {
        self.emit(ClientEvent::Call(CallNotification::Active {
            id: call.id(),
            at: Utc::now(),
        }));
    }

    /// Report the far end hanging up
    pub fn emit_hangup(&self, id: &CallId) {
        self.emit(ClientEvent::Call(CallNotification::Hangup { id: id.clone() }));
    }

    /// Report final call teardown
    pub fn emit_destroy(&self, id: &CallId) {
        self.emit(ClientEvent::Call(CallNotification::Destroy { id: id.clone() }));
    }

    /// Report a mid-setup microphone failure
    pub fn emit_user_media_error(&self, id: &CallId, reason: &str) {
        self.emit(ClientEvent::Call(CallNotification::UserMediaError {
            id: id.clone(),
            reason: reason.to_string(),
        }));
    }
}

#[async_trait]
impl SignalingClient for ScriptedClient {
    type Call = ScriptedCall;

    fn subscribe(&self) -> broadcast::Receiver<ClientEvent<ScriptedCall>> {
        self.inner.events.subscribe()
    }

    async fn place_call(&self, destination: &str) -> Result<ScriptedCall, SignalingError> {
        if self.inner.fail_next_place.swap(false, Ordering::SeqCst) {
            return Err(SignalingError::Transport(anyhow::anyhow!(
                "scripted dial failure"
            )));
        }
        let call = ScriptedCall::outbound(destination);
        self.inner.placed.lock().push(call.clone());
        Ok(call)
    }

    async fn disconnect(&self) {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn warm_microphone(&self) -> Result<(), SignalingError> {
        self.inner.warm_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct ConnectorInner {
    fail_next: AtomicBool,
    attempts: AtomicUsize,
    clients: Mutex<Vec<ScriptedClient>>,
}

/// Scripted connector handing out [`ScriptedClient`]s
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    inner: Arc<ConnectorInner>,
}

impl ScriptedConnector {
    /// Create a connector that succeeds until told otherwise
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `connect`
    pub fn fail_next_connect(&self) {
        self.inner.fail_next.store(true, Ordering::SeqCst);
    }

    /// How many times `connect` was attempted, failures included
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// The most recently constructed client
    #[must_use]
    pub fn last_client(&self) -> Option<ScriptedClient> {
        self.inner.clients.lock().last().cloned()
    }
}

#[async_trait]
impl SignalingConnector for ScriptedConnector {
    type Client = ScriptedClient;

    async fn connect(&self, config: ClientConfig) -> Result<ScriptedClient, SignalingError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SignalingError::ConnectFailed(
                "scripted connect failure".to_string(),
            ));
        }
        let client = ScriptedClient::new(&config);
        self.inner.clients.lock().push(client.clone());
        Ok(client)
    }
}
