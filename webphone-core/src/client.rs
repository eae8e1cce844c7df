//! The consumed signaling/media capability
//!
//! The controller never implements the telephony protocol; it drives an
//! external client library through these traits. A connector turns issued
//! credentials into a live client, the client emits one ordered stream of
//! lifecycle and call notifications, and each call is an opaque handle
//! exposing the per-call operations. The production build wires the vendor
//! SDK behind these traits; the `test-utils` feature ships a scripted
//! implementation.

use crate::credentials::SignalingAuth;
use crate::media::AudioSink;
use crate::types::{CallId, DtmfDigit, RemoteParty};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Signaling errors
#[derive(Error, Debug)]
pub enum SignalingError {
    /// Connection could not be established
    #[error("signaling connection failed: {0}")]
    ConnectFailed(String),

    /// No registered signaling session
    #[error("not connected to the signaling service")]
    NotConnected,

    /// The call this operation targeted no longer exists
    #[error("call {0} no longer exists")]
    CallGone(CallId),

    /// Operation is not offered by this client implementation
    #[error("operation not supported by the signaling client")]
    Unsupported,

    /// Implementation-specific transport failure
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Configuration handed to a connector when establishing a session
///
/// The remote sink is the binder's singleton; every reconnect re-binds the
/// same instance rather than creating a fresh one.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Auth material from the credential endpoint, token-preferred
    pub auth: SignalingAuth,
    /// Playback sink the client attaches remote audio to
    pub remote_sink: Arc<AudioSink>,
}

/// Handle to one call owned by the signaling client
///
/// The handle doubles as the cancellation token for a pending answer:
/// hanging it up while negotiation is in flight abandons the call.
#[async_trait]
pub trait CallHandle: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Identifier of this call
    fn id(&self) -> CallId;

    /// Best-effort far-end identification
    fn remote(&self) -> RemoteParty;

    /// Request answer; two-way audio is established only once the client
    /// reports `active` for this call
    ///
    /// # Errors
    ///
    /// Returns error if the answer request cannot be issued.
    async fn answer(&self) -> Result<(), SignalingError>;

    /// Decline a ringing inbound call
    ///
    /// Clients without a dedicated reject operation inherit this fallback,
    /// which hangs the call up instead.
    ///
    /// # Errors
    ///
    /// Returns error if neither reject nor hangup can be issued.
    async fn reject(&self) -> Result<(), SignalingError> {
        self.hangup().await
    }

    /// Terminate the call, whether or not it ever became active
    ///
    /// # Errors
    ///
    /// Returns error if the hangup cannot be issued.
    async fn hangup(&self) -> Result<(), SignalingError>;

    /// Mute or unmute captured audio
    ///
    /// # Errors
    ///
    /// Returns error if the operation cannot be issued.
    async fn set_muted(&self, muted: bool) -> Result<(), SignalingError>;

    /// Place the call on or off hold
    ///
    /// # Errors
    ///
    /// Returns error if the operation cannot be issued.
    async fn set_held(&self, held: bool) -> Result<(), SignalingError>;

    /// Send one DTMF digit
    ///
    /// # Errors
    ///
    /// Returns error if the digit cannot be forwarded.
    async fn send_dtmf(&self, digit: DtmfDigit) -> Result<(), SignalingError>;

    /// Blind-transfer the call to `target`
    ///
    /// The far end is referred immediately; this endpoint plays no further
    /// part in the transferred call. Attended transfer is not modeled.
    ///
    /// # Errors
    ///
    /// Returns error if the transfer cannot be issued.
    async fn transfer(&self, target: &str) -> Result<(), SignalingError>;
}

/// Per-call notifications from the signaling client
///
/// Delivered in order per call id; the controller never reorders them.
#[derive(Debug, Clone)]
pub enum CallNotification<H: CallHandle> {
    /// A call is ringing: a genuine inbound call, or the ringback echo of
    /// a call this endpoint just placed
    Ringing {
        /// Handle to the ringing call
        call: H,
    },
    /// Media negotiation finished; two-way audio is flowing
    Active {
        /// Which call
        id: CallId,
        /// Authoritative answer time; talk duration starts here
        at: DateTime<Utc>,
    },
    /// Far end hung up
    Hangup {
        /// Which call
        id: CallId,
    },
    /// The client destroyed the call object (final teardown)
    Destroy {
        /// Which call
        id: CallId,
    },
    /// Microphone acquisition failed while the client was setting up media
    UserMediaError {
        /// Which call
        id: CallId,
        /// Client-reported reason
        reason: String,
    },
}

/// Lifecycle and call events from the signaling client
#[derive(Debug, Clone)]
pub enum ClientEvent<H: CallHandle> {
    /// Registration handshake completed
    Ready,
    /// Protocol or registration failure
    Failed {
        /// Client-reported reason
        reason: String,
    },
    /// Underlying socket closed
    SocketClosed,
    /// Per-call notification
    Call(CallNotification<H>),
}

/// A live signaling client
#[async_trait]
pub trait SignalingClient: Send + Sync + 'static {
    /// Call handle type produced by this client
    type Call: CallHandle;

    /// Subscribe to the ordered event stream
    ///
    /// Each subscription observes every event from the moment it is created;
    /// the stream closes when the client is dropped.
    fn subscribe(&self) -> broadcast::Receiver<ClientEvent<Self::Call>>;

    /// Place an outbound call
    ///
    /// # Errors
    ///
    /// Returns error if the client is not connected or the call cannot be
    /// created.
    async fn place_call(&self, destination: &str) -> Result<Self::Call, SignalingError>;

    /// Tear the connection down; safe to call more than once
    async fn disconnect(&self);

    /// Optional microphone warm-up hook
    ///
    /// Clients that pre-acquire capture internally override this; the
    /// default is a no-op so the prewarmer can call it unconditionally.
    ///
    /// # Errors
    ///
    /// Returns error if the client exposes the hook and it fails.
    async fn warm_microphone(&self) -> Result<(), SignalingError> {
        Ok(())
    }
}

/// Factory turning credentials into a live client
///
/// `connect` both configures the client (auth mode, remote sink) and
/// initiates the connection; registration completes asynchronously via the
/// client's `Ready` event.
#[async_trait]
pub trait SignalingConnector: Send + Sync + 'static {
    /// Client type this connector produces
    type Client: SignalingClient;

    /// Configure and start a client
    ///
    /// # Errors
    ///
    /// Returns error if the client cannot be constructed or the connection
    /// cannot be initiated.
    async fn connect(&self, config: ClientConfig) -> Result<Self::Client, SignalingError>;
}

/// Call handle type produced by a connector's client
pub type CallOf<C> =
    <<C as SignalingConnector>::Client as SignalingClient>::Call;
