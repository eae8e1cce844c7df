//! WebPhone core - browser softphone call-session controller
//!
//! This library owns the lifecycle of a signaling session and of the calls
//! riding on top of it: credential fetch, session supervision, a normalized
//! call state machine, one-shot microphone prewarming, and the page-lifetime
//! audio sink pair. It mediates between asynchronous notifications from an
//! external signaling client and user-initiated commands, and never lets
//! the published state claim "connected" before audio is actually flowing.
//!
//! The telephony protocol itself is out of scope: the signaling client is a
//! consumed capability behind the traits in [`client`], and the UI surfaces
//! are external collaborators that issue commands and render the published
//! snapshot.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use webphone_core::{HttpCredentialProvider, WebPhone};
//! # use webphone_core::{MediaSource, SignalingConnector};
//!
//! # async fn example<C: SignalingConnector>(
//! #     connector: C,
//! #     media: Arc<dyn MediaSource>,
//! # ) -> anyhow::Result<()> {
//! let credentials = Arc::new(HttpCredentialProvider::new("https://console.example/webrtc-token")?);
//!
//! let phone = WebPhone::builder(connector, credentials, media).build();
//! phone.connect().await?;
//!
//! let mut snapshots = phone.watch_snapshot();
//! while snapshots.changed().await.is_ok() {
//!     let snap = snapshots.borrow().clone();
//!     if snap.incoming_call.is_some() {
//!         phone.answer_call().await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

/// Controller types and published state
pub mod types;

/// Short-lived signaling credentials
pub mod credentials;

/// The consumed signaling/media capability
pub mod client;

/// Audio sinks and microphone prewarming
pub mod media;

/// Signaling session supervision
pub mod session;

/// The WebPhone controller: call state machine and command surface
pub mod phone;

/// Scripted fakes of the consumed capabilities (requires test-utils feature)
#[cfg(feature = "test-utils")]
pub mod testing;

// Re-export main types at crate root
pub use client::{
    CallHandle, CallNotification, CallOf, ClientConfig, ClientEvent, SignalingClient,
    SignalingConnector, SignalingError,
};
pub use credentials::{
    CredentialError, CredentialSource, HttpCredentialProvider, SignalingAuth,
    SignalingCredentials,
};
pub use media::{
    AudioSink, CaptureConstraints, CaptureStream, MediaBinder, MediaError, MediaSource,
    MicrophonePrewarmer, SinkId, SinkKind, StreamBinding,
};
pub use phone::{WebPhone, WebPhoneBuilder, WebPhoneConfig};
pub use session::{SessionError, SessionManager};
pub use types::{
    CallDirection, CallId, CallInfo, CallState, DtmfDigit, InvalidDtmfDigit, PhoneEvent,
    PhoneSnapshot, RemoteParty, SessionStatus,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::{
        CallHandle, ClientEvent, SignalingClient, SignalingConnector, SignalingError,
    };
    pub use crate::credentials::{CredentialSource, HttpCredentialProvider};
    pub use crate::media::{MediaBinder, MediaSource};
    pub use crate::phone::{WebPhone, WebPhoneBuilder, WebPhoneConfig};
    pub use crate::types::{
        CallInfo, CallState, DtmfDigit, PhoneEvent, PhoneSnapshot, SessionStatus,
    };
}
