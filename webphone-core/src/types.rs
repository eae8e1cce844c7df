//! Controller types and published state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier of a call, as issued by the signaling layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(String);

impl CallId {
    /// Wrap an identifier received from the signaling layer
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Direction of a call relative to this endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// Call arrived from the network
    Inbound,
    /// Call was placed from this endpoint
    Outbound,
}

/// Normalized call state as published to the UI
///
/// This is the controller's own view, distinct from whatever raw states the
/// signaling client reports. `Active` is entered only on the client's own
/// `active` notification, never as a direct effect of a user command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// Call is ringing (inbound alerting or outbound ringback)
    Ringing,
    /// Answer was requested; media negotiation still pending
    Answering,
    /// Two-way audio established
    Active,
    /// Active call currently on hold
    Held,
    /// Call is over
    Ended,
}

impl CallState {
    /// Stable lowercase name, for logs and UI bridges
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ringing => "ringing",
            Self::Answering => "answering",
            Self::Active => "active",
            Self::Held => "held",
            Self::Ended => "ended",
        }
    }
}

/// Best-effort identification of the far end of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParty {
    /// Remote number, `"Unknown"` when the signaling layer omitted it
    pub number: String,
    /// Remote display name, `"Unknown"` when not provided
    pub display_name: String,
}

const UNKNOWN_PARTY: &str = "Unknown";

impl RemoteParty {
    /// Party known only by number; the display name falls back to the number
    pub fn new(number: impl Into<String>) -> Self {
        let number = non_empty_or_unknown(number.into());
        Self {
            display_name: number.clone(),
            number,
        }
    }

    /// Party with both number and display name, empty fields normalized
    pub fn named(number: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            number: non_empty_or_unknown(number.into()),
            display_name: non_empty_or_unknown(display_name.into()),
        }
    }

    /// Entirely unidentified party
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            number: UNKNOWN_PARTY.to_string(),
            display_name: UNKNOWN_PARTY.to_string(),
        }
    }
}

fn non_empty_or_unknown(s: String) -> String {
    if s.trim().is_empty() {
        UNKNOWN_PARTY.to_string()
    } else {
        s
    }
}

/// Snapshot of one call as observed by the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
    /// Identifier from the signaling layer
    pub id: CallId,
    /// Inbound or outbound
    pub direction: CallDirection,
    /// Normalized state
    pub state: CallState,
    /// Far-end identification
    pub remote: RemoteParty,
    /// Set when the call became active; duration is measured from here,
    /// not from when the call first rang
    pub start_time: Option<DateTime<Utc>>,
}

impl CallInfo {
    /// Elapsed talk time, `None` until the call has been answered
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.start_time.map(|start| Utc::now() - start)
    }
}

/// Lifecycle state of the signaling session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No connection and none in progress
    Disconnected,
    /// Credential fetch or registration handshake in progress
    Connecting,
    /// Registered with the signaling service; calls can be placed
    Registered,
    /// Connection attempt or established session failed; waiting for an
    /// explicit reconnect
    Error,
}

impl SessionStatus {
    /// Stable lowercase name, for logs and UI bridges
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Registered => "registered",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated DTMF digit (`0`-`9`, `*`, `#`, `A`-`D`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtmfDigit(char);

impl DtmfDigit {
    /// The digit as a character
    #[must_use]
    pub fn as_char(&self) -> char {
        self.0
    }
}

/// Error for characters outside the DTMF alphabet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("not a DTMF digit: {0:?}")]
pub struct InvalidDtmfDigit(pub char);

impl TryFrom<char> for DtmfDigit {
    type Error = InvalidDtmfDigit;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        match value {
            '0'..='9' | '*' | '#' | 'A'..='D' => Ok(Self(value)),
            'a'..='d' => Ok(Self(value.to_ascii_uppercase())),
            other => Err(InvalidDtmfDigit(other)),
        }
    }
}

impl std::fmt::Display for DtmfDigit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The complete UI-observable state of the controller
///
/// Published over a watch channel; every mutation of the session or of the
/// call machine replaces the whole snapshot, so the UI can never observe a
/// half-applied transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneSnapshot {
    /// Signaling session state
    pub session: SessionStatus,
    /// Own number, populated once credentials have been issued
    pub caller_id_number: Option<String>,
    /// The established call, if any; non-null only between the client's
    /// `active` notification and call teardown
    pub active_call: Option<CallInfo>,
    /// An unanswered inbound call (ringing or answering), if any
    pub incoming_call: Option<CallInfo>,
    /// A self-initiated call still ringing at the far end, if any
    pub outbound_call: Option<CallInfo>,
    /// Whether the active call is muted; always `false` without one
    pub is_muted: bool,
    /// Whether the active call is on hold; always `false` without one
    pub is_on_hold: bool,
}

impl Default for PhoneSnapshot {
    fn default() -> Self {
        Self {
            session: SessionStatus::Disconnected,
            caller_id_number: None,
            active_call: None,
            incoming_call: None,
            outbound_call: None,
            is_muted: false,
            is_on_hold: false,
        }
    }
}

/// Notifications for UI side effects (toasts, ringtones)
///
/// Strictly additive to [`PhoneSnapshot`]; rendering only from the snapshot
/// stays correct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhoneEvent {
    /// Session status changed
    SessionChanged(SessionStatus),
    /// A new inbound call started ringing
    IncomingCall(CallInfo),
    /// A call reached two-way audio
    CallStarted(CallInfo),
    /// A call ended, by either side
    CallEnded(CallInfo),
    /// Microphone acquisition failed mid-call; the call itself is torn down
    /// by the signaling client's own failure path
    MediaWarning(String),
}
