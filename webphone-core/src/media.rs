//! Audio sinks and microphone prewarming
//!
//! Two concerns live here. The [`MediaBinder`] owns the page-lifetime pair
//! of audio sinks (local capture monitor, remote playback) that both the
//! signaling client and the rendering layer bind to. The
//! [`MicrophonePrewarmer`] pays the browser permission-prompt cost once per
//! registered session so the real answer path stays fast.

use crate::client::SignalingClient;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Media-related errors
#[derive(Error, Debug)]
pub enum MediaError {
    /// User or platform denied microphone access
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No usable capture device
    #[error("no audio capture device available")]
    NoDevice,

    /// Acquisition failed for another reason
    #[error("audio capture failed: {0}")]
    CaptureFailed(String),
}

/// Which end of the audio path a sink terminates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// Monitors locally captured audio
    Local,
    /// Plays remote-party audio
    Remote,
}

impl SinkKind {
    /// Stable lowercase name, for logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Identifier of an audio sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(Uuid);

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a media stream attached to a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBinding {
    /// Identifier of the underlying stream
    pub stream_id: String,
}

impl StreamBinding {
    /// Binding for the stream with the given id
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }
}

/// One playback/capture endpoint, owned by the [`MediaBinder`]
///
/// Attaching is idempotent by stream id: re-attaching the stream that is
/// already bound reports no change, so double-wiring cannot duplicate
/// playback.
#[derive(Debug)]
pub struct AudioSink {
    id: SinkId,
    kind: SinkKind,
    binding: parking_lot::Mutex<Option<StreamBinding>>,
}

impl AudioSink {
    fn new(kind: SinkKind) -> Arc<Self> {
        Arc::new(Self {
            id: SinkId(Uuid::new_v4()),
            kind,
            binding: parking_lot::Mutex::new(None),
        })
    }

    /// Identifier of this sink
    #[must_use]
    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Local or remote
    #[must_use]
    pub fn kind(&self) -> SinkKind {
        self.kind
    }

    /// Attach a stream, replacing any different one already bound
    ///
    /// Returns whether the binding changed.
    pub fn attach(&self, binding: StreamBinding) -> bool {
        let mut current = self.binding.lock();
        if current.as_ref() == Some(&binding) {
            tracing::debug!(sink = %self.id, stream = %binding.stream_id, "stream already bound");
            return false;
        }
        tracing::debug!(
            sink = %self.id,
            kind = self.kind.as_str(),
            stream = %binding.stream_id,
            "binding stream to sink"
        );
        *current = Some(binding);
        true
    }

    /// Detach the current stream, if any
    pub fn detach(&self) -> Option<StreamBinding> {
        self.binding.lock().take()
    }

    /// The currently bound stream, if any
    #[must_use]
    pub fn current(&self) -> Option<StreamBinding> {
        self.binding.lock().clone()
    }
}

/// Owner of the two audio sinks for the whole page lifetime
///
/// Sinks are created lazily on first need and never replaced; repeated
/// session reconnects hand the same remote sink to every client. The binder
/// is passed explicitly to whatever constructs the session manager rather
/// than living in a module-level global.
#[derive(Debug, Default)]
pub struct MediaBinder {
    local: OnceCell<Arc<AudioSink>>,
    remote: OnceCell<Arc<AudioSink>>,
}

impl MediaBinder {
    /// Create a binder with no sinks yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The local capture-monitor sink, created on first call
    #[must_use]
    pub fn local_sink(&self) -> Arc<AudioSink> {
        self.local
            .get_or_init(|| AudioSink::new(SinkKind::Local))
            .clone()
    }

    /// The remote playback sink, created on first call
    #[must_use]
    pub fn remote_sink(&self) -> Arc<AudioSink> {
        self.remote
            .get_or_init(|| AudioSink::new(SinkKind::Remote))
            .clone()
    }

    /// Attach a stream to the local sink; returns whether anything changed
    pub fn attach_local(&self, binding: StreamBinding) -> bool {
        self.local_sink().attach(binding)
    }

    /// Attach a stream to the remote sink; returns whether anything changed
    pub fn attach_remote(&self, binding: StreamBinding) -> bool {
        self.remote_sink().attach(binding)
    }
}

/// Requested audio processing for capture streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Cancel far-end echo
    pub echo_cancellation: bool,
    /// Suppress stationary background noise
    pub noise_suppression: bool,
    /// Automatic input gain
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// A live capture stream; dropping without [`release`](Self::release) leaks
/// the device indicator, so the prewarmer always releases explicitly
pub trait CaptureStream: Send {
    /// Stop every track and free the device
    fn release(self: Box<Self>);

    /// Number of audio tracks in the stream
    fn track_count(&self) -> usize;
}

/// Source of capture streams (the platform's user-media facility)
#[async_trait]
pub trait MediaSource: Send + Sync + 'static {
    /// Acquire an audio capture stream
    ///
    /// # Errors
    ///
    /// Returns [`MediaError`] when permission is denied or no device is
    /// usable.
    async fn acquire_audio(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, MediaError>;
}

/// One-shot microphone warm-up per registered session
///
/// Acquires a capture stream with the configured constraints and releases
/// it immediately; the point is the permission prompt and device spin-up,
/// not the audio. Guarded by a latch so repeated `Ready` events cannot
/// re-prompt; only an explicit reconnect re-arms it. Failure is reported to
/// the caller but is never fatal, since the real call path re-requests
/// media itself.
pub struct MicrophonePrewarmer {
    source: Arc<dyn MediaSource>,
    constraints: CaptureConstraints,
    warmed: AtomicBool,
}

impl MicrophonePrewarmer {
    /// Create a prewarmer over the given capture source
    pub fn new(source: Arc<dyn MediaSource>, constraints: CaptureConstraints) -> Self {
        Self {
            source,
            constraints,
            warmed: AtomicBool::new(false),
        }
    }

    /// Run one warm-up cycle unless this session already had one
    ///
    /// Returns `Ok(true)` when a cycle ran, `Ok(false)` when the latch was
    /// already set. The latch is taken before the first suspension point and
    /// stays set even when acquisition fails: one permission prompt per
    /// session.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError`] from the acquisition attempt.
    pub async fn prewarm<C: SignalingClient>(&self, client: &C) -> Result<bool, MediaError> {
        if self.warmed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        let stream = self.source.acquire_audio(&self.constraints).await?;
        tracing::debug!(tracks = stream.track_count(), "microphone prewarmed");
        stream.release();

        // Secondary warm-up path, for clients that pre-acquire internally
        if let Err(e) = client.warm_microphone().await {
            tracing::debug!(error = %e, "client microphone warm-up hook failed");
        }

        Ok(true)
    }

    /// Re-arm the latch for a fresh session
    pub fn reset(&self) {
        self.warmed.store(false, Ordering::SeqCst);
    }

    /// Whether this session already ran its warm-up cycle
    #[must_use]
    pub fn is_warmed(&self) -> bool {
        self.warmed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sinks_are_created_once() {
        let binder = MediaBinder::new();
        let remote_a = binder.remote_sink();
        let remote_b = binder.remote_sink();
        assert_eq!(remote_a.id(), remote_b.id());
        assert_ne!(binder.local_sink().id(), remote_a.id());
    }

    #[test]
    fn test_attach_is_idempotent_by_stream_id() {
        let binder = MediaBinder::new();
        assert!(binder.attach_remote(StreamBinding::new("stream-1")));
        assert!(!binder.attach_remote(StreamBinding::new("stream-1")));
        assert!(binder.attach_remote(StreamBinding::new("stream-2")));
        assert_eq!(
            binder.remote_sink().current().unwrap().stream_id,
            "stream-2"
        );
    }

    #[test]
    fn test_detach_clears_binding() {
        let binder = MediaBinder::new();
        binder.attach_local(StreamBinding::new("mic"));
        assert!(binder.local_sink().detach().is_some());
        assert!(binder.local_sink().current().is_none());
        // Re-attaching the same stream now counts as a change again
        assert!(binder.attach_local(StreamBinding::new("mic")));
    }
}
