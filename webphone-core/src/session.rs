//! Signaling session supervision
//!
//! Exactly one signaling connection exists at a time and this module owns
//! its handle. Status moves `disconnected → connecting → registered`, with
//! `error` reachable from the connecting and registered states. Both
//! `error` and `disconnected` are terminal until an explicit reconnect.
//! There is no automatic retry loop, so a flapping backend cannot start a
//! silent reconnection storm.

use crate::client::{
    CallOf, ClientConfig, ClientEvent, SignalingClient, SignalingConnector, SignalingError,
};
use crate::credentials::{CredentialError, CredentialSource};
use crate::media::{MediaBinder, MicrophonePrewarmer};
use crate::types::SessionStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Credentials could not be obtained
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    /// Client construction or connection failed
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    /// The controller has been torn down
    #[error("controller is closed")]
    Closed,
}

struct Inner<T> {
    client: Option<Arc<T>>,
    caller_id_number: Option<String>,
}

/// Owner and supervisor of the one signaling connection
pub struct SessionManager<C: SignalingConnector> {
    connector: C,
    credentials: Arc<dyn CredentialSource>,
    binder: Arc<MediaBinder>,
    prewarmer: MicrophonePrewarmer,
    inner: Mutex<Inner<C::Client>>,
    status_tx: watch::Sender<SessionStatus>,
    closed: AtomicBool,
}

impl<C: SignalingConnector> SessionManager<C> {
    /// Create a manager in the `disconnected` state
    pub fn new(
        connector: C,
        credentials: Arc<dyn CredentialSource>,
        binder: Arc<MediaBinder>,
        prewarmer: MicrophonePrewarmer,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Disconnected);
        Self {
            connector,
            credentials,
            binder,
            prewarmer,
            inner: Mutex::new(Inner {
                client: None,
                caller_id_number: None,
            }),
            status_tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Current session status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    /// Watch channel over the session status
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Own number from the last issued credentials, if any
    pub async fn caller_id_number(&self) -> Option<String> {
        self.inner.lock().await.caller_id_number.clone()
    }

    /// The live client handle, if connected
    pub(crate) async fn client(&self) -> Option<Arc<C::Client>> {
        self.inner.lock().await.client.clone()
    }

    /// The audio sink pair this session binds clients to
    pub(crate) fn binder(&self) -> Arc<MediaBinder> {
        self.binder.clone()
    }

    /// Establish a session, tearing down any existing connection first
    ///
    /// Returns the new client's event stream; the caller pumps it. Status
    /// stays `connecting` until the client reports `Ready`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when credentials cannot be obtained, the
    /// client cannot be constructed, or the controller is already closed.
    /// Either failure leaves the session in the `error` state with no
    /// client; the only recovery path is another explicit connect.
    pub async fn connect(
        &self,
    ) -> Result<broadcast::Receiver<ClientEvent<CallOf<C>>>, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }

        let mut inner = self.inner.lock().await;
        if let Some(old) = inner.client.take() {
            tracing::debug!("disconnecting previous signaling client");
            old.disconnect().await;
        }
        inner.caller_id_number = None;
        self.set_status(SessionStatus::Connecting);

        let creds = match self.credentials.fetch().await {
            Ok(creds) => creds,
            Err(e) => {
                tracing::warn!(error = %e, "credential fetch failed");
                self.set_status(SessionStatus::Error);
                return Err(e.into());
            }
        };
        inner.caller_id_number = creds.caller_id_number.clone();

        let config = ClientConfig {
            auth: creds.auth,
            remote_sink: self.binder.remote_sink(),
        };
        let client = match self.connector.connect(config).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::warn!(error = %e, "signaling client construction failed");
                self.set_status(SessionStatus::Error);
                return Err(e.into());
            }
        };
        let events = client.subscribe();

        // A close that raced this connect wins: refuse to adopt the client
        if self.closed.load(Ordering::SeqCst) {
            client.disconnect().await;
            self.set_status(SessionStatus::Disconnected);
            return Err(SessionError::Closed);
        }

        inner.client = Some(client);
        tracing::info!("signaling connection initiated");
        Ok(events)
    }

    /// Re-run the connect sequence and re-arm the microphone prewarmer
    ///
    /// # Errors
    ///
    /// Same failure modes as [`connect`](Self::connect).
    pub async fn reconnect(
        &self,
    ) -> Result<broadcast::Receiver<ClientEvent<CallOf<C>>>, SessionError> {
        self.prewarmer.reset();
        self.connect().await
    }

    /// Handle the client's `Ready` event: registered, plus one prewarm cycle
    pub(crate) async fn mark_registered(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.set_status(SessionStatus::Registered);

        let client = self.inner.lock().await.client.clone();
        if let Some(client) = client {
            match self.prewarmer.prewarm(client.as_ref()).await {
                Ok(true) => tracing::debug!("microphone prewarm cycle completed"),
                Ok(false) => {}
                // Prewarming is an optimization; a denied prompt here must
                // not take the session down
                Err(e) => tracing::warn!(error = %e, "microphone prewarm failed"),
            }
        }
    }

    /// Handle a protocol failure after connect was initiated
    pub(crate) fn mark_failed(&self, reason: &str) {
        tracing::warn!(reason, "signaling session failed");
        self.set_status(SessionStatus::Error);
    }

    /// Handle the signaling socket closing underneath the session
    pub(crate) fn mark_socket_closed(&self) {
        tracing::info!("signaling socket closed");
        self.set_status(SessionStatus::Disconnected);
    }

    /// Tear the session down; safe even while a connect is in flight
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        if let Some(client) = inner.client.take() {
            client.disconnect().await;
        }
        self.set_status(SessionStatus::Disconnected);
    }

    fn set_status(&self, next: SessionStatus) {
        let prev = *self.status_tx.borrow();
        if prev == next {
            return;
        }
        tracing::debug!(old = prev.as_str(), new = next.as_str(), "session status transition");
        self.status_tx.send_replace(next);
    }
}
