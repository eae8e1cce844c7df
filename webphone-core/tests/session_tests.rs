//! Session lifecycle, prewarm, and media binding tests

use std::sync::Arc;
use webphone_core::testing::{FakeMediaSource, ScriptedConnector, StaticCredentialSource};
use webphone_core::{
    CallHandle, ClientEvent, CredentialError, SessionError, SessionStatus, SignalingAuth,
    SignalingError, WebPhone,
};

struct Harness {
    phone: WebPhone<ScriptedConnector>,
    connector: ScriptedConnector,
    media: Arc<FakeMediaSource>,
}

fn harness_with(credentials: StaticCredentialSource) -> Harness {
    let connector = ScriptedConnector::new();
    let media = Arc::new(FakeMediaSource::new());
    let phone = WebPhone::builder(connector.clone(), Arc::new(credentials), media.clone()).build();
    Harness {
        phone,
        connector,
        media,
    }
}

fn harness() -> Harness {
    harness_with(StaticCredentialSource::token("tok-1", Some("15550009999")))
}

/// Let the spawned event pump drain everything the client emitted
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn connect_reaches_registered_and_prewarms_once() {
    let h = harness();
    assert_eq!(h.phone.session_status(), SessionStatus::Disconnected);

    h.phone.connect().await.unwrap();
    assert_eq!(h.phone.session_status(), SessionStatus::Connecting);

    h.phone.handle_client_event(ClientEvent::Ready).await;
    assert_eq!(h.phone.session_status(), SessionStatus::Registered);

    // Prewarm: acquire once, release immediately, plus the client hook
    assert_eq!(h.media.acquisitions(), 1);
    assert_eq!(h.media.releases(), 1);
    let client = h.connector.last_client().unwrap();
    assert_eq!(client.warm_microphone_calls(), 1);

    // A duplicate Ready in the same session does not re-prompt
    h.phone.handle_client_event(ClientEvent::Ready).await;
    assert_eq!(h.media.acquisitions(), 1);
}

#[tokio::test]
async fn missing_credentials_mean_error_and_no_client() {
    let h = harness_with(StaticCredentialSource::missing());

    let result = h.phone.connect().await;
    assert!(matches!(
        result,
        Err(SessionError::Credentials(CredentialError::MissingAuth))
    ));
    assert_eq!(h.phone.session_status(), SessionStatus::Error);
    // The connector was never even invoked
    assert_eq!(h.connector.connect_attempts(), 0);
    assert_eq!(h.media.acquisitions(), 0);
}

#[tokio::test]
async fn connector_failure_means_error() {
    let h = harness();
    h.connector.fail_next_connect();

    let result = h.phone.connect().await;
    assert!(matches!(
        result,
        Err(SessionError::Signaling(SignalingError::ConnectFailed(_)))
    ));
    assert_eq!(h.phone.session_status(), SessionStatus::Error);
    assert_eq!(h.connector.connect_attempts(), 1);
}

#[tokio::test]
async fn reconnect_from_error_runs_a_fresh_prewarm_cycle() {
    let h = harness();
    h.connector.fail_next_connect();
    let _ = h.phone.connect().await;
    assert_eq!(h.phone.session_status(), SessionStatus::Error);

    // Explicit reconnect is the only recovery path
    h.phone.reconnect().await.unwrap();
    assert_eq!(h.phone.session_status(), SessionStatus::Connecting);
    h.phone.handle_client_event(ClientEvent::Ready).await;
    assert_eq!(h.phone.session_status(), SessionStatus::Registered);
    assert_eq!(h.media.acquisitions(), 1);

    // And another reconnect re-arms exactly one more cycle
    h.phone.reconnect().await.unwrap();
    h.phone.handle_client_event(ClientEvent::Ready).await;
    assert_eq!(h.media.acquisitions(), 2);
}

#[tokio::test]
async fn protocol_failure_resets_calls_and_session() {
    let h = harness();
    h.phone.connect().await.unwrap();
    h.phone.handle_client_event(ClientEvent::Ready).await;

    let client = h.connector.last_client().unwrap();
    let call = client.ring_in("15551230000", "Alice");
    settle().await;
    assert!(h.phone.snapshot().incoming_call.is_some());

    h.phone
        .handle_client_event(ClientEvent::Failed {
            reason: "registration lost".to_string(),
        })
        .await;

    let snap = h.phone.snapshot();
    assert_eq!(snap.session, SessionStatus::Error);
    assert!(snap.incoming_call.is_none());
    assert!(snap.active_call.is_none());
    // The connection is gone; nothing was issued on the dead call
    assert!(call.ops().is_empty());
}

#[tokio::test]
async fn socket_close_disconnects_and_resets_calls() {
    let h = harness();
    h.phone.connect().await.unwrap();
    h.phone.handle_client_event(ClientEvent::Ready).await;
    h.phone.make_call("15559998888").await.unwrap();
    assert!(h.phone.snapshot().outbound_call.is_some());

    h.phone.handle_client_event(ClientEvent::SocketClosed).await;

    let snap = h.phone.snapshot();
    assert_eq!(snap.session, SessionStatus::Disconnected);
    assert!(snap.outbound_call.is_none());
}

#[tokio::test]
async fn reconnect_tears_down_the_previous_client() {
    let h = harness();
    h.phone.connect().await.unwrap();
    let first = h.connector.last_client().unwrap();

    h.phone.reconnect().await.unwrap();

    assert_eq!(first.disconnect_count(), 1);
    assert_eq!(h.connector.connect_attempts(), 2);
}

#[tokio::test]
async fn close_disconnects_the_client() {
    let h = harness();
    h.phone.connect().await.unwrap();
    h.phone.handle_client_event(ClientEvent::Ready).await;
    let client = h.connector.last_client().unwrap();

    h.phone.close().await;

    assert_eq!(client.disconnect_count(), 1);
    assert_eq!(h.phone.session_status(), SessionStatus::Disconnected);

    // A closed controller refuses to come back without a new instance
    let result = h.phone.connect().await;
    assert!(matches!(result, Err(SessionError::Closed)));
}

#[tokio::test]
async fn prewarm_denial_is_not_fatal() {
    let h = harness();
    h.media.deny(true);

    h.phone.connect().await.unwrap();
    h.phone.handle_client_event(ClientEvent::Ready).await;

    // Session is fine; the prompt simply failed and is not retried
    assert_eq!(h.phone.session_status(), SessionStatus::Registered);
    assert_eq!(h.media.acquisitions(), 0);
    h.phone.handle_client_event(ClientEvent::Ready).await;
    assert_eq!(h.media.acquisitions(), 0);

    // Calls still work without the prewarm
    h.phone.make_call("15559998888").await.unwrap();
    assert!(h.phone.snapshot().outbound_call.is_some());
}

#[tokio::test]
async fn caller_id_and_token_auth_reach_the_client() {
    let h = harness();
    h.phone.connect().await.unwrap();

    assert_eq!(
        h.phone.caller_id_number().await.as_deref(),
        Some("15550009999")
    );
    assert_eq!(
        h.phone.snapshot().caller_id_number.as_deref(),
        Some("15550009999")
    );
    let client = h.connector.last_client().unwrap();
    assert_eq!(client.auth(), SignalingAuth::Token("tok-1".to_string()));
}

#[tokio::test]
async fn password_auth_is_passed_through() {
    let h = harness_with(StaticCredentialSource::password("alice", "hunter2"));
    h.phone.connect().await.unwrap();

    let client = h.connector.last_client().unwrap();
    assert_eq!(
        client.auth(),
        SignalingAuth::Password {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        }
    );
}

#[tokio::test]
async fn the_same_remote_sink_is_bound_across_reconnects() {
    let h = harness();
    h.phone.connect().await.unwrap();
    let first = h.connector.last_client().unwrap();

    h.phone.reconnect().await.unwrap();
    let second = h.connector.last_client().unwrap();

    let sink = h.phone.media_binder().remote_sink();
    assert_eq!(first.remote_sink_id(), sink.id());
    assert_eq!(second.remote_sink_id(), sink.id());
}

#[tokio::test]
async fn the_pump_delivers_client_events() {
    let h = harness();
    h.phone.connect().await.unwrap();
    let client = h.connector.last_client().unwrap();

    client.emit_ready();
    settle().await;
    assert_eq!(h.phone.session_status(), SessionStatus::Registered);

    let call = client.ring_in("15551230000", "Alice");
    settle().await;
    assert!(h.phone.snapshot().incoming_call.is_some());

    client.emit_hangup(&call.id());
    settle().await;
    assert!(h.phone.snapshot().incoming_call.is_none());
}

#[tokio::test]
async fn a_stale_pump_cannot_touch_the_new_session() {
    let h = harness();
    h.phone.connect().await.unwrap();
    let first = h.connector.last_client().unwrap();

    h.phone.reconnect().await.unwrap();
    let second = h.connector.last_client().unwrap();

    // Events from the torn-down client are dropped, not applied
    first.emit_ready();
    settle().await;
    assert_eq!(h.phone.session_status(), SessionStatus::Connecting);

    second.emit_ready();
    settle().await;
    assert_eq!(h.phone.session_status(), SessionStatus::Registered);
}
