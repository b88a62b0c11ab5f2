use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tower::ServiceExt;
use uuid::Uuid;

use statrelay_hub::{SessionRegistry, SubscriptionHub};
use statrelay_server::auth::SessionTokens;
use statrelay_server::http_server::{build_router, AppState};
use statrelay_server::store::UserStore;
use statrelay_wire::message::{MessageWriter, OutboundMessage};
use statrelay_wire::types::{MessageReason, MessageType, MicroTime, OwnedKeyValue};

const AUTH_KEY: &str = "ws-test-auth-key";
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct WsHarness {
    _dir: tempfile::TempDir,
    state: AppState,
    router: Router,
    addr: SocketAddr,
    user_id: Uuid,
}

async fn spawn_harness(max_subscribers: usize) -> WsHarness {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(UserStore::open(&dir.path().join("users.db")).expect("open store"));
    let user = store.create_user(max_subscribers).expect("create user");
    store
        .upsert_auth_key(AUTH_KEY.as_bytes(), user.user_id)
        .expect("bind auth key");

    let state = AppState {
        store,
        registry: Arc::new(SessionRegistry::new()),
        hub: Arc::new(SubscriptionHub::new(Duration::from_secs(600))),
        tokens: Arc::new(SessionTokens::new(b"ws-test-signing-key")),
    };
    let router = build_router(state.clone(), Duration::from_secs(10));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let served = router.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, served).await;
    });

    WsHarness {
        _dir: dir,
        state,
        router,
        addr,
        user_id: user.user_id,
    }
}

fn subscribe_request(addr: SocketAddr, query: &str) -> tokio_tungstenite::tungstenite::handshake::client::Request {
    let mut request = format!("ws://{addr}/api/message/subscribe?{query}")
        .into_client_request()
        .expect("client request");
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {AUTH_KEY}").parse().expect("header value"),
    );
    request
}

async fn authenticate(harness: &WsHarness) -> String {
    let response = harness
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/authenticate")
                .header(header::AUTHORIZATION, format!("Bearer {AUTH_KEY}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
    body["token"].as_str().expect("token field").to_owned()
}

async fn post_message(harness: &WsHarness, token: &str, entries: Vec<OwnedKeyValue>) {
    let mut writer = MessageWriter::new(Vec::new());
    writer
        .write_message(&OutboundMessage {
            message_type: MessageType::TimeSeriesDiff,
            reason: MessageReason::Poll,
            timestamp: MicroTime(0),
            body: Some(entries),
        })
        .expect("write message");

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/message/post")
                .header(header::AUTHORIZATION, format!("JWT {token}"))
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(Body::from(writer.into_inner()))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn subscriber_receives_filtered_frames() {
    let harness = spawn_harness(2).await;
    let token = authenticate(&harness).await;

    let (mut socket, _) =
        tokio_tungstenite::connect_async(subscribe_request(harness.addr, "hp=1&xp=1"))
            .await
            .expect("websocket handshake");
    assert_eq!(harness.state.hub.subscriber_count(&harness.user_id), 1);

    post_message(
        &harness,
        &token,
        vec![
            OwnedKeyValue::int16("hp", 11),
            OwnedKeyValue::int64("gold", 250),
            OwnedKeyValue::float32("xp", 10.0),
        ],
    )
    .await;

    let frame = tokio::time::timeout(RECV_TIMEOUT, socket.next())
        .await
        .expect("frame in time")
        .expect("stream open")
        .expect("frame ok");
    match frame {
        Message::Text(text) => assert_eq!(text.as_str(), r#"{"hp":11,"xp":10}"#),
        other => panic!("expected text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_frees_the_slot() {
    let harness = spawn_harness(1).await;
    let token = authenticate(&harness).await;

    let (socket, _) = tokio_tungstenite::connect_async(subscribe_request(harness.addr, "*=1"))
        .await
        .expect("websocket handshake");
    assert_eq!(harness.state.hub.subscriber_count(&harness.user_id), 1);

    drop(socket);

    // A dead peer is only noticed when a frame write fails; keep ingesting
    // until the slot is released.
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        post_message(&harness, &token, vec![OwnedKeyValue::int64("tick", 1)]).await;
        if harness.state.hub.subscriber_count(&harness.user_id) == 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "slot was never released"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn empty_filter_is_rejected_before_upgrade() {
    let harness = spawn_harness(2).await;

    let err = tokio_tungstenite::connect_async(subscribe_request(harness.addr, "hp=0"))
        .await
        .expect_err("handshake must fail");
    match err {
        WsError::Http(response) => assert_eq!(response.status(), StatusCode::BAD_REQUEST),
        other => panic!("expected http rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn exhausted_slots_are_rejected_with_429() {
    let harness = spawn_harness(1).await;

    let (_socket, _) = tokio_tungstenite::connect_async(subscribe_request(harness.addr, "*=1"))
        .await
        .expect("first subscriber fits");

    let err = tokio_tungstenite::connect_async(subscribe_request(harness.addr, "*=1"))
        .await
        .expect_err("second subscriber must not fit");
    match err {
        WsError::Http(response) => {
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        }
        other => panic!("expected http rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_bearer_is_unauthorized() {
    let harness = spawn_harness(2).await;

    let request = format!("ws://{}/api/message/subscribe?*=1", harness.addr)
        .into_client_request()
        .expect("client request");
    let err = tokio_tungstenite::connect_async(request)
        .await
        .expect_err("handshake must fail");
    match err {
        WsError::Http(response) => assert_eq!(response.status(), StatusCode::UNAUTHORIZED),
        other => panic!("expected http rejection, got {other:?}"),
    }
}
