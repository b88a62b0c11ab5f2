use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::{encode_auth_response_stream, SessionTokens};
use crate::store::{StoreError, UserStore};
use statrelay_hub::{state_snapshot_json, SessionRegistry, Subscription, SubscriptionHub};

/// Subscriber sockets idle this long are closed; the client can reconnect.
pub const SUBSCRIBER_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<UserStore>,
    pub registry: Arc<SessionRegistry>,
    pub hub: Arc<SubscriptionHub>,
    pub tokens: Arc<SessionTokens>,
}

pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/api/auth/authenticate", post(authenticate))
        .route("/api/message/post", post(receive_message))
        .route("/api/message/current-state", get(current_state))
        .route("/api/message/subscribe", get(subscribe))
        .layer(RequestDecompressionLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error surfaced to HTTP clients. Detail stays in the logs.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: &'static str,
}

impl ApiError {
    fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("JWT ")
}

/// Resolves an opaque bearer token to a user id through the store.
fn user_from_bearer(state: &AppState, headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let token = bearer_token(headers).ok_or_else(ApiError::unauthorized)?;
    state
        .store
        .user_id_by_auth_key(token.as_bytes())
        .map_err(|err| match err {
            StoreError::UserNotFound => ApiError::unauthorized(),
            err => {
                tracing::error!("auth key lookup failed: {err}");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to resolve auth key",
                )
            }
        })
}

fn user_from_session_token(state: &AppState, headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let token = session_token(headers).ok_or_else(ApiError::unauthorized)?;
    let claims = state
        .tokens
        .verify(token)
        .map_err(|_| ApiError::unauthorized())?;
    Ok(claims.user_id)
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::CONTENT_TYPE)?.to_str().ok()
}

/// `POST /api/auth/authenticate` — exchanges an opaque bearer token for a
/// short-lived session token, creating the user's session on first use.
///
/// The response format follows the request's content type: JSON, or the
/// exporter's binary layout for everything else.
async fn authenticate(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user_id = user_from_bearer(&state, &headers)?;

    let (token, expires_at) = state.tokens.mint(user_id).map_err(|err| {
        tracing::error!("session token mint failed: {err}");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to create session token",
        )
    })?;

    // Re-authentication keeps the existing decoder and accumulated state.
    state.registry.get_or_create(user_id);
    tracing::info!(user = %user_id, "session authenticated");

    if content_type(&headers) == Some("application/json") {
        let body = json!({
            "token": token,
            "expire_time": expires_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        });
        return Ok((StatusCode::OK, Json(body)).into_response());
    }

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        encode_auth_response_stream(&token, expires_at),
    )
        .into_response())
}

/// `POST /api/message/post` — ingests one binary message stream.
///
/// The body is fully buffered before the session mutex is taken, so a slow
/// network never holds the lock. The session decoder keeps its dictionary
/// across posts; only its byte source is swapped.
async fn receive_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let user_id = user_from_session_token(&state, &headers)?;
    let session = state
        .registry
        .get(&user_id)
        .ok_or_else(ApiError::unauthorized)?;

    if content_type(&headers) != Some("application/octet-stream") {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Invalid content type"));
    }
    if body.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Invalid content length",
        ));
    }

    let committed = state
        .hub
        .ingest_body(user_id, &session, body.to_vec())
        .map_err(|err| {
            tracing::error!(user = %user_id, "message stream decode failed: {err}");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to decode message stream",
            )
        })?;

    tracing::debug!(user = %user_id, committed, "message stream ingested");
    Ok(StatusCode::OK)
}

/// `GET /api/message/current-state` — the session's accumulated key/value
/// map as one JSON object.
async fn current_state(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user_id = user_from_session_token(&state, &headers)?;
    let session = state.registry.get(&user_id).ok_or_else(|| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "No active session found for given auth key",
        )
    })?;

    let body = {
        let guard = session.lock();
        state_snapshot_json(&guard.state)
    };

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response())
}

/// Builds the subscription filter from query parameters: each key whose last
/// value is "1" or "true" is included; `*` subscribes to everything.
fn filter_from_query(params: Vec<(String, String)>) -> HashSet<String> {
    let mut last_values: HashMap<String, String> = HashMap::new();
    for (key, value) in params {
        last_values.insert(key, value);
    }
    last_values
        .into_iter()
        .filter(|(_, value)| value == "1" || value == "true")
        .map(|(key, _)| key)
        .collect()
}

/// `GET /api/message/subscribe` — upgrades to a WebSocket that delivers one
/// JSON object per text frame, filtered to the requested keys.
async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user_id = user_from_bearer(&state, &headers)?;
    let user = state.store.user_by_id(user_id).map_err(|err| match err {
        StoreError::UserNotFound => ApiError::unauthorized(),
        err => {
            tracing::error!(user = %user_id, "user lookup failed: {err}");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get user")
        }
    })?;

    let filter = filter_from_query(params);
    if filter.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "No valid keys found in query",
        ));
    }

    let subscription = state
        .hub
        .subscribe_if_slot(user_id, filter, user.max_subscribers)
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "User has reached max subscribers",
            )
        })?;

    tracing::info!(user = %user_id, subscriber = subscription.id, "subscriber connected");
    let hub = Arc::clone(&state.hub);
    Ok(ws.on_upgrade(move |socket| subscriber_loop(socket, hub, user_id, subscription)))
}

async fn subscriber_loop(
    mut socket: WebSocket,
    hub: Arc<SubscriptionHub>,
    user_id: Uuid,
    mut subscription: Subscription,
) {
    loop {
        match tokio::time::timeout(SUBSCRIBER_ACTIVITY_TIMEOUT, subscription.rx.recv()).await {
            Ok(Some(frame)) => {
                let text = String::from_utf8_lossy(&frame).into_owned();
                if socket.send(WsMessage::Text(text.into())).await.is_err() {
                    tracing::debug!(user = %user_id, "subscriber write failed");
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => {
                tracing::debug!(user = %user_id, "subscriber idle timeout");
                break;
            }
        }
    }

    hub.unsubscribe(user_id, subscription.id);
    tracing::info!(user = %user_id, subscriber = subscription.id, "subscriber disconnected");
}
