//! Discovery & Notify.
//!
//! `GET /events` is an `axum::response::sse::Sse` stream built the same way
//! as any other keep-alive SSE endpoint: one fixed heartbeat stream becomes
//! a real per-device `broadcast` channel carrying `connect`/registration
//! events, adapted into the response stream with `BroadcastStream` so a
//! lagged subscriber drops old events instead of stalling the connection.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::ids::DeviceId;
use crate::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    Connect,
    DeviceRegistered,
    DeviceUnregistered,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/discover", post(discover_handler))
        .route("/events", get(events_handler))
        .route("/notify", post(notify_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[derive(Deserialize)]
struct DiscoverBody {
    device_id: String,
}

#[derive(Serialize)]
struct DiscoverResponse {
    #[serde(rename = "wsUrl")]
    ws_url: String,
}

/// `POST /discover` — Bearer token, body `{device_id}`. A controller API
/// key (the `pk_` prefix convention) gets a best-effort `connect` nudge
/// published to the device's stream; anything else is treated as an
/// end-user session token and only resolves the URL.
async fn discover_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<DiscoverBody>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if body.device_id.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    if state.verifier.verify(token).await.is_err() {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let device_id = DeviceId::normalize(&body.device_id);
    if token.starts_with("pk_") {
        state.notify.publish(&device_id, NotifyEvent::Connect);
    }

    Json(DiscoverResponse {
        ws_url: state.config.ws_url.clone(),
    })
    .into_response()
}

#[derive(Deserialize)]
struct EventsQuery {
    device_id: Option<String>,
}

/// `GET /events` — Bearer token, device role only. A device that doesn't
/// pass an explicit `device_id` query param subscribes under its own
/// verified user id, mirroring the same fallback the WebSocket auth path
/// uses when a device omits `device_id`. An explicit `device_id` naming
/// some other device is only honored when the registry already shows this
/// user as that device's owner — otherwise this endpoint would let any
/// bearer token read another user's notify stream by guessing an id.
async fn events_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let user = match state.verifier.verify(token).await {
        Ok(u) => u,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    let own_device_id = DeviceId::normalize(user.0.as_str());
    let device_id = match query.device_id {
        Some(id) if !id.is_empty() => {
            let requested = DeviceId::normalize(&id);
            if requested != own_device_id && state.registry.device_owner(&requested) != Some(user.clone()) {
                return StatusCode::FORBIDDEN.into_response();
            }
            requested
        }
        _ => own_device_id,
    };

    let rx = state.notify.subscribe(&device_id);
    let initial = futures_util::stream::once(async {
        Ok::<Event, std::convert::Infallible>(Event::default().data(r#"{"type":"connected"}"#))
    });
    let rest = BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(event) => serde_json::to_string(&event).ok().map(|data| Ok(Event::default().data(data))),
            Err(_) => None,
        }
    });

    Sse::new(initial.chain(rest))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("heartbeat"))
        .into_response()
}

#[derive(Deserialize)]
struct NotifyBody {
    #[serde(rename = "type")]
    kind: String,
    device_id: String,
}

/// `POST /notify` — internal; requires the configured shared secret, when set.
async fn notify_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NotifyBody>,
) -> Response {
    if let Some(secret) = &state.config.notify_secret {
        let provided = headers.get("x-notify-secret").and_then(|v| v.to_str().ok());
        if provided != Some(secret.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let device_id = DeviceId::normalize(&body.device_id);
    let event = match body.kind.as_str() {
        "connect" => NotifyEvent::Connect,
        "device_registered" => NotifyEvent::DeviceRegistered,
        "device_unregistered" => NotifyEvent::DeviceUnregistered,
        other => {
            warn!(kind = other, "unknown notify event type");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    state.notify.publish(&device_id, event);
    StatusCode::ACCEPTED.into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "status": "ok",
        "sessions": {
            "devices": state.registry.device_count(),
            "controllers": state.registry.controller_count(),
        },
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_event_serializes_with_type_tag() {
        let json = serde_json::to_string(&NotifyEvent::DeviceRegistered).unwrap();
        assert_eq!(json, r#"{"type":"device_registered"}"#);
    }

    #[test]
    fn bearer_token_requires_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123"));

        let mut bad = HeaderMap::new();
        bad.insert(axum::http::header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert_eq!(bearer_token(&bad), None);
    }
}
