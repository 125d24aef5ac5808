//! WebSocket Transport.
//!
//! Each connection is split into a reader half (this module's per-role
//! loop) and a writer half (a dedicated task draining a bounded `mpsc`
//! queue), so a slow client's writer backing up can never stall the reader
//! loop of another session. Auth runs to completion on the raw socket
//! before either half of a session is constructed; only an AUTHENTICATED
//! connection gets a writer task and a registry entry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::warn;
use uuid::Uuid;

use crate::error::CloseCode;
use crate::heartbeat::{Heartbeat, HeartbeatAction};
use crate::ids::{DeviceId, UserId};
use crate::protocol::{is_pong, parse_auth, parse_command, parse_response, AuthFrame, ServerMessage};
use crate::session::{ControllerSession, DeviceSession, SessionCore};
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

enum AuthOutcome {
    Device { user: UserId, device_id: DeviceId },
    Controller { user: UserId, target_device_id: DeviceId, last_ack: u64 },
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let outcome = match authenticate(&mut ws_tx, &mut ws_rx, &state).await {
        Some(outcome) => outcome,
        None => return,
    };

    match outcome {
        AuthOutcome::Device { user, device_id } => {
            run_device_session(ws_tx, ws_rx, state, user, device_id).await;
        }
        AuthOutcome::Controller { user, target_device_id, last_ack } => {
            run_controller_session(ws_tx, ws_rx, state, user, target_device_id, last_ack).await;
        }
    }
}

/// Resolve the identity a connection registers under when it omits an
/// explicit device id: falls back to the verified user id, same rule on
/// both the WebSocket auth path and `GET /events`.
fn resolve_device_id(explicit: Option<&str>, fallback_user: &UserId) -> DeviceId {
    match explicit {
        Some(id) if !id.is_empty() => DeviceId::normalize(id),
        _ => DeviceId::normalize(&fallback_user.0),
    }
}

async fn next_auth_frame(ws_rx: &mut SplitStream<WebSocket>) -> Option<AuthFrame> {
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(frame) = parse_auth(&text) {
                    if frame.kind == "auth" {
                        return Some(frame);
                    }
                }
                // Anything else before auth is ignored; the caller's timeout
                // eventually closes the connection with auth_fail.
            }
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(_) => return None,
        }
    }
    None
}

async fn close_with(ws_tx: &mut SplitSink<WebSocket, Message>, code: CloseCode, reason: &str) {
    let msg = match code {
        CloseCode::AuthFail => ServerMessage::AuthFail { error: reason.into() },
        _ => ServerMessage::Error { error: reason.into() },
    };
    if let Ok(json) = serde_json::to_string(&msg) {
        let _ = ws_tx.send(Message::Text(json)).await;
    }
    let frame = CloseFrame { code: 1000, reason: code.as_str().into() };
    let _ = ws_tx.send(Message::Close(Some(frame))).await;
}

async fn authenticate(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
    state: &AppState,
) -> Option<AuthOutcome> {
    let frame = match tokio::time::timeout(state.config.auth_timeout(), next_auth_frame(ws_rx)).await {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            close_with(ws_tx, CloseCode::ProtocolError, "connection closed before auth").await;
            return None;
        }
        Err(_) => {
            close_with(ws_tx, CloseCode::AuthFail, "auth timeout").await;
            return None;
        }
    };

    let Some(credential) = frame.credential() else {
        close_with(ws_tx, CloseCode::AuthFail, "missing auth credential").await;
        return None;
    };

    let user = match state.verifier.verify(credential).await {
        Ok(user) => user,
        Err(_) => {
            close_with(ws_tx, CloseCode::AuthFail, "invalid token").await;
            return None;
        }
    };

    if frame.is_controller() {
        let target = frame.target_device_id.as_deref().filter(|s| !s.is_empty());
        let Some(target) = target else {
            close_with(ws_tx, CloseCode::AuthFail, "missing target_device_id").await;
            return None;
        };
        let target_device_id = DeviceId::normalize(target);
        if let Some(owner) = state.registry.device_owner(&target_device_id) {
            if owner != user {
                close_with(ws_tx, CloseCode::AuthFail, "device registered to a different user").await;
                return None;
            }
        }
        Some(AuthOutcome::Controller { user, target_device_id, last_ack: frame.last_ack })
    } else {
        let device_id = resolve_device_id(frame.device_id.as_deref(), &user);
        Some(AuthOutcome::Device { user, device_id })
    }
}

async fn writer_task(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Message>,
    mut close_rx: watch::Receiver<Option<CloseCode>>,
) {
    loop {
        tokio::select! {
            biased;
            changed = close_rx.changed() => {
                if changed.is_ok() {
                    if let Some(code) = *close_rx.borrow() {
                        let frame = CloseFrame { code: 1000, reason: code.as_str().into() };
                        let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    }
                }
                break;
            }
            msg = outbound_rx.recv() => {
                match msg {
                    Some(m) => {
                        if ws_tx.send(m).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    let _ = ws_tx.close().await;
}

fn spawn_writer(
    ws_tx: SplitSink<WebSocket, Message>,
    capacity: usize,
) -> (mpsc::Sender<Message>, watch::Sender<Option<CloseCode>>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
    let (close_tx, close_rx) = watch::channel(None);
    tokio::spawn(writer_task(ws_tx, outbound_rx, close_rx));
    (outbound_tx, close_tx)
}

async fn run_device_session(
    ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    state: Arc<AppState>,
    user: UserId,
    device_id: DeviceId,
) {
    let (outbound_tx, close_tx) = spawn_writer(ws_tx, state.config.writer_queue_capacity);
    let heartbeat = Heartbeat::new(state.config.heartbeat_idle(), state.config.heartbeat_timeout());
    let core = SessionCore::new(Uuid::new_v4(), user.clone(), outbound_tx, close_tx, heartbeat);
    let session = Arc::new(DeviceSession::new(core, device_id.clone(), state.config.resume_buffer_size));

    if let Some(prior) = state.registry.register_device(device_id.clone(), Arc::clone(&session)) {
        prior.core.request_close(CloseCode::Superseded);
    }

    let paired_controller = state.registry.lookup_controller(&user, &device_id);
    if let Some(controller) = &paired_controller {
        controller.core.send_json(&ServerMessage::PhoneStatus { connected: true });
    }
    session.core.send_json(&ServerMessage::AuthOk {
        resume_from: 0,
        phone_connected: paired_controller.is_some(),
        gap: None,
    });

    let mut close_rx = session.core.close_watch();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            biased;
            changed = close_rx.changed() => {
                let _ = changed;
                break;
            }
            _ = ticker.tick() => {
                let action = session.core.heartbeat.lock().unwrap().poll(Instant::now());
                match action {
                    HeartbeatAction::Idle => {}
                    HeartbeatAction::SendPing => session.core.send_json(&ServerMessage::Ping),
                    HeartbeatAction::TimedOut => session.core.request_close(CloseCode::IdleTimeout),
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_device_frame(&state, &session, &device_id, &text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    if state.registry.unregister_device(&device_id, &session) {
        if let Some(controller) = state.registry.lookup_controller(&user, &device_id) {
            controller.core.send_json(&ServerMessage::PhoneStatus { connected: false });
        }
    }
    session.core.request_close(CloseCode::Shutdown);
}

fn handle_device_frame(state: &AppState, session: &Arc<DeviceSession>, device_id: &DeviceId, text: &str) {
    if is_pong(text) {
        session.core.heartbeat.lock().unwrap().on_pong(Instant::now());
        return;
    }
    session.core.heartbeat.lock().unwrap().on_activity(Instant::now());
    match parse_response(text) {
        Ok(response) => state.delivery.deliver_response(session, response),
        Err(_) => {
            if serde_json::from_str::<Value>(text).is_err() {
                session.core.request_close(CloseCode::ProtocolError);
            } else {
                warn!(device = %device_id, "unrecognized device frame, dropping");
            }
        }
    }
}

async fn run_controller_session(
    ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    state: Arc<AppState>,
    user: UserId,
    target_device_id: DeviceId,
    last_ack: u64,
) {
    let (outbound_tx, close_tx) = spawn_writer(ws_tx, state.config.writer_queue_capacity);
    let heartbeat = Heartbeat::new(state.config.heartbeat_idle(), state.config.heartbeat_timeout());
    let core = SessionCore::new(Uuid::new_v4(), user.clone(), outbound_tx, close_tx, heartbeat);
    let session = Arc::new(ControllerSession::new(core, target_device_id.clone(), last_ack));

    // Snapshot the resume buffer and enqueue auth_ok + replay *before* this
    // session becomes visible in the registry. Otherwise a device response
    // arriving on a concurrent reader task between registration and here
    // would land on the same outbound queue ahead of the replay, breaking
    // "replay prefix precedes any new frames".
    let device = state.registry.lookup_device(&target_device_id);
    let (resume_from, gap, replay_frames) = match &device {
        Some(device) => {
            let replay = device.resume.lock().unwrap().replay(last_ack);
            (replay.resume_from, replay.gap, replay.frames)
        }
        None => (last_ack, false, Vec::new()),
    };

    session.core.send_json(&ServerMessage::AuthOk {
        resume_from,
        phone_connected: device.is_some(),
        gap: gap.then_some(true),
    });
    for frame in replay_frames {
        let mut response = frame.response;
        response.seq = Some(frame.seq);
        session.core.send_json(&response);
    }

    if let Some(prior) =
        state
            .registry
            .register_controller(user.clone(), target_device_id.clone(), Arc::clone(&session))
    {
        prior.core.request_close(CloseCode::Superseded);
    }

    let mut close_rx = session.core.close_watch();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            biased;
            changed = close_rx.changed() => {
                let _ = changed;
                break;
            }
            _ = ticker.tick() => {
                let action = session.core.heartbeat.lock().unwrap().poll(Instant::now());
                match action {
                    HeartbeatAction::Idle => {}
                    HeartbeatAction::SendPing => session.core.send_json(&ServerMessage::Ping),
                    HeartbeatAction::TimedOut => session.core.request_close(CloseCode::IdleTimeout),
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_controller_frame(&state, &session, &target_device_id, &text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.registry.unregister_controller(&user, &target_device_id, &session);
    session.core.request_close(CloseCode::Shutdown);
}

fn handle_controller_frame(
    state: &AppState,
    session: &Arc<ControllerSession>,
    target_device_id: &DeviceId,
    text: &str,
) {
    if is_pong(text) {
        session.core.heartbeat.lock().unwrap().on_pong(Instant::now());
        return;
    }
    session.core.heartbeat.lock().unwrap().on_activity(Instant::now());
    match parse_command(text) {
        Ok(cmd) => state.delivery.submit_command(session, cmd),
        Err(_) => {
            if serde_json::from_str::<Value>(text).is_err() {
                session.core.request_close(CloseCode::ProtocolError);
            } else {
                warn!(target = %target_device_id, "unrecognized controller frame, dropping");
            }
        }
    }
}
