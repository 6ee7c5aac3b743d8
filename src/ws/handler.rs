//! WebSocket connection handler (C14). Each connection runs: upgrade →
//! welcome frame → await `auth` frame → dispatch loop (`subscribe` /
//! `unsubscribe` / `request` / `heartbeat`) → heartbeat-timeout or
//! client-close teardown. `request` frames run the same
//! security → rate-limit → validate → authorize → route pipeline as the
//! REST adapter's generic dispatch handler (see [`crate::rest::dispatch`]).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::authn::{AuthMethod, UserIdentity};
use crate::authz::Resource;
use crate::bus::client::SubscriptionHandle;
use crate::bus::envelope::{validate_pattern, MessageEnvelope};
use crate::error::{Error, Result};
use crate::state::AppState;

use super::connection::ConnectionId;
use super::messages::{ClientFrame, ServerFrame};

pub async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let max_frame_size = state.config.websocket.max_frame_size;
    ws.max_message_size(max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, addr: SocketAddr) {
    let connection_id = ConnectionId::new();

    if !state.ws_connections.acquire(state.config.websocket.max_connections) {
        let (mut sender, _) = socket.split();
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: 1013,
                reason: "server overloaded".into(),
            })))
            .await;
        return;
    }
    // Released on every exit path, including early returns below.
    let counter = state.ws_connections.clone();
    let _guard = scopeguard(move || counter.release());

    let (mut sink, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(64);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let _ = tx
        .send(
            ServerFrame::Welcome {
                client_id: connection_id.as_uuid(),
                server: state.config.service.name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            }
            .to_message(),
        )
        .await;

    let identity = match await_auth(&mut receiver, &state).await {
        Some(identity) => identity,
        None => {
            let _ = tx
                .send(Message::Close(Some(CloseFrame {
                    code: 4401,
                    reason: "unauthorized".into(),
                })))
                .await;
            drop(tx);
            let _ = writer.await;
            return;
        }
    };

    tracing::info!(%connection_id, user = %identity.username, %addr, "websocket client authenticated");
    let remote_ip = addr.ip().to_string();

    let mut subscriptions: HashMap<String, SubscriptionHandle> = HashMap::new();
    let heartbeat_interval = state.config.websocket.heartbeat_interval();
    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.tick().await; // the first tick fires immediately; consume it before the loop
    let mut last_heartbeat = Instant::now();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_heartbeat = Instant::now();
                        handle_client_frame(&text, &state, &identity, &remote_ip, &tx, &mut subscriptions).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        last_heartbeat = Instant::now();
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > state.config.websocket.max_frame_size {
                            let _ = tx.send(Message::Close(Some(CloseFrame {
                                code: 1009,
                                reason: "frame too large".into(),
                            }))).await;
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(%connection_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if last_heartbeat.elapsed() > heartbeat_interval * 3 {
                    tracing::warn!(%connection_id, "websocket client missed heartbeats, closing");
                    let _ = tx.send(Message::Close(Some(CloseFrame {
                        code: 1000,
                        reason: "heartbeat timeout".into(),
                    }))).await;
                    break;
                }
            }
        }
    }

    for (_, handle) in subscriptions.drain() {
        state.bus.unsubscribe(handle);
    }
    drop(tx);
    let _ = writer.await;
    tracing::debug!(%connection_id, "websocket connection closed");
}

/// Waits for the first frame and requires it to be a valid `auth` frame
/// carrying a bearer token; any other frame, a parse failure, or an early
/// close results in no identity and the caller closes with 4401.
async fn await_auth(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &AppState,
) -> Option<UserIdentity> {
    let msg = receiver.next().await?.ok()?;
    let Message::Text(text) = msg else { return None };
    let ClientFrame::Auth { token } = serde_json::from_str::<ClientFrame>(&text).ok()? else {
        return None;
    };
    state.auth.authenticate(AuthMethod::Bearer, &token).await.ok()
}

async fn handle_client_frame(
    text: &str,
    state: &AppState,
    identity: &UserIdentity,
    remote_ip: &str,
    tx: &mpsc::Sender<Message>,
    subscriptions: &mut HashMap<String, SubscriptionHandle>,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            let _ = tx
                .send(ServerFrame::Error { detail: format!("malformed frame: {e}") }.to_message())
                .await;
            return;
        }
    };

    match frame {
        ClientFrame::Auth { .. } => {
            // Already authenticated on the handshake frame; later `auth`
            // frames are accepted but have no further effect.
        }
        ClientFrame::Subscribe { topic } => handle_subscribe(state, identity, topic, tx, subscriptions).await,
        ClientFrame::Unsubscribe { topic } => {
            if let Some(handle) = subscriptions.remove(&topic) {
                state.bus.unsubscribe(handle);
            }
            let _ = tx.send(ServerFrame::Unsubscribed { topic }.to_message()).await;
        }
        ClientFrame::Request { id, message_type, payload } => {
            let outcome = handle_request(state, identity, remote_ip, &message_type, payload).await;
            let frame = match outcome {
                Ok((correlation_id, data)) => ServerFrame::Response {
                    id,
                    success: true,
                    correlation_id: Some(correlation_id),
                    data: Some(data),
                    error: None,
                },
                Err(e) => ServerFrame::Response {
                    id,
                    success: false,
                    correlation_id: None,
                    data: None,
                    error: Some(e.to_string()),
                },
            };
            let _ = tx.send(frame.to_message()).await;
        }
        ClientFrame::Heartbeat {} => {
            let _ = tx
                .send(ServerFrame::HeartbeatAck { timestamp: chrono::Utc::now() }.to_message())
                .await;
        }
    }
}

async fn handle_subscribe(
    state: &AppState,
    identity: &UserIdentity,
    topic: String,
    tx: &mpsc::Sender<Message>,
    subscriptions: &mut HashMap<String, SubscriptionHandle>,
) {
    if subscriptions.contains_key(&topic) {
        return;
    }
    if validate_pattern(&topic).is_err() {
        let _ = tx
            .send(ServerFrame::Error { detail: "invalid subscription pattern".to_string() }.to_message())
            .await;
        return;
    }
    if let Err(e) = state.authz.authorize(identity, &format!("subscribe:{topic}"), Resource::None) {
        let _ = tx.send(ServerFrame::Error { detail: e.to_string() }.to_message()).await;
        return;
    }

    let forward_tx = tx.clone();
    let callback_topic = topic.clone();
    let result = state
        .bus
        .subscribe(
            &topic,
            std::sync::Arc::new(move |envelope: MessageEnvelope| {
                let frame = ServerFrame::Broadcast { topic: callback_topic.clone(), envelope };
                let _ = forward_tx.try_send(frame.to_message());
            }),
        )
        .await;

    match result {
        Ok(handle) => {
            let ack_topic = topic.clone();
            subscriptions.insert(topic, handle);
            let _ = tx.send(ServerFrame::Subscribed { topic: ack_topic }.to_message()).await;
        }
        Err(e) => {
            let _ = tx.send(ServerFrame::Error { detail: e.to_string() }.to_message()).await;
        }
    }
}

async fn handle_request(
    state: &AppState,
    identity: &UserIdentity,
    remote_ip: &str,
    message_type: &str,
    payload: serde_json::Value,
) -> Result<(Uuid, serde_json::Value)> {
    let sanitized = state.security.filter(remote_ip, &payload)?;

    if !state.rate_limiter.check(&identity.user_uuid.to_string(), 1.0)? {
        return Err(Error::RateLimitExceeded);
    }

    let envelope = MessageEnvelope::new(identity.username.clone(), message_type.to_string(), sanitized);
    state.validator.validate(&envelope)?;
    state.authz.authorize(identity, "publish", Resource::Envelope(&envelope))?;

    let result = state.router.route_message(envelope).await?;
    if result.success {
        Ok((result.correlation_id, result.response.unwrap_or(serde_json::Value::Null)))
    } else if result.timed_out {
        let timeout_secs = state.router.get_routing_stats().timeout_secs;
        Err(Error::Timeout(std::time::Duration::from_secs(timeout_secs)))
    } else {
        Err(Error::Internal(result.error.unwrap_or_else(|| "routing failed".to_string())))
    }
}

/// Runs `f` when dropped. Used to release the connection-count permit on
/// every exit path (normal close, heartbeat timeout, or an early return)
/// without duplicating the decrement at each `return`/`break`.
fn scopeguard(f: impl FnOnce() + Send + 'static) -> impl Drop {
    struct Guard<F: FnOnce()>(Option<F>);
    impl<F: FnOnce()> Drop for Guard<F> {
        fn drop(&mut self) {
            if let Some(f) = self.0.take() {
                f();
            }
        }
    }
    Guard(Some(f))
}
