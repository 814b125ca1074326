//! Websocket progress feed.
//!
//! Every connected client receives every progress and status event as a JSON
//! text frame; clients filter by `job_id` themselves.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::realtime::RealtimeGateway;

/// Upgrade to a websocket and attach it to the gateway.
pub async fn progress_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let gateway = state
        .gateway
        .clone()
        .ok_or_else(|| ApiError::service_unavailable("Realtime gateway not available"))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, gateway)))
}

/// Application-level ping: `"ping"` or `{"type":"ping"}`.
fn is_ping_text(text: &str) -> bool {
    let text = text.trim();
    if text.eq_ignore_ascii_case("ping") {
        return true;
    }
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "ping"))
        .unwrap_or(false)
}

/// Send one frame, giving up once `limit` passes.
///
/// A peer that stops reading eventually fills the TCP window and the send
/// never resolves; the bound keeps the heartbeat in charge of the connection.
async fn send_within<S>(sender: &mut S, message: Message, limit: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(limit, sender.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "Realtime send failed");
            false
        }
        Err(_) => {
            debug!(limit_ms = limit.as_millis() as u64, "Realtime client stopped reading");
            false
        }
    }
}

async fn handle_socket(socket: WebSocket, gateway: RealtimeGateway) {
    let (mut sender, mut receiver) = socket.split();
    let mut connection = gateway.register();
    let connection_id = connection.id();
    let send_limit = gateway.config().ping_interval;

    let mut heartbeat = tokio::time::interval(gateway.config().ping_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    heartbeat.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            event = connection.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize progress event");
                        continue;
                    }
                };
                if !send_within(&mut sender, Message::Text(text.into()), send_limit).await {
                    break;
                }
            }

            _ = heartbeat.tick() => {
                if awaiting_pong {
                    debug!(connection_id = %connection_id, "Realtime client missed heartbeat");
                    break;
                }
                awaiting_pong = true;
                if !send_within(&mut sender, Message::Ping(Bytes::new()), send_limit).await {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                    Some(Ok(Message::Ping(payload))) => {
                        if !send_within(&mut sender, Message::Pong(payload), send_limit).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        awaiting_pong = false;
                        if is_ping_text(text.as_str())
                            && !send_within(&mut sender, Message::Text("pong".into()), send_limit)
                                .await
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = tokio::time::timeout(send_limit, sender.close()).await;
    debug!(connection_id = %connection_id, "Realtime client disconnected");
}
