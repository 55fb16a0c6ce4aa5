/// WebSocket endpoint for the real-time gateway
///
/// The bearer credential comes from the `Authorization` header or, for
/// browsers that cannot set headers on an upgrade, a `token` query
/// parameter. Bad credentials get a 401 before the upgrade.
///
/// Each socket runs one loop that forwards queued server events, answers
/// pings, sends its own keep-alive pings and dispatches client frames to
/// the gateway.
use crate::{
    api::middleware::extract_bearer_token,
    context::AppContext,
    error::ChatError,
    gateway::{ClientEvent, Connection, Gateway, ServerEvent},
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::Deserialize;
use tokio::time::{interval, Duration, Instant};

const PING_INTERVAL_SECS: u64 = 30;
/// Silence after which a socket is considered dead
const IDLE_TIMEOUT_SECS: u64 = 90;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
    State(ctx): State<AppContext>,
) -> Response {
    let Some(credential) = extract_bearer_token(&headers).or(params.token) else {
        return ChatError::Unauthorized("Missing credential".to_string()).into_response();
    };

    let user_id = match ctx.gateway.authenticate(&credential).await {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::debug!("Socket authentication failed: {}", e);
            return e.into_response();
        }
    };

    let gateway = ctx.gateway.clone();
    ws.on_upgrade(move |socket| async move {
        match gateway.attach(user_id).await {
            Ok(connection) => handle_socket(socket, connection, gateway).await,
            Err(e) => tracing::warn!("Socket rejected after upgrade: {}", e),
        }
    })
}

async fn handle_socket(socket: WebSocket, connection: Connection, gateway: Gateway) {
    let Connection {
        socket_id,
        user_id,
        mut events,
    } = connection;
    let (mut sender, mut receiver) = socket.split();

    let mut ping_interval = interval(Duration::from_secs(PING_INTERVAL_SECS));
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            tracing::debug!(%socket_id, "Client disconnected during send");
                            break;
                        }
                    }
                    None => {
                        // Registry drained on shutdown
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if last_seen.elapsed() > Duration::from_secs(IDLE_TIMEOUT_SECS) {
                    tracing::info!(%socket_id, "Socket idle, closing");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                last_seen = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => gateway.handle_client_event(socket_id, &user_id, event).await,
                            Err(e) => tracing::debug!(%socket_id, "Ignoring malformed frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::debug!(%socket_id, "Client closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(%socket_id, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
        }
    }

    gateway.disconnect(socket_id).await;
    tracing::info!(%socket_id, user_id = %user_id, "Socket disconnected");
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(event = event.name(), "Failed to encode event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json)).await
}
