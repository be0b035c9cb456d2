//! Connection handlers for the Parley server.
//!
//! This module owns the connection lifecycle: authenticate, register
//! with the engine, pump frames in both directions, and tear down on
//! close. One task runs per connection, plus one forwarder task per
//! room subscription bridging room broadcasts into the connection's
//! outbound queue.

use crate::auth::{Authenticator, SubjectAuth};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use parley_core::{ChatId, ConnectionId, Engine, RoomEvent, Store, UserId};
use parley_protocol::{codec, ClientFrame, ServerFrame};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The session and fan-out engine.
    pub engine: Engine,
    /// Authentication boundary.
    pub auth: Arc<dyn Authenticator>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state over a store.
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        let engine = Engine::new(Arc::clone(&store), config.engine_config());
        let auth: Arc<dyn Authenticator> = Arc::new(SubjectAuth::new(store));

        Self {
            engine,
            auth,
            config,
        }
    }
}

/// Build the HTTP router.
#[must_use]
pub fn app(state: Arc<AppState>) -> Router {
    let websocket_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config, store: Arc<dyn Store>) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr();
    let websocket_path = config.transport.websocket_path.clone();
    let state = Arc::new(AppState::new(config, store));

    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, websocket_path);

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket connection parameters.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    /// Credential resolved by the authentication boundary.
    token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// Authentication happens before the upgrade, so an invalid token is
/// rejected at the HTTP layer.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(token) = params.token else {
        return (StatusCode::UNAUTHORIZED, "Missing token").into_response();
    };

    let Some(user_id) = state.auth.authenticate(&token).await else {
        metrics::record_error("auth");
        return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
    };

    if state.engine.registry().len() >= state.config.limits.max_connections {
        warn!("Connection limit reached, rejecting upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "Server full").into_response();
    }

    ws.on_upgrade(move |socket| handle_websocket(socket, state, user_id))
        .into_response()
}

/// Handle an authenticated WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, user_id: UserId) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    debug!(connection = %connection_id, user = %user_id, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Outbound queue: the registry and every room forwarder feed it.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Arc<ServerFrame>>();

    if let Err(err) = state
        .engine
        .connect(&user_id, &connection_id, out_tx.clone())
        .await
    {
        warn!(connection = %connection_id, user = %user_id, error = %err, "Registration failed");
        let _ = send_frame(&mut sender, &ServerFrame::error(err.client_message())).await;
        return;
    }

    // Track room forwarder handles for cleanup
    let mut room_tasks: HashMap<ChatId, JoinHandle<()>> = HashMap::new();

    let mut heartbeat =
        tokio::time::interval(Duration::from_millis(state.config.heartbeat.interval_ms));
    let idle_timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut last_activity = Instant::now();

    // Event processing loop
    loop {
        tokio::select! {
            biased;

            // Deliver queued outbound frames
            Some(frame) = out_rx.recv() => {
                match codec::encode(&frame) {
                    Ok(text) => {
                        metrics::record_message(text.len(), "outbound");
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "Outbound encode failed");
                        metrics::record_error("encode");
                    }
                }
            }

            // Heartbeat and idle enforcement
            _ = heartbeat.tick() => {
                if last_activity.elapsed() > idle_timeout {
                    warn!(connection = %connection_id, "Idle timeout, closing");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        let start = std::time::Instant::now();
                        metrics::record_message(text.len(), "inbound");

                        match codec::decode(&text) {
                            Ok(frame) => {
                                if let Err(e) = handle_frame(
                                    frame,
                                    &user_id,
                                    &connection_id,
                                    &state,
                                    &mut sender,
                                    &mut room_tasks,
                                    &out_tx,
                                ).await {
                                    error!(connection = %connection_id, error = %e, "Frame handling error");
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(connection = %connection_id, error = %e, "Undecodable frame");
                                metrics::record_error("protocol");
                                if send_frame(&mut sender, &ServerFrame::error("Malformed event")).await.is_err() {
                                    break;
                                }
                            }
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_activity = Instant::now();
                        metrics::record_error("protocol");
                        if send_frame(&mut sender, &ServerFrame::error("Binary frames are not supported")).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_activity = Instant::now();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: abort room forwarders, then let the engine handle the
    // offline transition.
    for (_, handle) in room_tasks {
        handle.abort();
    }

    state.engine.disconnect(&user_id, &connection_id).await;
    metrics::set_active_rooms(state.engine.router().stats().room_count);

    debug!(connection = %connection_id, user = %user_id, "WebSocket disconnected");
}

/// Handle a decoded client frame.
///
/// Engine errors are delivered to this connection only; they never tear
/// the connection down.
async fn handle_frame(
    frame: ClientFrame,
    user_id: &str,
    connection_id: &ConnectionId,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
    room_tasks: &mut HashMap<ChatId, JoinHandle<()>>,
    out_tx: &mpsc::UnboundedSender<Arc<ServerFrame>>,
) -> Result<()> {
    match frame {
        ClientFrame::JoinRoom { chat_id } => {
            debug!(connection = %connection_id, chat = %chat_id, "Join request");

            match state.engine.join_room(user_id, connection_id, &chat_id).await {
                Ok(outcome) => {
                    if let Some(rx) = outcome.receiver {
                        let task = spawn_room_forwarder(rx, connection_id.clone(), out_tx.clone());
                        room_tasks.insert(chat_id.clone(), task);
                        metrics::record_subscription();
                        metrics::set_active_rooms(state.engine.router().stats().room_count);
                    }
                }
                Err(e) => {
                    warn!(connection = %connection_id, chat = %chat_id, error = %e, "Join failed");
                    metrics::record_error("join_room");
                    send_frame(sender, &ServerFrame::error(e.client_message())).await?;
                }
            }
        }

        ClientFrame::SendMessage { chat_id, content } => {
            if let Err(e) = state.engine.send_message(user_id, &chat_id, &content).await {
                debug!(connection = %connection_id, chat = %chat_id, error = %e, "Send failed");
                metrics::record_error("send_message");
                send_frame(sender, &ServerFrame::error(e.client_message())).await?;
            }
        }

        ClientFrame::Typing { chat_id } => {
            state.engine.typing(user_id, connection_id, &chat_id);
        }

        ClientFrame::StopTyping { chat_id } => {
            state.engine.stop_typing(user_id, connection_id, &chat_id);
        }

        ClientFrame::MessageSeen {
            chat_id,
            message_id,
        } => {
            if let Err(e) = state.engine.mark_seen(user_id, &chat_id, &message_id).await {
                debug!(connection = %connection_id, message = %message_id, error = %e, "Mark seen failed");
                metrics::record_error("message_seen");
                send_frame(sender, &ServerFrame::error(e.client_message())).await?;
            }
        }
    }

    Ok(())
}

/// Bridge a room's broadcast receiver into the connection's outbound
/// queue, applying the per-event delivery filter.
fn spawn_room_forwarder(
    mut rx: broadcast::Receiver<RoomEvent>,
    connection_id: ConnectionId,
    out_tx: mpsc::UnboundedSender<Arc<ServerFrame>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !event.should_deliver(&connection_id) {
                        continue;
                    }
                    if out_tx.send(event.frame).is_err() {
                        break; // Connection gone
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(connection = %connection_id, skipped, "Room receiver lagged");
                    continue;
                }
            }
        }
    })
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<()> {
    let text = codec::encode(frame)?;
    metrics::record_message(text.len(), "outbound");
    sender.send(Message::Text(text)).await?;
    Ok(())
}
