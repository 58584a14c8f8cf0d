//! Telephony WebSocket handler
//!
//! One WebSocket connection is one phone conversation. The handler borrows a
//! pooled upstream connection for the whole call, builds a [`Bridge`] around
//! the two sockets and returns the upstream connection to the pool when the
//! bridge stops.

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use http::StatusCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info, warn};

use crate::bridge::{Bridge, ShutdownReason};
use crate::core::audio::BridgeKind;
use crate::core::pool::PooledConnection;
use crate::core::realtime::{ClientEvent, RealtimeResult, RealtimeSettings, UpstreamConnection};
use crate::core::telephony::TelephonyRoute;
use crate::state::AppState;

/// Optimized channel buffer size for audio workloads
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Time allowed for queued telephony frames to flush after the bridge stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for upstream to confirm a cancelled response before the
/// connection is discarded.
const UPSTREAM_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Telephony WebSocket handler using the configured default integration.
pub async fn telephony_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let kind = state.config.audio.bridge_kind;
    upgrade(ws, state, kind)
}

/// Telephony WebSocket handler for a named integration (`audiocodes`, `twilio`).
pub async fn telephony_kind_handler(
    ws: WebSocketUpgrade,
    Path(kind): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match BridgeKind::parse(&kind) {
        Some(kind) => upgrade(ws, state, kind),
        None => {
            warn!(kind = %kind, "Rejected telephony connection for unknown integration");
            (
                StatusCode::NOT_FOUND,
                format!("Unknown telephony integration '{kind}'"),
            )
                .into_response()
        }
    }
}

fn upgrade(ws: WebSocketUpgrade, state: Arc<AppState>, kind: BridgeKind) -> Response {
    info!(bridge_kind = %kind, "Telephony WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_telephony_socket(socket, state, kind))
}

/// Run one conversation over an upgraded telephony socket.
async fn handle_telephony_socket(socket: WebSocket, app_state: Arc<AppState>, kind: BridgeKind) {
    info!(bridge_kind = %kind, "Telephony WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (route_tx, mut route_rx) = mpsc::channel::<TelephonyRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing messages
    let sender_task = tokio::spawn(async move {
        while let Some(route) = route_rx.recv().await {
            let result = match route {
                TelephonyRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!(message_type = message.type_name(), "Failed to serialize telephony message: {}", e);
                        continue;
                    }
                },
                TelephonyRoute::Close => {
                    debug!("Closing telephony WebSocket connection");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                warn!("Failed to send telephony WebSocket message: {}", e);
                break;
            }
        }
    });

    // Reader task: text frames go to the bridge unparsed. Dropping `frame_tx`
    // ends the bridge's telephony loop.
    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(CHANNEL_BUFFER_SIZE);
    let reader_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if frame_tx.send(text.as_str().to_owned()).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Binary(data)) => {
                    debug!(bytes = data.len(), "Ignoring binary telephony frame");
                }
                Ok(Message::Close(_)) => {
                    info!("Telephony WebSocket close received");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Telephony WebSocket error: {}", e);
                    break;
                }
            }
        }
    });

    let mut connection = match app_state.pool.acquire().await {
        Ok(connection) => connection,
        Err(e) => {
            error!(error = %e, "No upstream connection available, refusing call");
            reader_task.abort();
            let _ = route_tx.send(TelephonyRoute::Close).await;
            finish_writer(sender_task).await;
            return;
        }
    };

    if let Err(e) = prepare_connection(&mut connection, &app_state.config.realtime).await {
        error!(connection_id = %connection.id(), error = %e, "Failed to prepare upstream connection");
        app_state.pool.release(connection, false);
        reader_task.abort();
        let _ = route_tx.send(TelephonyRoute::Close).await;
        finish_writer(sender_task).await;
        return;
    }

    let bridge = match Bridge::builder(app_state.config.bridge_config(kind))
        .build(connection.sender(), route_tx.clone())
    {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(error = %e, "Failed to build bridge");
            app_state.pool.release(connection, true);
            reader_task.abort();
            let _ = route_tx.send(TelephonyRoute::Close).await;
            finish_writer(sender_task).await;
            return;
        }
    };

    // Server shutdown stops the bridge with the default `Requested` reason.
    let bridge_token = bridge.cancellation_token();
    let server_shutdown = app_state.shutdown.clone();
    let shutdown_watch = tokio::spawn(async move {
        tokio::select! {
            _ = server_shutdown.cancelled() => bridge_token.cancel(),
            _ = bridge_token.cancelled() => {}
        }
    });

    let reason = bridge.run(&mut frame_rx, connection.incoming_mut()).await;

    let reusable = connection.is_open()
        && !matches!(reason, ShutdownReason::Fatal(_) | ShutdownReason::UpstreamClosed);
    let healthy = reusable
        && bridge
            .settle_upstream(connection.incoming_mut(), UPSTREAM_SETTLE_TIMEOUT)
            .await;
    drop(bridge);
    info!(
        connection_id = %connection.id(),
        sessions = connection.session_count(),
        healthy,
        reason = %reason,
        "Releasing upstream connection"
    );
    app_state.pool.release(connection, healthy);

    shutdown_watch.abort();
    reader_task.abort();
    drop(route_tx);
    finish_writer(sender_task).await;

    info!(bridge_kind = %kind, "Telephony WebSocket connection terminated");
}

/// Reset a pooled connection before a new conversation uses it.
///
/// Stale frames from the previous conversation are discarded. A reused
/// connection gets its session configuration re-sent and its input buffer
/// cleared.
async fn prepare_connection(
    connection: &mut PooledConnection<UpstreamConnection>,
    settings: &RealtimeSettings,
) -> RealtimeResult<()> {
    let drained = connection.drain_incoming();
    if drained > 0 {
        debug!(connection_id = %connection.id(), drained, "Discarded stale upstream frames");
    }

    // `acquire` counts the conversation that is about to start
    if connection.session_count() > 1 {
        connection
            .send(ClientEvent::SessionUpdate {
                session: settings.session_config(),
            })
            .await?;
        connection.send(ClientEvent::InputAudioBufferClear).await?;
    }
    Ok(())
}

async fn finish_writer(sender_task: tokio::task::JoinHandle<()>) {
    let abort = sender_task.abort_handle();
    if timeout(WRITER_DRAIN_TIMEOUT, sender_task).await.is_err() {
        warn!("Telephony writer did not finish in time, aborting");
        abort.abort();
    }
}
