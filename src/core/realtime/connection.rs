//! WebSocket connection to the upstream realtime API.
//!
//! A spawned task owns the socket. Outgoing [`ClientEvent`]s arrive on a
//! bounded channel and are serialized onto the sink; incoming text frames are
//! forwarded unparsed, so the event router decides how to interpret them.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, error, info, warn};

use super::base::{RealtimeError, RealtimeResult, RealtimeSettings};
use super::config::realtime_url;
use super::messages::ClientEvent;
use crate::core::pool::{PoolConnector, PoolError};

/// Outgoing event channel capacity.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Incoming frame channel capacity. Audio deltas dominate this traffic.
const INCOMING_CHANNEL_CAPACITY: usize = 1024;

/// Live upstream connection.
pub struct UpstreamConnection {
    sender: mpsc::Sender<ClientEvent>,
    incoming: mpsc::Receiver<String>,
    task: JoinHandle<()>,
}

impl UpstreamConnection {
    /// Dial the upstream API and configure the session.
    pub async fn connect(settings: &RealtimeSettings) -> RealtimeResult<Self> {
        settings.validate()?;

        let url = realtime_url(&settings.url, &settings.model);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("Invalid realtime URL: {e}")))?;

        let auth = HeaderValue::from_str(&format!("Bearer {}", settings.api_key.as_str()))
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("Invalid API key: {e}")))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        info!(model = %settings.model, "Connected to realtime API");

        let connection = Self::from_stream(ws_stream);
        connection
            .send(ClientEvent::SessionUpdate {
                session: settings.session_config(),
            })
            .await?;
        Ok(connection)
    }

    /// Wrap an established WebSocket and start the I/O task.
    pub fn from_stream<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel::<String>(INCOMING_CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = rx.recv() => {
                        let Some(event) = outgoing else {
                            debug!("Upstream sender dropped, closing connection");
                            break;
                        };
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                error!(event_type = event.type_name(), "Failed to serialize event: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            error!("Failed to send WebSocket message: {}", e);
                            break;
                        }
                    }

                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if incoming_tx.send(text.as_str().to_owned()).await.is_err() {
                                    debug!("Upstream receiver dropped, closing connection");
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!(?frame, "Upstream WebSocket closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("Upstream WebSocket error: {}", e);
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            let _ = ws_sink.close().await;
            info!("Upstream connection task ended");
        });

        Self {
            sender: tx,
            incoming: incoming_rx,
            task,
        }
    }

    /// Sender half for outgoing events.
    pub fn sender(&self) -> mpsc::Sender<ClientEvent> {
        self.sender.clone()
    }

    /// Raw incoming frames, borrowed by the bridge for one conversation.
    pub fn incoming_mut(&mut self) -> &mut mpsc::Receiver<String> {
        &mut self.incoming
    }

    pub async fn send(&self, event: ClientEvent) -> RealtimeResult<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }

    /// Whether the I/O task is still running.
    pub fn is_open(&self) -> bool {
        !self.task.is_finished() && !self.sender.is_closed()
    }

    /// Drop any frames that arrived after the last conversation finished.
    pub fn drain_incoming(&mut self) -> usize {
        let mut drained = 0;
        while self.incoming.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

impl Drop for UpstreamConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Dials [`UpstreamConnection`]s for the connection pool.
pub struct RealtimeConnector {
    settings: RealtimeSettings,
}

impl RealtimeConnector {
    pub fn new(settings: RealtimeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RealtimeSettings {
        &self.settings
    }
}

#[async_trait]
impl PoolConnector for RealtimeConnector {
    type Connection = UpstreamConnection;

    async fn connect(&self) -> Result<UpstreamConnection, PoolError> {
        UpstreamConnection::connect(&self.settings)
            .await
            .map_err(|e| PoolError::ConnectFailed(e.to_string()))
    }

    fn is_healthy(&self, conn: &UpstreamConnection) -> bool {
        conn.is_open()
    }
}
