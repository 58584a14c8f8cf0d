//! WebSocket mock of the upstream realtime API
//!
//! Accepts any number of connections, records the handshake and every text
//! frame it receives, and can greet each connection with scripted frames or
//! answer client events through a responder.

// Allow dead code - each test binary uses a subset
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// Frames to send back for a received client event.
pub type Responder = Box<dyn Fn(&Value) -> Vec<String> + Send + Sync>;

#[derive(Default)]
pub struct MockUpstreamState {
    pub connections: AtomicUsize,
    /// Request URI of every handshake
    pub paths: Mutex<Vec<String>>,
    /// `Authorization` header of every handshake
    pub auth_headers: Mutex<Vec<String>>,
    /// Text frames received, tagged with the connection number
    pub received: Mutex<Vec<(usize, String)>>,
    greeting: Vec<String>,
    close_after_greeting: bool,
    responder: Option<Responder>,
}

impl MockUpstreamState {
    /// Every frame received on connection `conn`, parsed.
    pub fn received_json(&self, conn: usize) -> Vec<Value> {
        self.received
            .lock()
            .iter()
            .filter(|(c, _)| *c == conn)
            .filter_map(|(_, text)| serde_json::from_str(text).ok())
            .collect()
    }

    /// `type` tags of every frame received on connection `conn`.
    pub fn received_types(&self, conn: usize) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter(|(c, _)| *c == conn)
            .filter_map(|(_, text)| {
                serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_owned))
            })
            .collect()
    }
}

pub struct MockUpstream {
    addr: SocketAddr,
    pub state: Arc<MockUpstreamState>,
    task: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        Self::start_with(Vec::new(), false).await
    }

    /// Send `greeting` frames on every new connection, then optionally close it.
    pub async fn start_with(greeting: Vec<String>, close_after_greeting: bool) -> Self {
        Self::spawn(MockUpstreamState {
            greeting,
            close_after_greeting,
            ..Default::default()
        })
        .await
    }

    /// Answer each received client event with the frames `responder` returns.
    pub async fn start_responding(
        responder: impl Fn(&Value) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        Self::spawn(MockUpstreamState {
            responder: Some(Box::new(responder)),
            ..Default::default()
        })
        .await
    }

    async fn spawn(state: MockUpstreamState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(state);

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state).await;
                });
            }
        });

        Self { addr, state, task }
    }

    /// Base URL to configure as the realtime endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }

    /// Poll until `predicate` holds or the timeout expires.
    pub async fn wait_for(&self, predicate: impl Fn(&MockUpstreamState) -> bool) -> bool {
        for _ in 0..100 {
            if predicate(&self.state) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockUpstreamState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handshake_state = state.clone();
    let ws_stream = accept_hdr_async(stream, move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        handshake_state.paths.lock().push(req.uri().to_string());
        if let Some(auth) = req
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
        {
            handshake_state.auth_headers.lock().push(auth.to_string());
        }
        Ok(resp)
    })
    .await?;
    let conn_id = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let (mut write, mut read) = ws_stream.split();

    for frame in &state.greeting {
        write.send(Message::Text(frame.clone().into())).await?;
    }
    if state.close_after_greeting {
        write.send(Message::Close(None)).await?;
        return Ok(());
    }

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                state.received.lock().push((conn_id, text.as_str().to_owned()));
                let replies = match (&state.responder, serde_json::from_str::<Value>(text.as_str())) {
                    (Some(responder), Ok(event)) => responder(&event),
                    _ => Vec::new(),
                };
                for reply in replies {
                    write.send(Message::Text(reply.into())).await?;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}
