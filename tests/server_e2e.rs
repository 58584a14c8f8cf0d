//! Full server: telephony WebSocket in, mock realtime API out.

mod mock_upstream;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::State;
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use zeroize::Zeroizing;

use mock_upstream::MockUpstream;
use voice_bridge::config::ServerConfig;
use voice_bridge::handlers::api::health_check;
use voice_bridge::routes;
use voice_bridge::state::AppState;

async fn start_server(mock: &MockUpstream) -> (String, Arc<AppState>) {
    let mut config = ServerConfig::default();
    config.realtime.api_key = Zeroizing::new("sk-test".to_string());
    config.realtime.url = mock.url();
    config.audio.vad_enabled = false;

    let state = AppState::new(config).await;
    let app = routes::api::create_api_router()
        .merge(routes::telephony::create_telephony_router())
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}"), state)
}

async fn next_json<S>(stream: &mut S) -> Option<Value>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .ok()??
            .ok()?;
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Open a call, get it accepted, hang up, and wait for the server to close.
async fn run_call(base: &str, conversation_id: &str) {
    let (ws, _) = connect_async(format!("{base}/bridge/audiocodes")).await.unwrap();
    let (mut write, mut read) = ws.split();

    write
        .send(Message::Text(
            json!({
                "type": "session.initiate",
                "conversationId": conversation_id,
                "supportedMediaFormats": ["raw/lpcm16"]
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let accepted = next_json(&mut read).await.expect("session should be accepted");
    assert_eq!(accepted["type"], "session.accepted");
    assert_eq!(accepted["conversationId"], conversation_id);
    assert_eq!(accepted["mediaFormat"], "raw/lpcm16");

    write
        .send(Message::Text(
            json!({"type": "session.end", "conversationId": conversation_id, "reason": "done"})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    // Server closes after the caller hangs up
    while next_json(&mut read).await.is_some() {}
}

async fn wait_for_idle(state: &AppState, idle: usize) -> bool {
    for _ in 0..100 {
        if state.pool.stats().idle == idle {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_call_is_accepted_and_upstream_connection_is_reused() {
    let mock = MockUpstream::start().await;
    let (base, state) = start_server(&mock).await;

    run_call(&base, "call-1").await;
    assert!(wait_for_idle(&state, 1).await, "connection should return to the pool");

    run_call(&base, "call-2").await;
    assert!(wait_for_idle(&state, 1).await);

    assert_eq!(mock.state.connections.load(Ordering::SeqCst), 1);
    // The reused connection is reconfigured and its input buffer cleared
    assert!(
        mock.wait_for(|s| s.received_types(1).len() >= 3).await,
        "got {:?}",
        mock.state.received_types(1)
    );
    assert_eq!(
        mock.state.received_types(1),
        vec!["session.update", "session.update", "input_audio_buffer.clear"]
    );
}

#[tokio::test]
async fn test_caller_audio_reaches_upstream() {
    let mock = MockUpstream::start().await;
    let (base, _state) = start_server(&mock).await;

    let (ws, _) = connect_async(format!("{base}/bridge")).await.unwrap();
    let (mut write, mut read) = ws.split();
    write
        .send(Message::Text(
            json!({"type": "session.initiate", "conversationId": "c-audio"})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    next_json(&mut read).await.expect("session should be accepted");

    let chunk = base64::Engine::encode(&base64::prelude::BASE64_STANDARD, [0u8; 3200]);
    write
        .send(Message::Text(
            json!({"type": "userStream.chunk", "conversationId": "c-audio", "audioChunk": chunk})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    assert!(
        mock.wait_for(|s| s
            .received_types(1)
            .iter()
            .any(|t| t == "input_audio_buffer.append"))
            .await
    );
}

#[tokio::test]
async fn test_unknown_integration_is_not_found() {
    let mock = MockUpstream::start().await;
    let (base, _state) = start_server(&mock).await;

    match connect_async(format!("{base}/bridge/sip")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("unknown integration should be rejected"),
    }
    assert_eq!(mock.state.connections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_call_is_closed_when_upstream_is_unreachable() {
    let mut config = ServerConfig::default();
    // Valid settings, nothing listening
    config.realtime.api_key = Zeroizing::new("sk-test".to_string());
    config.realtime.url = "ws://127.0.0.1:9/v1/realtime".to_string();
    let state = AppState::new(config).await;
    let app = routes::telephony::create_telephony_router().with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (ws, _) = connect_async(format!("ws://{addr}/bridge")).await.unwrap();
    let (_write, mut read) = ws.split();
    assert!(next_json(&mut read).await.is_none(), "call should be closed");
}

#[tokio::test]
async fn test_health_reports_pool_and_shutdown() {
    let mock = MockUpstream::start().await;
    let (_base, state) = start_server(&mock).await;

    let health = health_check(State(state.clone())).await.0;
    assert_eq!(health.status, "ok");
    assert_eq!(health.bridge_kind, "audiocodes");
    assert_eq!(health.pool.max_size, 10);

    state.begin_shutdown();
    let health = health_check(State(state)).await.0;
    assert_eq!(health.status, "shutting_down");
}

/// Upstream that answers a DTMF turn with a response that keeps streaming
/// until it is cancelled. `confirm_cancel` controls whether `response.cancel`
/// gets a `response.done`.
async fn streaming_upstream(confirm_cancel: bool) -> MockUpstream {
    MockUpstream::start_responding(move |event| {
        let delta = base64::Engine::encode(&base64::prelude::BASE64_STANDARD, [0u8; 4800]);
        match event["type"].as_str() {
            Some("conversation.item.create") => vec![
                json!({"type": "conversation.item.created", "item": {"id": "item_user", "type": "message"}})
                    .to_string(),
            ],
            Some("response.create") => vec![
                json!({"type": "response.created", "response": {"id": "resp_1", "status": "in_progress"}})
                    .to_string(),
                json!({"type": "response.output_item.added", "response_id": "resp_1", "output_index": 0, "item": {"id": "item_bot", "type": "message"}})
                    .to_string(),
                json!({"type": "response.audio.delta", "response_id": "resp_1", "item_id": "item_bot", "output_index": 0, "content_index": 0, "delta": delta})
                    .to_string(),
            ],
            Some("response.cancel") if confirm_cancel => vec![
                json!({"type": "response.done", "response": {"id": "resp_1", "status": "cancelled"}})
                    .to_string(),
            ],
            _ => Vec::new(),
        }
    })
    .await
}

/// Press a key, wait for the bot to start talking, then hang up mid-response.
async fn hang_up_during_response(base: &str, conversation_id: &str) {
    let (ws, _) = connect_async(format!("{base}/bridge/audiocodes")).await.unwrap();
    let (mut write, mut read) = ws.split();

    let frames = [
        json!({"type": "session.initiate", "conversationId": conversation_id}),
        json!({
            "type": "activities",
            "conversationId": conversation_id,
            "activities": [{"type": "event", "name": "dtmf", "value": "5"}]
        }),
    ];
    for frame in frames {
        write.send(Message::Text(frame.to_string().into())).await.unwrap();
    }

    loop {
        let msg = next_json(&mut read).await.expect("bot audio should start");
        if msg["type"] == "stream.start" {
            break;
        }
    }

    write
        .send(Message::Text(
            json!({"type": "session.end", "conversationId": conversation_id})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    while next_json(&mut read).await.is_some() {}
}

#[tokio::test]
async fn test_hangup_mid_response_cancels_and_clears_before_reuse() {
    let mock = streaming_upstream(true).await;
    let (base, state) = start_server(&mock).await;

    hang_up_during_response(&base, "call-a").await;
    assert!(wait_for_idle(&state, 1).await, "settled connection should be pooled");
    assert!(
        mock.wait_for(|s| s
            .received_types(1)
            .iter()
            .filter(|t| *t == "conversation.item.delete")
            .count()
            >= 2)
            .await
    );

    let received = mock.state.received_json(1);
    let types: Vec<_> = received.iter().filter_map(|e| e["type"].as_str()).collect();
    assert!(types.contains(&"response.cancel"), "got {types:?}");
    let deleted: Vec<_> = received
        .iter()
        .filter(|e| e["type"] == "conversation.item.delete")
        .filter_map(|e| e["item_id"].as_str())
        .collect();
    assert_eq!(deleted, vec!["item_user", "item_bot"]);

    // The next caller gets the same, now clean, connection
    let (ws, _) = connect_async(format!("{base}/bridge/audiocodes")).await.unwrap();
    let (mut write, mut read) = ws.split();
    write
        .send(Message::Text(
            json!({"type": "session.initiate", "conversationId": "call-b"})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let accepted = next_json(&mut read).await.expect("session should be accepted");
    assert_eq!(accepted["type"], "session.accepted");
    write
        .send(Message::Text(
            json!({"type": "session.end", "conversationId": "call-b"})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    while let Some(msg) = next_json(&mut read).await {
        assert_ne!(msg["type"], "stream.start", "previous caller's audio leaked");
    }
    assert_eq!(mock.state.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unconfirmed_cancel_discards_connection() {
    let mock = streaming_upstream(false).await;
    let (base, state) = start_server(&mock).await;

    hang_up_during_response(&base, "call-a").await;

    let mut discarded = false;
    for _ in 0..250 {
        let stats = state.pool.stats();
        if stats.total == 0 && stats.idle == 0 {
            discarded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(discarded, "connection should be closed, not pooled");
    assert!(
        mock.state
            .received_types(1)
            .iter()
            .any(|t| t == "response.cancel")
    );
    assert!(
        !mock.state
            .received_types(1)
            .iter()
            .any(|t| t == "conversation.item.delete")
    );
}
