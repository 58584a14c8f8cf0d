//! End-to-end conversation scenarios over in-memory channels.
//!
//! Frames are pushed through the bridge's router exactly as the receive loops
//! would, and the messages produced on both sides are inspected.

mod fixtures;

use std::time::Duration;

use tokio::sync::mpsc;
use voice_bridge::bridge::ShutdownReason;
use voice_bridge::core::audio::BridgeKind;
use voice_bridge::core::realtime::{ClientEvent, TurnDetectionMode};
use voice_bridge::core::router::{DispatchOutcome, EventSide, FatalCondition};
use voice_bridge::core::telephony::{TelephonyOutgoingMessage, TelephonyRoute};

use fixtures::*;

async fn telephony(bridge: &TestBridge, raw: &str) -> DispatchOutcome {
    bridge.bridge.router().dispatch(EventSide::Telephony, raw).await
}

async fn upstream(bridge: &TestBridge, raw: &str) -> DispatchOutcome {
    bridge.bridge.router().dispatch(EventSide::Upstream, raw).await
}

fn appended_lengths(events: &[ClientEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::InputAudioBufferAppend { audio } => Some(decoded_len(audio)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_caller_audio_is_counted_at_upstream_rate_without_commit() {
    let mut t = TestBridge::audiocodes();
    telephony(&t, &session_initiate()).await;
    t.drain_telephony();

    for _ in 0..5 {
        let chunk = tone_chunk_b64(50, 16_000);
        telephony(&t, &user_stream_chunk(&chunk)).await;
    }

    let state = t.bridge.audio().state().await;
    assert_eq!(state.chunks_sent, 5);
    // 5 x 50 ms at 24 kHz
    assert_eq!(state.total_bytes_sent, 12_000);

    let sent = t.drain_upstream();
    assert_eq!(appended_lengths(&sent).len(), 5);
    assert!(
        !sent
            .iter()
            .any(|e| matches!(e, ClientEvent::InputAudioBufferCommit)),
        "audio must not be committed without an explicit commit"
    );
}

#[tokio::test]
async fn test_short_chunks_are_padded_to_one_hundred_ms() {
    let mut t = TestBridge::audiocodes();
    telephony(&t, &session_initiate()).await;

    telephony(&t, &user_stream_chunk(&tone_chunk_b64(10, 16_000))).await;

    // 100 ms at 24 kHz
    assert_eq!(appended_lengths(&t.drain_upstream()), vec![4_800]);
    // Only the real 10 ms counts toward the commit threshold
    assert_eq!(t.bridge.audio().state().await.total_bytes_sent, 480);
}

#[tokio::test]
async fn test_twilio_audio_is_resampled_from_eight_khz() {
    let mut t = TestBridge::new(BridgeKind::Twilio, TurnDetectionMode::ServerVad);
    telephony(&t, &session_initiate()).await;

    telephony(&t, &user_stream_chunk(&tone_chunk_b64(200, 8_000))).await;

    // 200 ms at 24 kHz, no padding needed
    assert_eq!(appended_lengths(&t.drain_upstream()), vec![9_600]);
    assert_eq!(t.bridge.audio().state().await.total_bytes_sent, 9_600);
}

#[tokio::test]
async fn test_two_deltas_share_one_playback_stream() {
    let mut t = TestBridge::audiocodes();
    telephony(&t, &session_initiate()).await;
    t.drain_telephony();

    upstream(&t, &response_created("resp-1")).await;
    let delta = tone_chunk_b64(100, 24_000);
    upstream(&t, &audio_delta("resp-1", &delta)).await;
    upstream(&t, &audio_delta("resp-1", &delta)).await;
    upstream(&t, &audio_done("resp-1")).await;

    let messages = t.drain_telephony();
    assert_eq!(
        type_names(&messages),
        vec!["stream.start", "stream.chunk", "stream.chunk", "stream.stop"]
    );

    let stream_ids: Vec<&str> = messages
        .iter()
        .filter_map(|m| match m {
            TelephonyOutgoingMessage::StreamStart { stream_id, .. }
            | TelephonyOutgoingMessage::StreamChunk { stream_id, .. }
            | TelephonyOutgoingMessage::StreamStop { stream_id, .. } => Some(stream_id.as_str()),
            _ => None,
        })
        .collect();
    assert!(stream_ids.windows(2).all(|w| w[0] == w[1]));

    // Playback is resampled to the caller's 16 kHz
    if let TelephonyOutgoingMessage::StreamChunk { audio_chunk, .. } = &messages[1] {
        assert_eq!(decoded_len(audio_chunk), 3_200);
    } else {
        panic!("expected a stream chunk");
    }
    assert!(!t.bridge.audio().has_active_stream().await);
}

#[tokio::test]
async fn test_delta_without_conversation_is_dropped() {
    let mut t = TestBridge::audiocodes();
    upstream(&t, &audio_delta("resp-1", &tone_chunk_b64(20, 24_000))).await;
    assert!(t.drain_telephony().is_empty());
}

#[tokio::test]
async fn test_input_during_response_is_issued_after_done() {
    let mut t = TestBridge::audiocodes();
    telephony(&t, &session_initiate()).await;

    upstream(&t, &response_created("resp-1")).await;
    telephony(&t, &dtmf("5")).await;
    assert!(t.drain_upstream().is_empty(), "input must wait for the active response");
    assert!(t.bridge.lifecycle().state().pending_user_input.is_some());

    assert_eq!(upstream(&t, &response_done("resp-1")).await, DispatchOutcome::Logged);

    let sent = t.drain_upstream();
    assert_eq!(sent.len(), 2);
    match &sent[0] {
        ClientEvent::ConversationItemCreate { item } => {
            let text = item
                .content
                .as_ref()
                .and_then(|c| c.first())
                .and_then(|p| p.text.clone())
                .unwrap_or_default();
            assert!(text.contains('5'));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(sent[1], ClientEvent::ResponseCreate));

    let state = t.bridge.lifecycle().state();
    assert!(state.pending_user_input.is_none());
    assert!(!state.response_active);
}

#[tokio::test]
async fn test_caller_speech_interrupts_playback() {
    let mut t = TestBridge::audiocodes();
    telephony(&t, &session_initiate()).await;
    upstream(&t, &response_created("resp-1")).await;
    upstream(&t, &audio_delta("resp-1", &tone_chunk_b64(50, 24_000))).await;
    t.drain_telephony();

    upstream(&t, &speech_started()).await;

    assert_eq!(type_names(&t.drain_telephony()), vec!["stream.stop"]);
    assert!(!t.bridge.audio().has_active_stream().await);
}

#[tokio::test]
async fn test_manual_turns_commit_on_stream_stop() {
    let mut t = TestBridge::new(BridgeKind::AudioCodes, TurnDetectionMode::Manual);
    telephony(&t, &session_initiate()).await;
    for _ in 0..4 {
        telephony(&t, &user_stream_chunk(&tone_chunk_b64(50, 16_000))).await;
    }
    t.drain_upstream();
    t.drain_telephony();

    telephony(&t, &user_stream_stop()).await;

    assert_eq!(type_names(&t.drain_telephony()), vec!["userStream.stopped"]);
    let sent = t.drain_upstream();
    assert!(matches!(sent[0], ClientEvent::InputAudioBufferCommit));
    assert!(matches!(sent[1], ClientEvent::ResponseCreate));
    assert_eq!(t.bridge.audio().state().await.total_bytes_sent, 0);
}

#[tokio::test]
async fn test_manual_turns_skip_short_commit() {
    let mut t = TestBridge::new(BridgeKind::AudioCodes, TurnDetectionMode::Manual);
    telephony(&t, &session_initiate()).await;
    telephony(&t, &user_stream_chunk(&tone_chunk_b64(20, 16_000))).await;
    t.drain_upstream();

    telephony(&t, &user_stream_stop()).await;
    assert!(t.drain_upstream().is_empty());
}

#[tokio::test]
async fn test_server_vad_does_not_commit_on_stream_stop() {
    let mut t = TestBridge::audiocodes();
    telephony(&t, &session_initiate()).await;
    telephony(&t, &user_stream_chunk(&tone_chunk_b64(200, 16_000))).await;
    t.drain_upstream();

    telephony(&t, &user_stream_stop()).await;
    assert!(t.drain_upstream().is_empty());
}

#[tokio::test]
async fn test_run_ends_when_telephony_closes() {
    let mut t = TestBridge::audiocodes();
    let (frames_tx, mut frames_rx) = mpsc::channel(16);
    let (_upstream_tx, mut upstream_rx) = mpsc::channel(16);

    frames_tx.send(session_initiate()).await.unwrap();
    drop(frames_tx);

    let reason = tokio::time::timeout(
        Duration::from_secs(5),
        t.bridge.run(&mut frames_rx, &mut upstream_rx),
    )
    .await
    .expect("bridge should stop");
    assert_eq!(reason, ShutdownReason::TelephonyClosed);

    let mut routes = Vec::new();
    while let Ok(route) = t.telephony_rx.try_recv() {
        routes.push(route);
    }
    assert!(matches!(
        routes.first(),
        Some(TelephonyRoute::Outgoing(TelephonyOutgoingMessage::SessionAccepted { .. }))
    ));
    assert_eq!(routes.last(), Some(&TelephonyRoute::Close));
}

#[tokio::test]
async fn test_quota_error_ends_the_call() {
    let mut t = TestBridge::audiocodes();
    let (frames_tx, mut frames_rx) = mpsc::channel(16);
    let (upstream_tx, mut upstream_rx) = mpsc::channel(16);

    frames_tx.send(session_initiate()).await.unwrap();
    // Let the session start before the upstream fails
    let run = t.bridge.run(&mut frames_rx, &mut upstream_rx);
    let feed = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        upstream_tx.send(quota_error()).await.unwrap();
    };
    let (reason, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(run, feed)
    })
    .await
    .expect("bridge should stop");

    assert_eq!(reason, ShutdownReason::Fatal(FatalCondition::QuotaExceeded));

    let mut routes = Vec::new();
    while let Ok(route) = t.telephony_rx.try_recv() {
        routes.push(route);
    }
    let end = routes.iter().find_map(|r| match r {
        TelephonyRoute::Outgoing(TelephonyOutgoingMessage::SessionEnd {
            conversation_id,
            reason,
        }) => Some((conversation_id.clone(), reason.clone())),
        _ => None,
    });
    let (conversation_id, reason) = end.expect("caller should be told why the call ended");
    assert_eq!(conversation_id, CONVERSATION_ID);
    assert!(!reason.is_empty());
    assert_eq!(routes.last(), Some(&TelephonyRoute::Close));
    drop(frames_tx);
}

#[tokio::test]
async fn test_shutdown_from_outside_is_requested() {
    let t = TestBridge::audiocodes();
    let (_frames_tx, mut frames_rx) = mpsc::channel::<String>(16);
    let (_upstream_tx, mut upstream_rx) = mpsc::channel::<String>(16);

    let token = t.bridge.cancellation_token();
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    };
    let (reason, ()) = tokio::join!(t.bridge.run(&mut frames_rx, &mut upstream_rx), stopper);
    assert_eq!(reason, ShutdownReason::Requested);
}
