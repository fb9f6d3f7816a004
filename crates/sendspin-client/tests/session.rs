//! Sendspin session integration tests
//!
//! Drive a real `SendspinClient` against the in-process test server.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p sendspin-client --test session -- --nocapture
//! ```

mod harness;

use harness::{init_logging, pcm_silence_20ms, ServerConn, TestServer, STEP_TIMEOUT};
use sendspin_client::{
    ChannelSink, ClientConfig, ClientEvent, Error, SendspinClient, SessionState, Severity,
    SinkEvent,
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_test::{assert_err, assert_ok};

/// Server clock used by the scripted time responses
const SERVER_NOW_US: i64 = 5_000_000_000;

fn test_config(url: String) -> ClientConfig {
    let mut config = ClientConfig::new(url);
    config.client_id = Some("it-client".to_string());
    config.client_name = "Integration Player".to_string();
    config.connect_timeout_ms = 2_000;
    config.reconnect.base_delay_ms = 50;
    config
}

fn client_with_sink(config: ClientConfig) -> (SendspinClient, mpsc::UnboundedReceiver<SinkEvent>) {
    let (sink, rx) = ChannelSink::new();
    let client = SendspinClient::with_sink(config, Box::new(sink)).unwrap();
    (client, rx)
}

async fn wait_for_event<F>(events: &mut broadcast::Receiver<ClientEvent>, mut pred: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    tokio::time::timeout(STEP_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn wait_for_state(client: &SendspinClient, target: SessionState) {
    let mut state = client.watch_state();
    tokio::time::timeout(STEP_TIMEOUT, state.wait_for(|s| *s == target))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

async fn wait_for_play(sink: &mut mpsc::UnboundedReceiver<SinkEvent>) -> sendspin_client::playback::ScheduledBuffer {
    tokio::time::timeout(STEP_TIMEOUT, async {
        loop {
            match sink.recv().await {
                Some(SinkEvent::Play(buffer)) => return buffer,
                Some(_) => continue,
                None => panic!("sink channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for scheduled audio")
}

/// Poll until the first time response has been folded into the estimate
async fn wait_for_clock_update(client: &SendspinClient) {
    tokio::time::timeout(STEP_TIMEOUT, async {
        while client.snapshot().clock_variance >= 1_000_000.0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("clock estimate never updated");
}

/// Connect and complete the handshake; returns the server side of the session
async fn connect_and_handshake(client: &SendspinClient, server: &mut TestServer) -> ServerConn {
    let (connected, conn) = tokio::join!(client.connect(), async {
        let mut conn = server.accept().await.unwrap();
        conn.handshake().await.unwrap();
        conn
    });
    assert_ok!(connected);
    conn
}

#[tokio::test]
async fn test_handshake_reaches_syncing() {
    init_logging();
    let mut server = TestServer::start().await.unwrap();
    let (client, _sink) = client_with_sink(test_config(server.url()));

    let (connected, hello) = tokio::join!(client.connect(), async {
        let mut conn = server.accept().await.unwrap();
        let hello = conn.handshake().await.unwrap();
        (conn, hello)
    });
    assert_ok!(connected);
    let (_conn, hello) = hello;

    assert_eq!(hello["type"], "client/hello");
    let payload = &hello["payload"];
    assert_eq!(payload["client_id"], "it-client");
    assert_eq!(payload["name"], "Integration Player");
    assert_eq!(payload["version"], 1);
    assert_eq!(payload["supported_roles"], json!(["player@v1"]));
    assert_eq!(
        payload["player_support"]["supported_commands"],
        json!(["volume", "mute"])
    );
    assert!(!payload["player_support"]["supported_formats"]
        .as_array()
        .unwrap()
        .is_empty());

    wait_for_state(&client, SessionState::Syncing).await;
    assert_ok!(client.disconnect().await);
}

#[tokio::test]
async fn test_grace_period_establishes_without_server_hello() {
    init_logging();
    let mut server = TestServer::start().await.unwrap();
    let mut config = test_config(server.url());
    config.handshake_grace_ms = 200;
    let (client, _sink) = client_with_sink(config);

    let (connected, _conn) = tokio::join!(client.connect(), async {
        let mut conn = server.accept().await.unwrap();
        conn.recv_type("client/hello").await.unwrap();
        conn
    });

    assert_ok!(connected);
    assert_eq!(client.state(), SessionState::Syncing);
    assert_ok!(client.disconnect().await);
}

#[tokio::test]
async fn test_time_sync_updates_estimate() {
    init_logging();
    let mut server = TestServer::start().await.unwrap();
    let (client, _sink) = client_with_sink(test_config(server.url()));

    let mut conn = connect_and_handshake(&client, &mut server).await;
    conn.answer_time(SERVER_NOW_US).await.unwrap();
    wait_for_clock_update(&client).await;

    let snapshot = client.snapshot();
    assert!(snapshot.clock_offset_us > 0.0);
    assert!(snapshot.clock_variance < 1_000_000.0);
    assert_ok!(client.disconnect().await);
}

#[tokio::test]
async fn test_pcm_stream_schedules_audio() {
    init_logging();
    let mut server = TestServer::start().await.unwrap();
    let (client, mut sink) = client_with_sink(test_config(server.url()));
    let mut events = client.subscribe();

    let mut conn = connect_and_handshake(&client, &mut server).await;
    conn.answer_time(SERVER_NOW_US).await.unwrap();
    conn.start_pcm_stream("stream-1").await.unwrap();

    let started = wait_for_event(&mut events, |e| matches!(e, ClientEvent::StreamStarted(_))).await;
    match started {
        ClientEvent::StreamStarted(info) => {
            assert_eq!(info.stream_id, "stream-1");
            assert_eq!(info.sample_rate, 48_000);
            assert_eq!(info.channels, 2);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    wait_for_state(&client, SessionState::Streaming).await;
    wait_for_event(&mut events, |e| {
        matches!(e, ClientEvent::AudioReady { stream_id } if stream_id == "stream-1")
    })
    .await;

    conn.send_audio(SERVER_NOW_US as u64 + 100_000, &pcm_silence_20ms())
        .await
        .unwrap();
    conn.send_audio(SERVER_NOW_US as u64 + 120_000, &pcm_silence_20ms())
        .await
        .unwrap();

    let first = wait_for_play(&mut sink).await;
    let second = wait_for_play(&mut sink).await;
    assert_eq!(first.buffer.frames(), 960);
    assert_eq!(first.duration_us, 20_000);
    assert_eq!(second.start_us, first.end_us());
    assert_eq!(client.snapshot().stream_id.as_deref(), Some("stream-1"));

    assert_ok!(client.disconnect().await);
}

#[tokio::test]
async fn test_malformed_frame_does_not_end_session() {
    init_logging();
    let mut server = TestServer::start().await.unwrap();
    let (client, mut sink) = client_with_sink(test_config(server.url()));

    let mut conn = connect_and_handshake(&client, &mut server).await;
    conn.start_pcm_stream("stream-1").await.unwrap();
    wait_for_state(&client, SessionState::Streaming).await;

    conn.send_raw_binary(vec![4, 0, 1]).await.unwrap();
    conn.send_audio(1_000_000, &pcm_silence_20ms()).await.unwrap();

    wait_for_play(&mut sink).await;
    assert_eq!(client.state(), SessionState::Streaming);
    assert_ok!(client.disconnect().await);
}

#[tokio::test]
async fn test_stream_clear_and_end() {
    init_logging();
    let mut server = TestServer::start().await.unwrap();
    let (client, mut sink) = client_with_sink(test_config(server.url()));
    let mut events = client.subscribe();

    let mut conn = connect_and_handshake(&client, &mut server).await;
    conn.start_pcm_stream("stream-1").await.unwrap();
    conn.send_audio(1_000_000, &pcm_silence_20ms()).await.unwrap();
    wait_for_play(&mut sink).await;

    conn.send("stream/clear", json!({ "roles": ["player"] }))
        .await
        .unwrap();
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::StreamCleared)).await;
    assert_eq!(client.snapshot().queue_depth, 0);
    assert_eq!(client.state(), SessionState::Streaming);

    conn.send("stream/end", json!({})).await.unwrap();
    wait_for_event(&mut events, |e| {
        matches!(e, ClientEvent::StreamEnded { stream_id } if stream_id == "stream-1")
    })
    .await;
    wait_for_state(&client, SessionState::Syncing).await;
    assert_eq!(client.snapshot().stream_id, None);

    assert_ok!(client.disconnect().await);
}

#[tokio::test]
async fn test_server_volume_command_is_acknowledged() {
    init_logging();
    let mut server = TestServer::start().await.unwrap();
    let (client, _sink) = client_with_sink(test_config(server.url()));
    let mut events = client.subscribe();

    let mut conn = connect_and_handshake(&client, &mut server).await;
    conn.send(
        "server/command",
        json!({ "player": { "command": "volume", "volume": 30 } }),
    )
    .await
    .unwrap();

    let state = conn.recv_type("client/state").await.unwrap();
    assert_eq!(state["payload"]["player"]["volume"], 30);
    assert_eq!(state["payload"]["player"]["muted"], false);

    let event = wait_for_event(&mut events, |e| matches!(e, ClientEvent::VolumeChanged { .. })).await;
    assert_eq!(
        event,
        ClientEvent::VolumeChanged {
            volume: 0.3,
            muted: false
        }
    );

    client.set_muted(true).unwrap();
    let state = conn.recv_type("client/state").await.unwrap();
    assert_eq!(state["payload"]["player"]["muted"], true);

    assert_ok!(client.disconnect().await);
}

#[tokio::test]
async fn test_state_ack_is_settled_before_deadline() {
    init_logging();
    let mut server = TestServer::start().await.unwrap();
    let mut config = test_config(server.url());
    config.state_ack_deadline_ms = 50;
    let (client, _sink) = client_with_sink(config);
    let mut events = client.subscribe();

    let _conn = connect_and_handshake(&client, &mut server).await;

    // Several housekeeping ticks pass the deadline without a violation
    let report = tokio::time::timeout(Duration::from_millis(400), async {
        loop {
            match events.recv().await {
                Ok(ClientEvent::Error(report)) => return report,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => std::future::pending().await,
            }
        }
    })
    .await;
    assert!(report.is_err(), "unexpected report: {:?}", report);
    assert_eq!(client.state(), SessionState::Syncing);

    assert_ok!(client.disconnect().await);
}

#[tokio::test]
async fn test_abnormal_close_reconnects() {
    init_logging();
    let mut server = TestServer::start().await.unwrap();
    let (client, _sink) = client_with_sink(test_config(server.url()));
    let mut events = client.subscribe();

    let mut conn = connect_and_handshake(&client, &mut server).await;
    conn.answer_time(SERVER_NOW_US).await.unwrap();
    wait_for_clock_update(&client).await;
    assert!(client.snapshot().clock_offset_us > 0.0);
    conn.drop_connection();

    let report = wait_for_event(&mut events, |e| matches!(e, ClientEvent::Error(_))).await;
    match report {
        ClientEvent::Error(report) => assert_eq!(report.severity, Severity::NonFatal),
        other => panic!("unexpected event: {:?}", other),
    }

    let mut conn = server.accept().await.unwrap();
    conn.handshake().await.unwrap();
    wait_for_state(&client, SessionState::Syncing).await;

    // The new session starts from a fresh clock estimate
    let snapshot = client.snapshot();
    assert_eq!(snapshot.reconnect_attempts, 0);
    assert_eq!(snapshot.clock_offset_us, 0.0);
    assert_eq!(snapshot.clock_variance, 1_000_000.0);

    assert_ok!(client.disconnect().await);
}

#[tokio::test]
async fn test_disconnect_during_handshake() {
    init_logging();
    let mut server = TestServer::start().await.unwrap();
    let mut config = test_config(server.url());
    config.handshake_grace_ms = 30_000;
    let (client, _sink) = client_with_sink(config);

    // Server accepts and reads the hello but never answers it
    let (connected, _conn) = tokio::join!(client.connect(), async {
        let mut conn = server.accept().await.unwrap();
        conn.recv_type("client/hello").await.unwrap();
        assert_eq!(client.state(), SessionState::Authenticating);
        assert_ok!(client.disconnect().await);
        conn
    });

    let err = assert_err!(connected);
    assert!(matches!(err, Error::NotConnected), "{:?}", err);
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(!client.is_running());
    assert!(server.expect_no_connection(Duration::from_millis(300)).await);
}

#[tokio::test]
async fn test_normal_server_close_does_not_reconnect() {
    init_logging();
    let mut server = TestServer::start().await.unwrap();
    let (client, _sink) = client_with_sink(test_config(server.url()));

    let conn = connect_and_handshake(&client, &mut server).await;
    conn.close(1000).await.unwrap();

    wait_for_state(&client, SessionState::Disconnected).await;
    assert!(server.expect_no_connection(Duration::from_millis(300)).await);
    assert!(!client.is_running());
}

#[tokio::test]
async fn test_disconnect_closes_normally_and_stays_down() {
    init_logging();
    let mut server = TestServer::start().await.unwrap();
    let (client, mut sink) = client_with_sink(test_config(server.url()));

    let mut conn = connect_and_handshake(&client, &mut server).await;
    conn.start_pcm_stream("stream-1").await.unwrap();
    conn.send_audio(1_000_000, &pcm_silence_20ms()).await.unwrap();
    wait_for_play(&mut sink).await;

    let (disconnected, close_code) = tokio::join!(client.disconnect(), conn.recv_close());
    disconnected.unwrap();
    assert_eq!(close_code.unwrap(), Some(1000));

    assert_eq!(client.state(), SessionState::Disconnected);
    let snapshot = client.snapshot();
    assert_eq!(snapshot.queue_depth, 0);
    assert!(server.expect_no_connection(Duration::from_millis(300)).await);

    // Second call is a no-op
    assert_ok!(client.disconnect().await);
}
