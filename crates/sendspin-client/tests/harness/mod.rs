//! Sendspin integration test harness
//!
//! Provides an in-process WebSocket server on a random port. Each accepted
//! connection is handed to the test as a [`ServerConn`] that speaks raw JSON
//! and binary frames, so tests script the server side message by message.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

/// Default wait for anything the client should do promptly
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Unexpected message: {0}")]
    Unexpected(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Embedded Sendspin test server
pub struct TestServer {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<ServerConn>,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    /// Bind on 127.0.0.1 with a random port and start accepting
    pub async fn start() -> HarnessResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, connections) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                debug!(%peer, "Test server accepted TCP connection");
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => {
                        if tx.send(ServerConn { ws }).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("WebSocket handshake failed: {}", e),
                }
            }
        });

        info!(%addr, "Test server listening");
        Ok(Self {
            addr,
            connections,
            accept_task,
        })
    }

    /// URL clients should connect to
    pub fn url(&self) -> String {
        format!("ws://{}/sendspin", self.addr)
    }

    /// Wait for the next client connection
    pub async fn accept(&mut self) -> HarnessResult<ServerConn> {
        tokio::time::timeout(STEP_TIMEOUT, self.connections.recv())
            .await
            .map_err(|_| HarnessError::Timeout("no client connected".to_string()))?
            .ok_or_else(|| HarnessError::ConnectionError("accept loop ended".to_string()))
    }

    /// Wait for a connection that should not come
    pub async fn expect_no_connection(&mut self, within: Duration) -> bool {
        tokio::time::timeout(within, self.connections.recv())
            .await
            .is_err()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Server side of one client session
pub struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    /// Next JSON control message, skipping pings
    pub async fn recv_json(&mut self) -> HarnessResult<Value> {
        loop {
            let msg = tokio::time::timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .map_err(|_| HarnessError::Timeout("no message from client".to_string()))?
                .ok_or_else(|| HarnessError::ConnectionError("client went away".to_string()))?
                .map_err(|e| HarnessError::ConnectionError(e.to_string()))?;

            match msg {
                Message::Text(text) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| HarnessError::Unexpected(format!("bad JSON: {}", e)))
                }
                Message::Close(frame) => {
                    return Err(HarnessError::ConnectionError(format!(
                        "client closed: {:?}",
                        frame
                    )))
                }
                _ => continue,
            }
        }
    }

    /// Next message of type `kind`, skipping others
    pub async fn recv_type(&mut self, kind: &str) -> HarnessResult<Value> {
        loop {
            let message = self.recv_json().await?;
            if message["type"] == kind {
                return Ok(message);
            }
            debug!(got = %message["type"], want = kind, "Skipping client message");
        }
    }

    /// Wait for the client's close frame and return its code
    pub async fn recv_close(&mut self) -> HarnessResult<Option<u16>> {
        loop {
            let next = tokio::time::timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .map_err(|_| HarnessError::Timeout("client did not close".to_string()))?;
            match next {
                Some(Ok(Message::Close(frame))) => return Ok(frame.map(|f| u16::from(f.code))),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return Ok(None),
            }
        }
    }

    /// Send a control message
    pub async fn send_json(&mut self, message: Value) -> HarnessResult<()> {
        self.ws
            .send(Message::Text(message.to_string()))
            .await
            .map_err(|e| HarnessError::ConnectionError(e.to_string()))
    }

    /// Send a typed control message
    pub async fn send(&mut self, kind: &str, payload: Value) -> HarnessResult<()> {
        self.send_json(json!({ "type": kind, "payload": payload })).await
    }

    /// Send an audio frame
    pub async fn send_audio(&mut self, timestamp_us: u64, payload: &[u8]) -> HarnessResult<()> {
        let mut frame = vec![4u8];
        frame.extend_from_slice(&timestamp_us.to_be_bytes());
        frame.extend_from_slice(payload);
        self.send_raw_binary(frame).await
    }

    /// Send raw bytes as a binary message
    pub async fn send_raw_binary(&mut self, data: Vec<u8>) -> HarnessResult<()> {
        self.ws
            .send(Message::Binary(data))
            .await
            .map_err(|e| HarnessError::ConnectionError(e.to_string()))
    }

    /// Reply to the client hello
    pub async fn send_hello(&mut self) -> HarnessResult<()> {
        self.send(
            "server/hello",
            json!({
                "server_id": "test-server",
                "name": "Test Server",
                "version": 1,
                "active_roles": ["player@v1"],
            }),
        )
        .await
    }

    /// Answer one client/time request with `server_us` as both server stamps
    pub async fn answer_time(&mut self, server_us: i64) -> HarnessResult<()> {
        let request = self.recv_type("client/time").await?;
        let t0 = request["payload"]["client_transmitted"]
            .as_i64()
            .ok_or_else(|| HarnessError::Unexpected("client/time without timestamp".to_string()))?;
        self.send(
            "server/time",
            json!({
                "client_transmitted": t0,
                "server_received": server_us,
                "server_transmitted": server_us,
            }),
        )
        .await
    }

    /// Full handshake: read hello, reply, read the state ack
    pub async fn handshake(&mut self) -> HarnessResult<Value> {
        let hello = self.recv_type("client/hello").await?;
        self.send_hello().await?;
        self.recv_type("client/state").await?;
        Ok(hello)
    }

    /// Start a 48 kHz stereo 16-bit PCM stream
    pub async fn start_pcm_stream(&mut self, stream_id: &str) -> HarnessResult<()> {
        self.send(
            "stream/start",
            json!({
                "stream_id": stream_id,
                "player": {
                    "codec": "pcm",
                    "sample_rate": 48000,
                    "channels": 2,
                    "bit_depth": 16,
                },
            }),
        )
        .await
    }

    /// Orderly close with `code`
    pub async fn close(mut self, code: u16) -> HarnessResult<()> {
        self.ws
            .close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: "test".into(),
            }))
            .await
            .map_err(|e| HarnessError::ConnectionError(e.to_string()))
    }

    /// Drop the TCP connection without a close frame
    pub fn drop_connection(self) {
        drop(self.ws);
    }
}

/// 20 ms of 48 kHz stereo 16-bit silence
pub fn pcm_silence_20ms() -> Vec<u8> {
    vec![0u8; 960 * 2 * 2]
}

/// Initialize test logging
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,sendspin_client=debug")
        .with_test_writer()
        .try_init();
}
