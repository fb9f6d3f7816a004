//! WebSocket session transport
//!
//! One socket per session. Outbound messages go through an unbounded channel
//! drained by a sender task; a receiver task classifies every inbound message
//! as control (text) or audio (binary) and forwards it in arrival order.

use super::{CloseInfo, TransportEvent, ABNORMAL_CLOSE, NORMAL_CLOSE};
use crate::protocol::{BinaryFrame, ClientMessage, ServerMessage};
use crate::{Error, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, instrument, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Handle to an open WebSocket session
pub struct WebSocketTransport {
    /// Outgoing message sender
    tx: mpsc::UnboundedSender<Message>,

    /// Cleared once either side started closing
    open: Arc<AtomicBool>,

    receiver: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Open a socket to `url`, failing after `timeout`
    ///
    /// Returns the transport and the stream of arrivals. The stream ends with
    /// exactly one [`TransportEvent::Closed`].
    #[instrument(skip(timeout), fields(timeout_ms = timeout.as_millis() as u64))]
    pub async fn connect(
        url: &str,
        timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        info!("Connecting to Sendspin server");

        let (ws_stream, _) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| {
                Error::OperationTimeout(format!("connect to {} after {:?}", url, timeout))
            })?
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        info!("WebSocket connected");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::sender_task(write, rx, open.clone()));
        let receiver = tokio::spawn(Self::receiver_task(read, events_tx, open.clone()));

        Ok((Self { tx, open, receiver }, events_rx))
    }

    /// True until a close was sent or received
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Queue a control message
    pub fn send(&self, message: &ClientMessage) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }

        let json = message.to_json()?;
        trace!(kind = message.kind(), "Sending control message");

        self.tx
            .send(Message::Text(json))
            .map_err(|e| Error::WebSocketError(format!("Failed to send message: {}", e)))
    }

    /// Start an orderly close with `code`
    pub fn close(&self, code: u16) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        debug!(code, "Closing WebSocket");
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: if code == NORMAL_CLOSE {
                "client disconnect".into()
            } else {
                "".into()
            },
        };

        self.tx
            .send(Message::Close(Some(frame)))
            .map_err(|e| Error::WebSocketError(format!("Failed to send close: {}", e)))
    }

    /// Sender task: sends messages from channel to WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
        open: Arc<AtomicBool>,
    ) {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                open.store(false, Ordering::Release);
                break;
            }
            if is_close {
                break;
            }
        }

        debug!("Sender task terminated");
    }

    /// Receiver task: classifies inbound messages and forwards them
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        events: mpsc::UnboundedSender<TransportEvent>,
        open: Arc<AtomicBool>,
    ) {
        let close = loop {
            let Some(msg_result) = read.next().await else {
                break CloseInfo::new(ABNORMAL_CLOSE, "connection dropped");
            };

            let event = match msg_result {
                Ok(Message::Text(text)) => match ServerMessage::parse(&text) {
                    Ok(Some(message)) => TransportEvent::Control(message),
                    Ok(None) => {
                        debug!("Ignoring unknown control message type");
                        continue;
                    }
                    Err(e) => TransportEvent::Malformed(e),
                },
                Ok(Message::Binary(data)) => match BinaryFrame::parse(Bytes::from(data)) {
                    Ok(BinaryFrame::Audio(frame)) => TransportEvent::Audio(frame),
                    Ok(BinaryFrame::Other { frame_type }) => {
                        trace!(frame_type, "Ignoring non-audio binary frame");
                        continue;
                    }
                    Err(e) => TransportEvent::Malformed(e),
                },
                Ok(Message::Close(frame)) => {
                    break match frame {
                        Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.as_ref()),
                        None => CloseInfo::new(1005, "no status"),
                    };
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    break CloseInfo::new(ABNORMAL_CLOSE, &e.to_string());
                }
            };

            if events.send(event).is_err() {
                debug!("Event receiver dropped, stopping receiver task");
                open.store(false, Ordering::Release);
                return;
            }
        };

        open.store(false, Ordering::Release);
        if close.is_normal() {
            info!(code = close.code, "WebSocket closed");
        } else {
            warn!(code = close.code, reason = %close.reason, "WebSocket closed abnormally");
        }
        let _ = events.send(TransportEvent::Closed(close));

        debug!("Receiver task terminated");
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}
