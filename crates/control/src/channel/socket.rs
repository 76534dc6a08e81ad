//! WebSocket control channel
//!
//! Frames are JSON text messages `{"event": <name>, "data": <payload>}`.
//! The client emits `brightness` / `frequency` with a number; the server
//! pushes `current_brightness`, `current_frequency`, `clients` and
//! `error` (`{"error": <code>, "message": <text>}`).
//!
//! The connection is kept by a background task that reconnects after a
//! fixed delay whenever the socket closes.

use super::{ChannelEvent, ControlChannel};
use crate::key::{ControlChange, ControlKey};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// One event on the control socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Frame the client emits for a change
    pub fn for_change(change: &ControlChange) -> Self {
        Self::new(change.key.as_str(), serde_json::Value::from(change.value))
    }

    /// Interpret a server push
    ///
    /// Returns `None` for events this client does not handle.
    pub fn into_channel_event(self) -> Option<ChannelEvent> {
        let as_i32 = |data: &serde_json::Value| data.as_f64().map(|v| v.round() as i32);

        if let Some(key) = ControlKey::ALL
            .into_iter()
            .find(|key| key.current_event() == self.event)
        {
            return as_i32(&self.data).map(|value| ChannelEvent::CurrentValue { key, value });
        }

        match self.event.as_str() {
            "clients" => self
                .data
                .as_u64()
                .map(|n| ChannelEvent::ClientCount(n as u32)),
            "error" => Some(ChannelEvent::ServerError {
                error: self
                    .data
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("UNKNOWN")
                    .to_string(),
                message: self
                    .data
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            }),
            _ => None,
        }
    }
}

/// Persistent WebSocket connection to the control server
pub struct SocketChannel {
    url: String,

    /// Sender into the live connection's writer task, if connected
    outgoing: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,

    shutdown: CancellationToken,
}

impl SocketChannel {
    /// Start connecting to `url` (ws:// or wss://)
    ///
    /// Returns the channel and the stream of server events. The background
    /// task runs until [`close`](Self::close) is called or the channel is
    /// dropped.
    pub fn spawn(
        url: impl Into<String>,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let url = url.into();
        let outgoing = Arc::new(Mutex::new(None));
        let shutdown = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::run(
            url.clone(),
            reconnect_delay,
            Arc::clone(&outgoing),
            events_tx,
            shutdown.clone(),
        ));

        (
            Self {
                url,
                outgoing,
                shutdown,
            },
            events_rx,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.outgoing.lock().is_some()
    }

    /// Close the socket and stop reconnecting
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Connection loop: connect, pump frames until closed, wait, repeat
    async fn run(
        url: String,
        reconnect_delay: Duration,
        outgoing: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
        events_tx: mpsc::UnboundedSender<ChannelEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            info!("Connecting to control socket: {}", url);

            let connected = tokio::select! {
                result = connect_async(&url) => result,
                _ = shutdown.cancelled() => break,
            };

            match connected {
                Ok((ws_stream, _)) => {
                    info!("Connected to control socket");
                    let (write, read) = ws_stream.split();

                    let (tx, rx) = mpsc::unbounded_channel();
                    *outgoing.lock() = Some(tx);
                    let _ = events_tx.send(ChannelEvent::Connected);

                    let sender = tokio::spawn(Self::sender_task(write, rx));

                    tokio::select! {
                        _ = Self::receiver_task(read, &events_tx) => {}
                        _ = shutdown.cancelled() => {}
                    }

                    // Dropping the last sender lets the writer flush and exit
                    outgoing.lock().take();
                    let _ = sender.await;

                    info!("Control socket disconnected");
                    let _ = events_tx.send(ChannelEvent::Disconnected);
                }
                Err(e) => {
                    warn!("Failed to connect control socket: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(reconnect_delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        debug!("Control socket task terminated");
    }

    /// Sender task: sends messages from channel to WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send control frame: {}", e);
                break;
            }
        }

        let _ = write.close().await;
        debug!("Sender task terminated");
    }

    /// Receiver task: decodes server pushes until the socket closes
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        events_tx: &mpsc::UnboundedSender<ChannelEvent>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<EventFrame>(&text) {
                    Ok(frame) => {
                        let name = frame.event.clone();
                        match frame.into_channel_event() {
                            Some(event) => {
                                let _ = events_tx.send(event);
                            }
                            None => debug!(event = %name, "Ignoring control socket event"),
                        }
                    }
                    Err(e) => warn!("Malformed control frame: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("Control socket closed by server");
                    break;
                }
                Err(e) => {
                    error!("Control socket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl ControlChannel for SocketChannel {
    async fn send(&self, change: ControlChange) -> Result<()> {
        let text = serde_json::to_string(&EventFrame::for_change(&change))?;
        let tx = self.outgoing.lock().clone().ok_or(Error::Disconnected)?;

        debug!(%change, "[WS] Change");
        tx.send(Message::Text(text))
            .map_err(|_| Error::Disconnected)
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_frame() {
        let frame = EventFrame::for_change(&ControlChange::brightness(30));
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"event": "brightness", "data": 30})
        );
    }

    #[test]
    fn test_current_value_push() {
        let frame: EventFrame =
            serde_json::from_str(r#"{"event": "current_frequency", "data": -1000}"#).unwrap();
        assert_eq!(
            frame.into_channel_event(),
            Some(ChannelEvent::CurrentValue {
                key: ControlKey::Frequency,
                value: -1000
            })
        );
    }

    #[test]
    fn test_current_push_for_every_control() {
        for key in ControlKey::ALL {
            let frame = EventFrame::new(key.current_event(), json!(12.6));
            assert_eq!(
                frame.into_channel_event(),
                Some(ChannelEvent::CurrentValue { key, value: 13 })
            );
        }

        // Echo of a control name without the prefix is not a push
        assert_eq!(EventFrame::new("brightness", json!(12)).into_channel_event(), None);
        assert_eq!(EventFrame::new("current_frequency", json!("fast")).into_channel_event(), None);
    }

    #[test]
    fn test_error_push() {
        let frame = EventFrame::new(
            "error",
            json!({"error": "INVALID_BRIGHTNESS_RANGE", "message": "Brightness must be between 0 and 50"}),
        );
        assert_eq!(
            frame.into_channel_event(),
            Some(ChannelEvent::ServerError {
                error: "INVALID_BRIGHTNESS_RANGE".to_string(),
                message: Some("Brightness must be between 0 and 50".to_string()),
            })
        );
    }

    #[test]
    fn test_unknown_push_is_ignored() {
        let frame = EventFrame::new("json", json!({"data": "hello"}));
        assert_eq!(frame.into_channel_event(), None);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails() {
        // Nothing listens on port 9 of localhost
        let (channel, _events) = SocketChannel::spawn("ws://127.0.0.1:9", Duration::from_secs(60));
        let err = channel.send(ControlChange::frequency(0)).await.unwrap_err();
        assert!(matches!(err, Error::Disconnected));
        channel.close();
    }
}
