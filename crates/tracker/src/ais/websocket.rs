//! aisstream WebSocket client
//!
//! aisstream closes idle sockets, so the client sends a WS-level ping on a
//! fixed interval while waiting for data. There is no read timeout: quiet
//! periods are normal when the tracked vessels are out of receiver range.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{protocol::WebSocketConfig, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace};
use url::Url;

use crate::error::StreamError;
use crate::traits::{StreamConnection, StreamSource};

/// aisstream.io streaming endpoint
pub const AISSTREAM_WS_URL: &str = "wss://stream.aisstream.io/v0/stream";

/// Default keep-alive ping interval
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Opens aisstream connections
#[derive(Debug, Clone)]
pub struct AisStreamSource {
    url: Url,
    ping_interval: Duration,
}

impl AisStreamSource {
    pub fn new(url: &str, ping_interval: Duration) -> Result<Self, StreamError> {
        let url = Url::parse(url).map_err(|e| StreamError::Connection(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(StreamError::Connection(format!(
                    "unsupported URL scheme: {}",
                    other
                )))
            }
        }
        Ok(Self { url, ping_interval })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait]
impl StreamSource for AisStreamSource {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError> {
        let ws = AisWebSocket::connect(self.url.as_str(), self.ping_interval).await?;
        Ok(Box::new(ws))
    }
}

/// One open aisstream connection
pub struct AisWebSocket {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ping: Interval,
}

impl AisWebSocket {
    /// Max WebSocket message size: 1 MiB
    const MAX_MESSAGE_SIZE: usize = 1_048_576;

    pub async fn connect(url: &str, ping_interval: Duration) -> Result<Self, StreamError> {
        info!(url = %url, "Connecting to aisstream WebSocket");

        let config = WebSocketConfig {
            max_message_size: Some(Self::MAX_MESSAGE_SIZE),
            max_frame_size: Some(Self::MAX_MESSAGE_SIZE),
            ..Default::default()
        };

        let (ws, response) = connect_async_with_config(url, Some(config), false).await?;

        info!(status = ?response.status(), "aisstream WebSocket connected");

        let ping_interval = ping_interval.max(Duration::from_millis(1));
        let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Self { ws, ping })
    }
}

#[async_trait]
impl StreamConnection for AisWebSocket {
    async fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Result<Option<String>, StreamError> {
        loop {
            tokio::select! {
                _ = self.ping.tick() => {
                    trace!("Sending keep-alive ping");
                    self.ws.send(Message::Ping(vec![])).await?;
                }
                msg = self.ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        trace!(len = text.len(), "Received aisstream message");
                        return Ok(Some(text));
                    }
                    // aisstream delivers JSON in binary frames too
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => return Ok(Some(text)),
                        Err(e) => debug!(error = %e, "Skipping non UTF-8 frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        trace!("Received ping, sending pong");
                        self.ws.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "aisstream WebSocket closed");
                        return Ok(None);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(None),
                },
            }
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        debug!("Closing aisstream WebSocket");
        self.ws.close(None).await?;
        Ok(())
    }
}
