//! aisstream.io upstream: wire messages and the WebSocket client

pub mod messages;
pub mod websocket;

pub use messages::{AisEnvelope, Inbound, SubscriptionRequest, POSITION_REPORT};
pub use websocket::{AisStreamSource, AisWebSocket, AISSTREAM_WS_URL, DEFAULT_PING_INTERVAL};
